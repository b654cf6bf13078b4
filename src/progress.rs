//! Per-task and per-session download counters plus the derived metrics the
//! display needs. Pure data: everything time-dependent takes an explicit `now`.

use std::time::{Duration, Instant};

/// Position of a segment in the session's input list.
pub type TaskId = usize;
/// Display row index in `[0, workers)`.
pub type Slot = usize;

/// One live segment download.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub id: TaskId,
    pub slot: Slot,
    pub filename: String,
    /// Declared `Content-Length`; `None` until (and unless) the response carries one.
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub started_at: Instant,
}

impl TaskProgress {
    pub fn new(id: TaskId, slot: Slot, filename: impl Into<String>, started_at: Instant) -> Self {
        Self {
            id,
            slot,
            filename: filename.into(),
            total_bytes: None,
            downloaded_bytes: 0,
            started_at,
        }
    }

    pub fn record_chunk(&mut self, len: u64) {
        self.downloaded_bytes = self.downloaded_bytes.saturating_add(len);
    }

    pub fn percent(&self) -> Option<u64> {
        percent_of(self.downloaded_bytes, self.total_bytes?)
    }

    /// Bytes per second since the task was registered.
    pub fn throughput(&self, now: Instant) -> Option<f64> {
        rate(self.downloaded_bytes, now.saturating_duration_since(self.started_at))
    }

    pub fn row(&self, now: Instant) -> RowView {
        if self.downloaded_bytes == 0 {
            return RowView::Initializing {
                filename: self.filename.clone(),
            };
        }
        RowView::Active {
            filename: self.filename.clone(),
            percent: self.percent(),
            throughput: self.throughput(now),
        }
    }
}

/// Aggregate counters for one session.
///
/// `estimated_total_bytes` extrapolates from the segments that reported a size
/// so far (`task_count * average`), so it moves as more segments report.
#[derive(Debug, Clone)]
pub struct SessionProgress {
    pub task_count: usize,
    /// Tasks that reported a declared size.
    pub reported_task_count: u64,
    /// Sum of those declared sizes.
    pub cumulative_task_bytes: u64,
    /// Bytes received across every task, live or retired.
    pub bytes_downloaded: u64,
    /// Part of `bytes_downloaded` owned by tasks that already reached a terminal state.
    pub retired_bytes: u64,
    pub completed_task_count: usize,
    pub failed_task_count: usize,
    pub started_at: Instant,
}

impl SessionProgress {
    pub fn new(task_count: usize, started_at: Instant) -> Self {
        Self {
            task_count,
            reported_task_count: 0,
            cumulative_task_bytes: 0,
            bytes_downloaded: 0,
            retired_bytes: 0,
            completed_task_count: 0,
            failed_task_count: 0,
            started_at,
        }
    }

    pub fn record_size(&mut self, total_bytes: u64) {
        self.reported_task_count += 1;
        self.cumulative_task_bytes = self.cumulative_task_bytes.saturating_add(total_bytes);
    }

    pub fn record_chunk(&mut self, len: u64) {
        self.bytes_downloaded = self.bytes_downloaded.saturating_add(len);
    }

    /// Folds a finished task's byte count into the retained sum.
    pub fn retire(&mut self, downloaded_bytes: u64, failed: bool) {
        self.retired_bytes = self.retired_bytes.saturating_add(downloaded_bytes);
        if failed {
            self.failed_task_count += 1;
        } else {
            self.completed_task_count += 1;
        }
    }

    pub fn finished_task_count(&self) -> usize {
        self.completed_task_count + self.failed_task_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished_task_count() >= self.task_count
    }

    pub fn avg_segment_size(&self) -> Option<u64> {
        if self.reported_task_count == 0 {
            return None;
        }
        Some(self.cumulative_task_bytes / self.reported_task_count)
    }

    pub fn estimated_total_bytes(&self) -> Option<u64> {
        if self.reported_task_count == 0 {
            return None;
        }
        let est = self.task_count as u128 * self.cumulative_task_bytes as u128
            / self.reported_task_count as u128;
        Some(u64::try_from(est).unwrap_or(u64::MAX))
    }

    pub fn overall_percent(&self) -> Option<u64> {
        percent_of(self.bytes_downloaded, self.estimated_total_bytes()?)
    }

    /// Session-lifetime average, not a moving window.
    pub fn throughput(&self, now: Instant) -> Option<f64> {
        rate(self.bytes_downloaded, now.saturating_duration_since(self.started_at))
    }

    /// Seconds left at the current average rate, truncated toward zero.
    /// Goes negative when the estimate drops below what is already downloaded.
    pub fn eta_seconds(&self, now: Instant) -> Option<i64> {
        let estimate = self.estimated_total_bytes()?;
        let throughput = self.throughput(now).filter(|t| *t > 0.0)?;
        let remaining = estimate as f64 - self.bytes_downloaded as f64;
        let eta = remaining / throughput;
        eta.is_finite().then_some(eta as i64)
    }

    pub fn header(&self, now: Instant) -> HeaderView {
        HeaderView {
            bytes_downloaded: self.bytes_downloaded,
            estimated_total_bytes: self.estimated_total_bytes(),
            overall_percent: self.overall_percent(),
            throughput: self.throughput(now),
            eta_seconds: self.eta_seconds(now),
            finished_tasks: self.finished_task_count(),
            failed_tasks: self.failed_task_count,
            task_count: self.task_count,
        }
    }
}

/// Header row values frozen at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderView {
    pub bytes_downloaded: u64,
    pub estimated_total_bytes: Option<u64>,
    pub overall_percent: Option<u64>,
    pub throughput: Option<f64>,
    pub eta_seconds: Option<i64>,
    pub finished_tasks: usize,
    pub failed_tasks: usize,
    pub task_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowView {
    Idle,
    Initializing {
        filename: String,
    },
    Active {
        filename: String,
        percent: Option<u64>,
        throughput: Option<f64>,
    },
}

/// Everything the renderer draws: one header and exactly `workers` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub header: HeaderView,
    pub rows: Vec<RowView>,
}

impl Snapshot {
    /// State before any event arrived.
    pub fn idle(workers: usize, task_count: usize) -> Self {
        let now = Instant::now();
        Self {
            header: SessionProgress::new(task_count, now).header(now),
            rows: vec![RowView::Idle; workers],
        }
    }
}

fn percent_of(part: u64, whole: u64) -> Option<u64> {
    if whole == 0 {
        return None;
    }
    Some((part as u128 * 100 / whole as u128) as u64)
}

fn rate(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    (secs > 0.0).then(|| bytes as f64 / secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_percent_truncates_and_needs_a_size() {
        let t0 = Instant::now();
        let mut task = TaskProgress::new(0, 0, "a.ts", t0);
        task.record_chunk(10);
        assert_eq!(task.percent(), None);

        task.total_bytes = Some(3);
        task.downloaded_bytes = 2;
        assert_eq!(task.percent(), Some(66));

        task.total_bytes = Some(1000);
        task.downloaded_bytes = 999;
        assert_eq!(task.percent(), Some(99));

        task.total_bytes = Some(0);
        assert_eq!(task.percent(), None);
    }

    #[test]
    fn task_throughput_uses_time_since_start() {
        let t0 = Instant::now();
        let mut task = TaskProgress::new(0, 0, "a.ts", t0);
        assert_eq!(task.throughput(t0), None);
        task.record_chunk(500);
        assert_eq!(task.throughput(t0 + Duration::from_secs(2)), Some(250.0));
    }

    #[test]
    fn row_is_initializing_until_first_byte() {
        let t0 = Instant::now();
        let mut task = TaskProgress::new(3, 1, "0003.ts", t0);
        task.total_bytes = Some(100);
        assert_eq!(
            task.row(t0),
            RowView::Initializing {
                filename: "0003.ts".into()
            }
        );
        task.record_chunk(50);
        assert_eq!(
            task.row(t0 + Duration::from_secs(1)),
            RowView::Active {
                filename: "0003.ts".into(),
                percent: Some(50),
                throughput: Some(50.0),
            }
        );
    }

    #[test]
    fn estimate_is_unknown_until_a_size_is_reported() {
        let t0 = Instant::now();
        let mut s = SessionProgress::new(4, t0);
        s.record_chunk(100);
        assert_eq!(s.avg_segment_size(), None);
        assert_eq!(s.estimated_total_bytes(), None);
        assert_eq!(s.overall_percent(), None);
        assert_eq!(s.eta_seconds(t0 + Duration::from_secs(1)), None);

        s.record_size(250);
        assert_eq!(s.avg_segment_size(), Some(250));
        assert_eq!(s.estimated_total_bytes(), Some(1000));
        assert_eq!(s.overall_percent(), Some(10));
    }

    #[test]
    fn estimate_moves_both_ways() {
        let mut s = SessionProgress::new(3, Instant::now());
        s.record_size(300);
        assert_eq!(s.estimated_total_bytes(), Some(900));
        s.record_size(100);
        assert_eq!(s.estimated_total_bytes(), Some(600));
        s.record_size(500);
        assert_eq!(s.estimated_total_bytes(), Some(900));
    }

    #[test]
    fn eta_from_lifetime_average_can_go_negative() {
        let t0 = Instant::now();
        let mut s = SessionProgress::new(2, t0);
        s.record_size(100);
        s.record_chunk(50);
        // 50 B over 1 s, 150 B left.
        assert_eq!(s.eta_seconds(t0 + Duration::from_secs(1)), Some(3));

        s.record_chunk(200);
        // 250 B downloaded against a 200 B estimate.
        assert_eq!(s.eta_seconds(t0 + Duration::from_secs(1)), Some(0));
        s.record_chunk(250);
        // 500 B/s, 300 B over the estimate.
        assert_eq!(s.eta_seconds(t0 + Duration::from_secs(1)), Some(0));
        assert_eq!(s.eta_seconds(t0 + Duration::from_secs(10)), Some(-6));
    }

    #[test]
    fn retire_keeps_bytes_and_counts_outcome() {
        let mut s = SessionProgress::new(2, Instant::now());
        s.record_chunk(40);
        s.retire(40, true);
        s.record_chunk(60);
        s.retire(60, false);
        assert_eq!(s.retired_bytes, 100);
        assert_eq!(s.bytes_downloaded, 100);
        assert_eq!(s.failed_task_count, 1);
        assert_eq!(s.completed_task_count, 1);
        assert!(s.is_finished());
    }
}
