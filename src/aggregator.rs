//! Single writer for all progress state.
//!
//! Fetchers only send [`ProgressEvent`]s; this side folds them into the
//! session and task counters and patches the published [`Snapshot`] in place.
//! Each entry point touches one task, one row and the header, so it stays O(1)
//! regardless of the worker count.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::event::{EventReceiver, ProgressEvent};
use crate::progress::{RowView, SessionProgress, Slot, Snapshot, TaskId, TaskProgress};

/// Final numbers of a drained session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub task_count: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub estimated_total_bytes: Option<u64>,
    pub elapsed: Duration,
}

pub struct Aggregator {
    session: SessionProgress,
    live: HashMap<TaskId, TaskProgress>,
    rows: Vec<Option<TaskId>>,
    snapshots: watch::Sender<Snapshot>,
}

impl Aggregator {
    pub fn new(workers: usize, task_count: usize, snapshots: watch::Sender<Snapshot>) -> Self {
        Self::new_at(workers, task_count, snapshots, Instant::now())
    }

    pub fn new_at(
        workers: usize,
        task_count: usize,
        snapshots: watch::Sender<Snapshot>,
        started_at: Instant,
    ) -> Self {
        let session = SessionProgress::new(task_count, started_at);
        let header = session.header(started_at);
        snapshots.send_modify(|snap| {
            snap.header = header;
            snap.rows = vec![RowView::Idle; workers];
        });
        Self {
            session,
            live: HashMap::new(),
            rows: vec![None; workers],
            snapshots,
        }
    }

    pub fn session(&self) -> &SessionProgress {
        &self.session
    }

    pub fn task(&self, task_id: TaskId) -> Option<&TaskProgress> {
        self.live.get(&task_id)
    }

    pub fn live_tasks(&self) -> impl Iterator<Item = &TaskProgress> {
        self.live.values()
    }

    /// Copy of what the renderer currently sees.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn on_init(&mut self, task_id: TaskId, slot: Slot, filename: impl Into<String>) {
        self.on_init_at(task_id, slot, filename, Instant::now());
    }

    pub fn on_start(&mut self, task_id: TaskId, total_bytes: u64) {
        self.on_start_at(task_id, total_bytes, Instant::now());
    }

    pub fn on_progress(&mut self, task_id: TaskId, chunk_len: u64) {
        self.on_progress_at(task_id, chunk_len, Instant::now());
    }

    pub fn on_end(&mut self, task_id: TaskId) {
        self.on_end_at(task_id, Instant::now());
    }

    pub fn on_failed(&mut self, task_id: TaskId, reason: &str) {
        self.on_failed_at(task_id, reason, Instant::now());
    }

    pub fn on_init_at(
        &mut self,
        task_id: TaskId,
        slot: Slot,
        filename: impl Into<String>,
        now: Instant,
    ) {
        let Some(occupant) = self.rows.get(slot).copied() else {
            warn!(task_id, slot, "init for a slot outside the worker budget");
            return;
        };
        if let Some(other) = occupant {
            warn!(task_id, slot, other, "init for an occupied slot");
            return;
        }
        if self.live.contains_key(&task_id) {
            warn!(task_id, "duplicate init");
            return;
        }
        let task = TaskProgress::new(task_id, slot, filename, now);
        let row = task.row(now);
        self.live.insert(task_id, task);
        self.rows[slot] = Some(task_id);
        self.publish(slot, row, now);
    }

    pub fn on_start_at(&mut self, task_id: TaskId, total_bytes: u64, now: Instant) {
        let Some(task) = self.live.get_mut(&task_id) else {
            warn!(task_id, "start for an unknown task");
            return;
        };
        if task.total_bytes.is_some() {
            warn!(task_id, "size reported twice, keeping the first");
            return;
        }
        task.total_bytes = Some(total_bytes);
        self.session.record_size(total_bytes);
        let (slot, row) = (task.slot, task.row(now));
        debug!(
            task_id,
            total_bytes,
            estimate = ?self.session.estimated_total_bytes(),
            "segment size reported"
        );
        self.publish(slot, row, now);
    }

    pub fn on_progress_at(&mut self, task_id: TaskId, chunk_len: u64, now: Instant) {
        let Some(task) = self.live.get_mut(&task_id) else {
            warn!(task_id, "progress for an unknown task");
            return;
        };
        task.record_chunk(chunk_len);
        if task.total_bytes.is_some_and(|total| task.downloaded_bytes > total) {
            warn!(task_id, downloaded = task.downloaded_bytes, "received more than declared");
        }
        self.session.record_chunk(chunk_len);
        let (slot, row) = (task.slot, task.row(now));
        self.publish(slot, row, now);
    }

    pub fn on_end_at(&mut self, task_id: TaskId, now: Instant) {
        self.retire(task_id, false, now);
    }

    pub fn on_failed_at(&mut self, task_id: TaskId, reason: &str, now: Instant) {
        debug!(task_id, reason, "segment failed");
        self.retire(task_id, true, now);
    }

    pub fn apply(&mut self, event: ProgressEvent) {
        self.apply_at(event, Instant::now());
    }

    pub fn apply_at(&mut self, event: ProgressEvent, now: Instant) {
        match event {
            ProgressEvent::Init {
                task_id,
                slot,
                filename,
            } => self.on_init_at(task_id, slot, filename, now),
            ProgressEvent::Start {
                task_id,
                total_bytes,
            } => self.on_start_at(task_id, total_bytes, now),
            ProgressEvent::Progress { task_id, chunk_len } => {
                self.on_progress_at(task_id, chunk_len, now)
            }
            ProgressEvent::End { task_id } => self.on_end_at(task_id, now),
            ProgressEvent::Failed { task_id, reason } => self.on_failed_at(task_id, &reason, now),
        }
    }

    /// Drains `events` until every sender is gone.
    pub async fn run(mut self, mut events: EventReceiver) -> SessionSummary {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        let summary = self.summary(Instant::now());
        info!(
            completed = summary.completed,
            failed = summary.failed,
            bytes = summary.bytes_downloaded,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "session drained"
        );
        summary
    }

    pub fn summary(&self, now: Instant) -> SessionSummary {
        SessionSummary {
            task_count: self.session.task_count,
            completed: self.session.completed_task_count,
            failed: self.session.failed_task_count,
            bytes_downloaded: self.session.bytes_downloaded,
            estimated_total_bytes: self.session.estimated_total_bytes(),
            elapsed: now.saturating_duration_since(self.session.started_at),
        }
    }

    fn retire(&mut self, task_id: TaskId, failed: bool, now: Instant) {
        let Some(task) = self.live.remove(&task_id) else {
            warn!(task_id, "end for an unknown task");
            return;
        };
        self.rows[task.slot] = None;
        self.session.retire(task.downloaded_bytes, failed);
        self.publish(task.slot, RowView::Idle, now);
    }

    fn publish(&self, slot: Slot, row: RowView, now: Instant) {
        let header = self.session.header(now);
        self.snapshots.send_modify(|snap| {
            snap.header = header;
            if let Some(target) = snap.rows.get_mut(slot) {
                *target = row;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;

    fn aggregator(workers: usize, tasks: usize) -> (Aggregator, Instant) {
        let (tx, _rx) = watch::channel(Snapshot::idle(workers, tasks));
        let t0 = Instant::now();
        (Aggregator::new_at(workers, tasks, tx, t0), t0)
    }

    fn assert_bytes_balance(agg: &Aggregator) {
        let live: u64 = agg.live_tasks().map(|t| t.downloaded_bytes).sum();
        assert_eq!(agg.session().bytes_downloaded, agg.session().retired_bytes + live);
    }

    #[test]
    fn three_sized_segments_on_two_workers() {
        let (mut agg, t0) = aggregator(2, 3);
        let at = |ms| t0 + Duration::from_millis(ms);

        agg.on_init_at(0, 0, "a.ts", at(0));
        agg.on_init_at(1, 1, "b.ts", at(0));
        assert_eq!(agg.snapshot().header.overall_percent, None);

        agg.on_start_at(0, 100, at(1));
        assert_eq!(agg.session().estimated_total_bytes(), Some(300));
        agg.on_start_at(1, 200, at(1));
        assert_eq!(agg.session().estimated_total_bytes(), Some(450));

        agg.on_progress_at(0, 100, at(10));
        agg.on_progress_at(1, 150, at(10));
        assert_bytes_balance(&agg);
        agg.on_end_at(0, at(20));
        assert_bytes_balance(&agg);
        assert_eq!(agg.snapshot().rows[0], RowView::Idle);

        agg.on_init_at(2, 0, "c.ts", at(20));
        agg.on_start_at(2, 300, at(21));
        assert_eq!(agg.session().estimated_total_bytes(), Some(600));

        agg.on_progress_at(1, 50, at(30));
        agg.on_progress_at(2, 300, at(40));
        agg.on_end_at(1, at(41));
        agg.on_end_at(2, at(42));
        assert_bytes_balance(&agg);

        let session = agg.session();
        assert_eq!(session.bytes_downloaded, 600);
        assert_eq!(session.overall_percent(), Some(100));
        assert!(session.is_finished());
        assert_eq!(agg.live_tasks().count(), 0);
        assert_eq!(agg.snapshot().rows, vec![RowView::Idle, RowView::Idle]);
    }

    #[test]
    fn unknown_size_task_still_counts_bytes() {
        let (mut agg, t0) = aggregator(1, 1);
        agg.on_init_at(0, 0, "x.ts", t0);
        agg.on_progress_at(0, 42, t0 + Duration::from_secs(1));

        assert_eq!(agg.task(0).unwrap().percent(), None);
        assert_eq!(
            agg.snapshot().rows[0],
            RowView::Active {
                filename: "x.ts".into(),
                percent: None,
                throughput: Some(42.0),
            }
        );
        let header = agg.snapshot().header;
        assert_eq!(header.bytes_downloaded, 42);
        assert_eq!(header.estimated_total_bytes, None);
        assert_eq!(header.overall_percent, None);
        assert_eq!(header.eta_seconds, None);

        agg.on_end_at(0, t0 + Duration::from_secs(2));
        assert_eq!(agg.session().bytes_downloaded, 42);
        assert_eq!(agg.session().completed_task_count, 1);
    }

    #[test]
    fn failed_task_keeps_its_partial_bytes() {
        let (mut agg, t0) = aggregator(2, 2);
        agg.on_init_at(0, 0, "bad.ts", t0);
        agg.on_init_at(1, 1, "good.ts", t0);
        agg.on_start_at(0, 100, t0);
        agg.on_start_at(1, 100, t0);
        agg.on_progress_at(0, 40, t0);
        agg.on_failed_at(0, "connection reset", t0);
        agg.on_progress_at(1, 100, t0);
        agg.on_end_at(1, t0);

        let session = agg.session();
        assert_eq!(session.bytes_downloaded, 140);
        assert_eq!(session.retired_bytes, 140);
        assert_eq!(session.failed_task_count, 1);
        assert_eq!(session.completed_task_count, 1);
        assert!(agg.task(0).is_none());
    }

    #[test]
    fn stray_events_are_ignored() {
        let (mut agg, t0) = aggregator(1, 2);
        agg.on_progress_at(9, 10, t0);
        agg.on_start_at(9, 10, t0);
        agg.on_end_at(9, t0);
        agg.on_init_at(0, 5, "out-of-range.ts", t0);
        agg.on_init_at(0, 0, "a.ts", t0);
        agg.on_init_at(1, 0, "b.ts", t0);
        agg.on_start_at(0, 10, t0);
        agg.on_start_at(0, 99, t0);

        assert_eq!(agg.session().bytes_downloaded, 0);
        assert_eq!(agg.session().cumulative_task_bytes, 10);
        assert_eq!(agg.live_tasks().count(), 1);
        assert_eq!(agg.task(0).unwrap().total_bytes, Some(10));
    }

    #[test]
    fn apply_dispatches_every_variant() {
        let (mut agg, t0) = aggregator(1, 1);
        for event in [
            ProgressEvent::Init {
                task_id: 0,
                slot: 0,
                filename: "a.ts".into(),
            },
            ProgressEvent::Start {
                task_id: 0,
                total_bytes: 8,
            },
            ProgressEvent::Progress {
                task_id: 0,
                chunk_len: 8,
            },
            ProgressEvent::End { task_id: 0 },
        ] {
            agg.apply_at(event, t0 + Duration::from_secs(1));
        }
        let summary = agg.summary(t0 + Duration::from_secs(2));
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.bytes_downloaded, 8);
        assert_eq!(summary.estimated_total_bytes, Some(8));
        assert_eq!(summary.elapsed, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_drains_until_senders_drop() {
        let (snap_tx, snap_rx) = watch::channel(Snapshot::idle(1, 1));
        let agg = Aggregator::new(1, 1, snap_tx);
        let (tx, rx) = event::channel();
        let handle = tokio::spawn(agg.run(rx));

        tx.send(ProgressEvent::Init {
            task_id: 0,
            slot: 0,
            filename: "a.ts".into(),
        })
        .unwrap();
        tx.send(ProgressEvent::Progress {
            task_id: 0,
            chunk_len: 3,
        })
        .unwrap();
        tx.send(ProgressEvent::Failed {
            task_id: 0,
            reason: "eof".into(),
        })
        .unwrap();
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes_downloaded, 3);
        assert_eq!(snap_rx.borrow().header.bytes_downloaded, 3);
        assert_eq!(snap_rx.borrow().rows[0], RowView::Idle);
    }
}
