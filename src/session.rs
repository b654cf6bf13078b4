use tokio::sync::watch;

use crate::aggregator::{Aggregator, SessionSummary};
use crate::error::Result;
use crate::event;
use crate::fetch;
use crate::progress::Snapshot;
use crate::scheduler::{ScheduleReport, SegmentJob, Scheduler};

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub summary: SessionSummary,
    pub report: ScheduleReport,
}

/// Downloads every job over `client` with at most `workers` segments in flight,
/// publishing progress on `snapshots` as it goes.
///
/// Resolves once every job is terminal and every event has been folded in.
/// Dropping the future aborts the in-flight fetchers.
pub async fn download_all(
    client: reqwest::Client,
    jobs: Vec<SegmentJob>,
    workers: usize,
    snapshots: watch::Sender<Snapshot>,
) -> Result<SessionOutcome> {
    let scheduler = Scheduler::new(workers)?;
    let aggregator = Aggregator::new(workers, jobs.len(), snapshots);
    let (tx, rx) = event::channel();

    // The aggregator stops when the scheduler and its last fetcher drop their senders.
    let (report, summary) = tokio::join!(
        scheduler.run(jobs, tx, move |job, slot, events| {
            fetch::run(client.clone(), job, slot, events)
        }),
        aggregator.run(rx),
    );

    Ok(SessionOutcome { summary, report })
}
