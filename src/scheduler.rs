//! Maps the flat segment list onto a bounded set of worker slots.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{EventSender, ProgressEvent};
use crate::fetch::FetchError;
use crate::progress::{Slot, TaskId};
use crate::slots::SlotPool;

/// One `(source, target)` pair with its position in the input list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    pub task_id: TaskId,
    pub source: String,
    pub target: PathBuf,
}

impl SegmentJob {
    /// Basename of the target, for display only.
    pub fn display_name(&self) -> String {
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target.display().to_string())
    }
}

/// Pairs sources with targets by position. Fails before anything is
/// scheduled when the two lists differ in length.
pub fn plan_jobs<S, T>(sources: Vec<S>, targets: Vec<T>) -> Result<Vec<SegmentJob>>
where
    S: Into<String>,
    T: Into<PathBuf>,
{
    if sources.len() != targets.len() {
        return Err(Error::LengthMismatch {
            sources: sources.len(),
            targets: targets.len(),
        });
    }
    Ok(sources
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(task_id, (source, target))| SegmentJob {
            task_id,
            source: source.into(),
            target: target.into(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSegment {
    pub task_id: TaskId,
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub completed: usize,
    pub completed_bytes: u64,
    pub failed: Vec<FailedSegment>,
    /// Highest number of fetchers that were running at once.
    pub peak_active: usize,
}

struct Finished {
    task_id: TaskId,
    slot: Slot,
    source: String,
    result: std::result::Result<u64, FetchError>,
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    workers: usize,
}

impl Scheduler {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidWorkerBudget);
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job through `fetch`, at most `workers` at a time, in input
    /// order. A finished fetcher's slot goes straight to the next pending job.
    /// Failed jobs are reported, never retried.
    pub async fn run<F, Fut>(
        &self,
        jobs: Vec<SegmentJob>,
        events: EventSender,
        fetch: F,
    ) -> ScheduleReport
    where
        F: Fn(SegmentJob, Slot, EventSender) -> Fut,
        Fut: Future<Output = std::result::Result<u64, FetchError>> + Send + 'static,
    {
        let mut pending: VecDeque<SegmentJob> = jobs.into();
        let mut slots = SlotPool::new(self.workers);
        let mut active: JoinSet<Finished> = JoinSet::new();
        let mut report = ScheduleReport::default();
        info!(segments = pending.len(), workers = self.workers, "session started");

        loop {
            while !pending.is_empty() {
                let Some(slot) = slots.acquire() else { break };
                let Some(job) = pending.pop_front() else {
                    slots.release(slot);
                    break;
                };
                let task_id = job.task_id;
                let source = job.source.clone();
                debug!(task_id, slot, "starting segment");
                let fut = fetch(job, slot, events.clone());
                active.spawn(async move {
                    let result = AssertUnwindSafe(fut)
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(FetchError::Panicked));
                    Finished {
                        task_id,
                        slot,
                        source,
                        result,
                    }
                });
                report.peak_active = report.peak_active.max(active.len());
            }

            let Some(joined) = active.join_next().await else { break };
            let finished = match joined {
                Ok(finished) => finished,
                Err(err) => {
                    warn!("fetcher task was aborted: {err}");
                    continue;
                }
            };
            slots.release(finished.slot);

            match finished.result {
                Ok(bytes) => {
                    report.completed += 1;
                    report.completed_bytes += bytes;
                }
                Err(err) => {
                    if matches!(err, FetchError::Panicked) {
                        // The fetcher never got to report its own end.
                        let _ = events.send(ProgressEvent::Failed {
                            task_id: finished.task_id,
                            reason: err.to_string(),
                        });
                    }
                    report.failed.push(FailedSegment {
                        task_id: finished.task_id,
                        source: finished.source,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed.len(),
            "all segments finished"
        );
        report
    }
}
