use tokio::sync::mpsc;

use crate::progress::{Slot, TaskId};

/// Lifecycle report from one fetcher. Per task the order is always
/// `Init`, optional `Start`, any number of `Progress`, then `End` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Init {
        task_id: TaskId,
        slot: Slot,
        filename: String,
    },
    /// Declared body size. Not sent when the response has no usable `Content-Length`.
    Start { task_id: TaskId, total_bytes: u64 },
    /// Length of one written chunk (a delta, not a running total).
    Progress { task_id: TaskId, chunk_len: u64 },
    End { task_id: TaskId },
    Failed { task_id: TaskId, reason: String },
}

impl ProgressEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            ProgressEvent::Init { task_id, .. }
            | ProgressEvent::Start { task_id, .. }
            | ProgressEvent::Progress { task_id, .. }
            | ProgressEvent::End { task_id }
            | ProgressEvent::Failed { task_id, .. } => *task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::End { .. } | ProgressEvent::Failed { .. })
    }
}

/// Unbounded so a slow consumer never stalls a fetcher's read loop.
pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
