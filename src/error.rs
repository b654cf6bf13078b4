use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Session-level failures. Per-segment transport problems live in
/// [`crate::fetch::FetchError`] and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("got {sources} sources but {targets} targets")]
    LengthMismatch { sources: usize, targets: usize },

    #[error("worker budget must be at least 1")]
    InvalidWorkerBudget,

    #[error("invalid segment list: {0}")]
    InvalidSegmentList(String),

    #[error("invalid target path: {0}")]
    InvalidTarget(String),

    /// Terminal could not be put into (or restored from) TUI mode.
    #[error("terminal ui: {0}")]
    Ui(#[source] io::Error),
}
