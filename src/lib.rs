//! Bounded concurrent segment downloader with a live per-worker progress view.
//!
//! A session takes a flat list of `(source, target)` pairs, runs at most `W`
//! fetchers at a time, folds their progress events into a single-writer model
//! and hands immutable snapshots to the renderer.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod format;
pub mod input;
pub mod logging;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod slots;
pub mod ui;

pub use error::{Error, Result};
pub use progress::{Slot, TaskId};
