use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};
use crate::input::ListFormat;

#[derive(Debug, Parser, Clone)]
#[command(name = "segget", version, about = "Download HLS/VOD segments in parallel with a per-worker TUI")]
pub struct Cli {
    /// File listing the segment URLs (see --list-format)
    pub list: PathBuf,

    /// Number of segments downloaded at once
    #[arg(short = 'w', long = "workers", default_value_t = 5)]
    pub workers: usize,

    /// Directory the segments are written to
    #[arg(short = 'd', long = "dir", default_value = ".")]
    pub dir: PathBuf,

    /// Format of the segment list file
    #[arg(long = "list-format", value_enum, default_value_t = ListFormat::Plain)]
    pub list_format: ListFormat,

    /// Only download the first N segments of the list
    #[arg(long = "limit")]
    pub limit: Option<usize>,

    /// Disable the TUI and print a single status line on stderr instead
    #[arg(long = "noui")]
    pub noui: bool,

    /// Log file (the terminal belongs to the TUI). RUST_LOG sets the filter.
    #[arg(long = "log-file", default_value = "segget.log")]
    pub log_file: PathBuf,
}

/// Settings a session actually runs with, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub workers: usize,
    pub output_dir: PathBuf,
    pub list_format: ListFormat,
    pub limit: Option<usize>,
    pub use_tui: bool,
}

impl SessionConfig {
    /// `interactive` is whether stdout is a terminal; without one the TUI is skipped.
    pub fn from_cli(cli: &Cli, interactive: bool) -> Result<Self> {
        if cli.workers == 0 {
            return Err(Error::InvalidWorkerBudget);
        }
        Ok(Self {
            workers: cli.workers,
            output_dir: cli.dir.clone(),
            list_format: cli.list_format,
            limit: cli.limit,
            use_tui: interactive && !cli.noui,
        })
    }
}
