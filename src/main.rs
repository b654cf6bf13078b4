use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use segget::config::{Cli, SessionConfig};
use segget::format::human_bytes;
use segget::input::{build_pairs, parse_segment_list};
use segget::progress::Snapshot;
use segget::scheduler::plan_jobs;
use segget::session::{download_all, SessionOutcome};
use segget::{logging, ui};

/// Resolves on SIGINT, SIGTERM or SIGHUP. A handler that can't be installed
/// is skipped; Ctrl-C is always watched.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    #[cfg(unix)]
    {
        let mut term = signal(SignalKind::terminate())
            .map_err(|e| warn!("no SIGTERM handler: {e}"))
            .ok();
        let mut hup = signal(SignalKind::hangup())
            .map_err(|e| warn!("no SIGHUP handler: {e}"))
            .ok();
        tokio::select! {
            _ = &mut ctrl_c => {},
            Some(_) = async { term.as_mut()?.recv().await } => {},
            Some(_) = async { hup.as_mut()?.recv().await } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

enum Ending {
    Finished(SessionOutcome),
    Interrupted(&'static str),
    Failed(anyhow::Error),
}

fn init_logging(cli: &Cli, cfg: &SessionConfig) {
    if let Err(err) = logging::init_logging(&cli.log_file) {
        if cfg.use_tui {
            // stderr is hidden behind the alternate screen; run without logs.
            eprintln!(
                "warning: logging disabled, cannot open {}: {err}",
                cli.log_file.display()
            );
        } else {
            logging::init_logging_stderr();
            warn!("cannot open {}: {err}; logging to stderr", cli.log_file.display());
        }
    }
}

async fn create_parent_dirs(dir: &Path, targets: &[std::path::PathBuf]) -> Result<()> {
    let mut dirs: BTreeSet<&Path> = BTreeSet::new();
    dirs.insert(dir);
    dirs.extend(targets.iter().filter_map(|t| t.parent()));
    for d in dirs.into_iter().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(d)
            .await
            .with_context(|| format!("failed to create directory {}", d.display()))?;
    }
    Ok(())
}

fn spawn_renderer(
    use_tui: bool,
    snapshots: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
) -> JoinHandle<segget::Result<()>> {
    if use_tui {
        tokio::spawn(ui::run_tui(snapshots, cancel))
    } else {
        tokio::spawn(async move {
            ui::run_lines(snapshots, cancel).await;
            Ok(())
        })
    }
}

fn print_summary(outcome: &SessionOutcome) {
    let summary = &outcome.summary;
    let secs = summary.elapsed.as_secs_f64().max(0.001);
    let mut out = format!(
        "summary: done {}/{}  failed {}  downloaded {}  time {:.2}s  avg_speed {}/s\n",
        summary.completed,
        summary.task_count,
        summary.failed,
        human_bytes(summary.bytes_downloaded as f64),
        secs,
        human_bytes(summary.bytes_downloaded as f64 / secs),
    );
    if !outcome.report.failed.is_empty() {
        out.push_str(&format!("failed segments ({}):\n", outcome.report.failed.len()));
        for f in &outcome.report.failed {
            out.push_str(&format!("- #{} {}\n  {}\n", f.task_id, f.source, f.reason));
        }
    }
    eprint!("{out}");
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = SessionConfig::from_cli(&cli, std::io::stdout().is_terminal())?;
    init_logging(&cli, &cfg);

    let text = tokio::fs::read_to_string(&cli.list)
        .await
        .with_context(|| format!("failed to read segment list {}", cli.list.display()))?;
    let mut entries = parse_segment_list(&text, cfg.list_format).with_context(|| {
        format!(
            "failed parsing segment list {} as {:?}",
            cli.list.display(),
            cfg.list_format
        )
    })?;
    if let Some(limit) = cfg.limit {
        entries.truncate(limit);
    }
    if entries.is_empty() {
        bail!("--limit leaves no segments to download");
    }

    let (sources, targets) = build_pairs(entries, &cfg.output_dir)?;
    create_parent_dirs(&cfg.output_dir, &targets).await?;
    let jobs = plan_jobs(sources, targets)?;
    let task_count = jobs.len();

    let client = reqwest::Client::builder()
        .user_agent(concat!("segget/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(cfg.workers)
        .build()
        .context("failed to build HTTP client")?;

    let (snap_tx, snap_rx) = watch::channel(Snapshot::idle(cfg.workers, task_count));
    let cancel = CancellationToken::new();
    let mut renderer = spawn_renderer(cfg.use_tui, snap_rx, cancel.clone());
    let keys = cfg.use_tui.then(|| ui::spawn_key_listener(cancel.clone()));
    if !cfg.use_tui {
        eprintln!(
            "{task_count} segments, {} workers, saving into {}",
            cfg.workers,
            cfg.output_dir.display()
        );
    }

    let mut renderer_done = false;
    let ending = {
        let session = download_all(client, jobs, cfg.workers, snap_tx);
        tokio::pin!(session);
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ending::Interrupted("quit requested"),
            _ = &mut shutdown => Ending::Interrupted("interrupted by signal"),
            joined = &mut renderer => {
                renderer_done = true;
                match joined {
                    Ok(Ok(())) => Ending::Interrupted("quit requested"),
                    Ok(Err(err)) => Ending::Failed(anyhow::Error::new(err).context("terminal UI failed")),
                    Err(err) => Ending::Failed(anyhow!("renderer task failed: {err}")),
                }
            }
            outcome = &mut session => match outcome {
                Ok(outcome) => Ending::Finished(outcome),
                Err(err) => Ending::Failed(err.into()),
            },
        }
    };

    // In-flight fetchers are gone by now; take the terminal back.
    cancel.cancel();
    if !renderer_done {
        match renderer.await {
            Ok(Err(err)) => warn!("renderer: {err}"),
            Err(err) => warn!("renderer task failed: {err}"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(keys) = keys {
        let _ = keys.await;
    }

    match ending {
        Ending::Finished(outcome) => {
            print_summary(&outcome);
            let failed = outcome.report.failed.len();
            if failed > 0 {
                bail!("{failed} of {task_count} segments failed");
            }
            info!("all {task_count} segments saved");
            Ok(())
        }
        Ending::Interrupted(why) => {
            warn!("session cancelled: {why}");
            Err(anyhow!("{why}; partial segments were left on disk"))
        }
        Ending::Failed(err) => Err(err),
    }
}
