//! vigil-archive: main entry point

use anyhow::{ensure, Context};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use vigil_archive::archive::Archive;
use vigil_archive::cli::{segment_window, Cli, Commands};
use vigil_archive::config::ArchiveConfig;
use vigil_archive::core::{CameraProfile, RecorderEvent};

const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration warnings go to stderr until the file appender is known.
    let bootstrap = fmt().with_writer(std::io::stderr).with_env_filter(env_filter()).finish();
    let mut config = tracing::subscriber::with_default(bootstrap, ArchiveConfig::from_env)
        .context("invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    if let Some(root) = cli.archive_root {
        config = config.with_archive_root(root);
    }

    if let Commands::Run {
        cameras,
        segment_seconds,
    } = cli.command
    {
        if let Some(secs) = segment_seconds {
            config.segment_seconds = secs;
        }
        let archive = Archive::open(config).context("failed to open archive")?;
        return record(archive, cameras).await;
    }

    let archive = Archive::open(config).context("failed to open archive")?;
    let result = execute(&archive, cli.command).await;
    archive.close().await;
    result
}

/// Log to stderr, plus a daily rolling file when `LOG_DIR` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env_filter();
    let stderr = fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "vigil-archive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(archive: &Archive, command: Commands) -> anyhow::Result<()> {
    if let Some(query) = command.candidate_query() {
        return print_json(&archive.candidates(query).await?);
    }

    match command {
        Commands::Status => print_json(&archive.status()?),
        Commands::Purge => print_json(&archive.purge().await),
        Commands::Pin { path } => {
            ensure!(archive.pin(&path).await?, "{} is not in the catalog", path.display());
            info!(path = %path.display(), "segment pinned");
            Ok(())
        }
        Commands::Unpin { path } => {
            ensure!(archive.unpin(&path).await?, "{} is not in the catalog", path.display());
            info!(path = %path.display(), "segment unpinned");
            Ok(())
        }
        Commands::Checkpoint => {
            archive.checkpoint().await?;
            info!("catalog checkpointed");
            Ok(())
        }
        Commands::Cameras => print_json(&archive.reader()?.list_cameras()?),
        Commands::Segments {
            camera_id,
            from,
            to,
        } => {
            let (from, to) = segment_window(from, to, Utc::now());
            ensure!(from < to, "--from must be before --to");
            print_json(&archive.reader()?.list_segments(camera_id, from, to)?)
        }
        Commands::Days { camera_id } => print_json(&archive.reader()?.list_days(camera_id)?),
        Commands::Recent { limit } => print_json(&archive.reader()?.list_recent_segments(limit)?),
        Commands::Resolve { id } => {
            println!("{}", archive.reader()?.resolve_segment_path(id)?.display());
            Ok(())
        }
        Commands::Run { .. } | Commands::Candidates { .. } => Ok(()),
    }
}

/// Feed recorder events from stdin into a recording session until EOF or
/// Ctrl-C, with the retention engine running alongside.
async fn record(archive: Archive, cameras: Vec<CameraProfile>) -> anyhow::Result<()> {
    if cameras.is_empty() {
        warn!("no --camera given, every recorder event will be ignored");
    }

    let shutdown = CancellationToken::new();
    let engine_task = Arc::clone(archive.engine()).spawn(shutdown.clone());
    let session = archive.start_recording(cameras);
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let session_task = session.spawn(rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, stopping");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read recorder events")? else {
                    info!("recorder event stream ended");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RecorderEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping malformed recorder event"),
                }
            }
        }
    }

    drop(tx);
    let applied = session_task.await?;
    shutdown.cancel();
    engine_task.await?;
    archive.close().await;
    info!(applied, "recording stopped");
    Ok(())
}
