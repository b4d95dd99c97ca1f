//! Retention daemon: records user activity and reports cohort retention.
//!
//! `run` hosts the recurring jobs over NDJSON activity read from stdin until
//! interrupted. `replay` drives a recorded log through a manual clock and
//! prints the resulting stats payload.

mod replay;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use replay::{InputLine, Replay};
use retention_agents::{PipelineManager, RetentionPipeline};
use retention_core::clock::system_clock;
use retention_core::config::AppConfig;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use retention_cache::LocalRegistrationStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "retention-daemon")]
#[command(about = "User activity tracking and 30-day retention reporting")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "RETENTION_CONFIG")]
    config: Option<PathBuf>,

    /// Node identifier (overrides config)
    #[arg(long)]
    node_id: Option<String>,

    /// Batch flush interval in milliseconds (overrides config)
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Daily visit deriver interval in milliseconds (overrides config)
    #[arg(long)]
    deriver_interval_ms: Option<u64>,

    /// Stats report interval in seconds (overrides config)
    #[arg(long)]
    stats_interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the recurring jobs over activity read from stdin
    Run,

    /// Replay an NDJSON activity log and print the stats payload
    Replay {
        /// Input file, one `register` or `activity` object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Report as of this instant (RFC 3339), defaults to the last event
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "retention_daemon=info,retention_agents=info,retention_analytics=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(ms) = cli.flush_interval_ms {
        config.batch.flush_interval_ms = ms;
    }
    if let Some(ms) = cli.deriver_interval_ms {
        config.deriver.interval_ms = ms;
    }
    if let Some(secs) = cli.stats_interval_secs {
        config.stats.interval_secs = secs;
    }
    config.validate().context("validating overrides")?;

    info!(
        node_id = %config.node_id,
        flush_interval_ms = config.batch.flush_interval_ms,
        deriver_interval_ms = config.deriver.interval_ms,
        stats_enabled = config.stats.enabled,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Replay { input, at } => replay_log(&config, &input, at),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let (pipeline, registrations) = RetentionPipeline::in_memory(&config, system_clock());
    let pipeline = Arc::new(pipeline);
    let mut manager = PipelineManager::new(config, pipeline.clone());
    manager.start();

    info!("Retention daemon is ready, reading activity from stdin");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = ingest(stdin, &pipeline, &registrations) => {}
    }

    manager.stop().await;
    let stats = pipeline.collect_stats()?;
    println!("{}", serde_json::to_string(&stats.to_payload())?);
    Ok(())
}

/// Feed NDJSON lines into the pipeline until the input ends or fails to read.
/// Read errors end ingestion rather than the process so shutdown still runs.
async fn ingest<R>(reader: R, pipeline: &RetentionPipeline, registrations: &LocalRegistrationStore)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input closed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read input, shutting down");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InputLine>(&line) {
            Ok(InputLine::Register(registration)) => registrations.register(registration),
            Ok(InputLine::Activity(event)) => pipeline.record_activity(
                &event.user_id,
                event.device_id.as_deref(),
                &event.ip,
                event.user_agent.as_deref(),
                event.timestamp,
            ),
            Err(e) => warn!(error = %e, "Skipping malformed input line"),
        }
    }
}

fn replay_log(config: &AppConfig, input: &Path, at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let file = std::fs::File::open(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let mut lines = Vec::new();
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputLine = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", input.display(), n + 1))?;
        lines.push(parsed);
    }

    let start = lines
        .iter()
        .filter_map(|line| match line {
            InputLine::Activity(event) => Some(event.timestamp),
            InputLine::Register(_) => None,
        })
        .min()
        .or(at)
        .unwrap_or_else(Utc::now);

    let mut replay = Replay::new(config, start)?;
    let count = lines.len();
    for line in lines {
        replay.apply(line)?;
    }
    let stats = replay.finish(at)?;
    info!(lines = count, "Replay complete");

    println!("{}", serde_json::to_string_pretty(&stats.to_payload())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use retention_core::ManualClock;
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Yields `data`, then fails every further read.
    struct BrokenPipe {
        data: Vec<u8>,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "stdin went away",
                )));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data.drain(..n);
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_error_ends_ingestion_and_stop_flushes() {
        let config = AppConfig::default();
        let start = Utc::now();
        let (pipeline, registrations) =
            RetentionPipeline::in_memory(&config, Arc::new(ManualClock::new(start)));
        let pipeline = Arc::new(pipeline);
        let mut manager = PipelineManager::new(config, pipeline.clone());
        manager.start();

        let line = format!(
            "{{\"type\":\"activity\",\"user_id\":\"@a:hs\",\"device_id\":\"D\",\"ip\":\"192.0.2.1\",\"user_agent\":null,\"timestamp\":\"{}\"}}\nnot json\n",
            start.to_rfc3339()
        );
        let reader = tokio::io::BufReader::new(BrokenPipe {
            data: line.into_bytes(),
        });
        ingest(reader, &pipeline, &registrations).await;
        assert_eq!(pipeline.writer().pending_len(), 1);

        manager.stop().await;
        assert!(pipeline.writer().is_idle());
        assert_eq!(pipeline.collect_stats().unwrap().daily_active_users, 1);
    }
}
