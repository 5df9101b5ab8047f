//! Offline replay of recorded walker traffic
//!
//! Feeds a JSONL capture through the engine and writes every status change,
//! guidance update and cue to a JSONL event log. Each input line holds one
//! MQTT message as it arrived:
//!
//! ```text
//! {"topic": "walkers/p1/route", "payload": {"route_id": "r1", "points": [...]}}
//! {"topic": "walkers/p1/location", "payload": {"latitude": 37.5, "longitude": 127.0, "timestamp": 1000}}
//! ```
//!
//! Confirmation follows the sample timestamps, so a recorded excursion
//! confirms as soon as a sample lies the configured delay past its start.
//! Buffers are kept in memory.
//!
//! Usage:
//!   cargo run --bin route-replay -- --input capture.jsonl --output replay.jsonl

use anyhow::Context;
use clap::Parser;
use route_guard::infra::{Config, Metrics};
use route_guard::io::mqtt::parse_message;
use route_guard::io::{create_egress_channel, run_event_log, EventLog, MemoryBufferStore};
use route_guard::services::{NullPresenter, Presenter, Tracker};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "route-replay", version, about = "Replay a JSONL capture through the engine")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL capture to replay
    #[arg(short, long)]
    input: String,

    /// JSONL event log to write
    #[arg(short, long, default_value = "replay.jsonl")]
    output: String,

    /// Wall time to let timers and notifications settle after the last line
    #[arg(long, default_value = "200")]
    settle_ms: u64,

    /// Log status changes only, dropping guidance and cues
    #[arg(long)]
    status_only: bool,
}

#[derive(Debug, Deserialize)]
struct CaptureLine {
    topic: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(
        args.config.unwrap_or_else(|| Config::resolve_config_path(&[])),
    );
    let prefix = config.mqtt_topic_prefix().trim_end_matches('/').to_string();

    let file = std::fs::File::open(&args.input)
        .with_context(|| format!("open capture {}", args.input))?;

    let metrics = Arc::new(Metrics::new());
    let (egress_sender, egress_rx) = create_egress_channel(10_000, config.site_id().to_string());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let log_task = tokio::spawn(run_event_log(EventLog::new(&args.output), egress_rx, shutdown_rx));

    // The whole capture may queue up behind one session.
    let mut settings = config.engine_settings();
    settings.session_queue = settings.session_queue.max(100_000);
    // Recorded time runs faster than wall time; only sample timestamps confirm.
    settings.wall_clock_confirmation = false;

    let presenter: Arc<dyn Presenter> = if args.status_only {
        Arc::new(NullPresenter)
    } else {
        Arc::new(egress_sender.clone())
    };
    let mut tracker = Tracker::new(
        settings,
        Arc::new(MemoryBufferStore::new()),
        Arc::new(egress_sender),
        presenter,
        metrics.clone(),
    );

    let mut replayed = 0usize;
    let mut rejected = 0usize;
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read capture line {}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str::<CaptureLine>(&line)
            .context("invalid capture line")
            .and_then(|c| {
                let payload = serde_json::to_vec(&c.payload)?;
                parse_message(&prefix, &c.topic, &payload)
            });
        match event {
            Ok(event) => {
                tracker.process_event(event).await;
                replayed += 1;
            }
            Err(e) => {
                rejected += 1;
                warn!(line = %(lineno + 1), error = %format!("{:#}", e), "capture_line_rejected");
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    drop(tracker);
    let _ = shutdown_tx.send(true);
    log_task.await.context("event log task")?;

    let summary = metrics.report();
    info!(replayed = %replayed, rejected = %rejected, output = %args.output, "replay_complete");
    summary.log();
    println!(
        "replayed {replayed} messages ({rejected} rejected): {} confirmed, {} returns -> {}",
        summary.excursions_confirmed, summary.returns_total, args.output
    );
    Ok(())
}
