//! route-guard - route deviation monitoring for assisted walkers
//!
//! Watches each walker's location stream against the buffer polygons of their
//! registered routes, alerts caregivers on a confirmed excursion and guides
//! the walker back.
//!
//! Module structure:
//! - `domain/` - Core types (samples, routes, buffers, events, errors)
//! - `geometry/` - Projection, buffering, point-in-polygon, nearest point
//! - `io/` - External interfaces (MQTT, event log, buffer store, Prometheus)
//! - `services/` - Engine logic (Tracker, sessions, state machine, guidance)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use route_guard::infra::{Config, Metrics};
use route_guard::io::{
    create_egress_channel, run_event_log, EventLog, FileBufferStore, MqttPublisher,
};
use route_guard::services::Tracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Route deviation engine
#[derive(Parser, Debug)]
#[command(name = "route-guard", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "route-guard starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        topic_prefix = %config.mqtt_topic_prefix(),
        confirmation_delay_ms = %config.confirmation_delay_ms(),
        alarm_interval_ms = %config.alarm_interval_ms(),
        direction_interval_ms = %config.direction_interval_ms(),
        default_radius_m = %config.default_radius_m(),
        buffer_store = %config.buffer_store_dir(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    std::fs::create_dir_all(config.buffer_store_dir())
        .with_context(|| format!("create buffer store dir {}", config.buffer_store_dir()))?;
    let store = Arc::new(FileBufferStore::new(config.buffer_store_dir()));

    // Egress: every message goes to the event log, and to MQTT when enabled
    let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
    let event_log = EventLog::new(config.egress_file());
    if config.mqtt_egress_enabled() {
        let publisher = MqttPublisher::new(&config, egress_rx).with_event_log(event_log);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs().max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });
    } else {
        tokio::spawn(run_event_log(event_log, egress_rx, shutdown_rx.clone()));
    }

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = route_guard::io::mqtt::start_mqtt_client(
            &mqtt_config,
            event_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %format!("{:#}", e), "mqtt_client_error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = route_guard::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %format!("{:#}", e), "prometheus_server_error");
            }
        });
    }

    // Periodic metrics summary log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let notifier = Arc::new(egress_sender.clone());
    let presenter = Arc::new(egress_sender);
    let mut tracker = Tracker::new(config.engine_settings(), store, notifier, presenter, metrics);
    info!("tracker_started");

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Runs until the MQTT client stops and drops the event sender
    tracker.run(event_rx).await;

    info!("route-guard shutdown complete");
    Ok(())
}
