//! # ember-probe
//!
//! Connects to every configured audio node, logs connection lifecycle
//! events, and periodically reports each node's load until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ember_client::{Router, RouterEvent, ShardTransport};
use ember_core::logging::{init_json_subscriber, init_subscriber};
use ember_settings::{load_settings_from_path, settings_path};
use serde_json::Value;
use tracing::{error, info, warn};

/// Audio node probe.
#[derive(Parser, Debug)]
#[command(name = "ember-probe", about = "Connect to audio nodes and log their lifecycle and load")]
struct Cli {
    /// Settings file (defaults to `$EMBER_SETTINGS` or `~/.ember/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,

    /// Seconds between load reports.
    #[arg(long, default_value = "30")]
    stats_interval: u64,
}

/// The probe has no chat gateway; voice state updates are only logged.
struct LogTransport;

impl ShardTransport for LogTransport {
    fn send(&self, shard: u64, op: u8, data: Value) -> ember_core::Result<()> {
        info!(shard, op, %data, "gateway payload (not sent)");
        Ok(())
    }
}

fn log_event(event: &RouterEvent) {
    match event {
        RouterEvent::NodeReady { host } => info!(%host, "node ready"),
        RouterEvent::NodeReconnecting { host } => warn!(%host, "node reconnecting"),
        RouterEvent::NodeDisconnected { host, code, reason } => {
            warn!(%host, code, %reason, "node disconnected");
        }
        RouterEvent::NodeError { host, error } if error.is_transient() => {
            warn!(%host, %error, "node error");
        }
        RouterEvent::NodeError { host, error } => error!(%host, %error, "node error"),
    }
}

fn report_stats(router: &Router) {
    for node in router.nodes() {
        let stats = node.stats();
        let system_load = stats.cpu.map_or(0.0, |cpu| cpu.system_load);
        info!(
            host = node.host(),
            state = %node.state(),
            players = stats.players,
            playing = stats.playing_players,
            uptime_ms = stats.uptime,
            system_load,
            penalty = node.penalty(),
            dropped_frames = node.dropped_frames(),
            "node load"
        );
    }
    if let Some(ideal) = router.ideal_node() {
        info!(host = ideal.host(), "least loaded node");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    if args.json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }

    settings.validate().context("Invalid settings")?;
    if settings.nodes.is_empty() {
        anyhow::bail!("No nodes configured in {}", path.display());
    }

    let mut router = Router::new(Arc::new(LogTransport));
    let count = router
        .register_configured_nodes(&settings)
        .context("Failed to register nodes")?;
    info!(count, user_id = %settings.user_id, shards = settings.num_shards, "probing nodes");

    let mut stats_tick = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for shutdown signal")?;
                info!("shutdown signal received");
                break;
            }
            Some(event) = router.next_event() => log_event(&event),
            _ = stats_tick.tick() => report_stats(&router),
        }
    }

    router.shutdown();
    Ok(())
}
