//! Periodic peer refresh.
//!
//! Every minute the metronome probes each known peer's `/` endpoint,
//! rescores it from the score it reports, and lets the registry trim
//! peers beyond tolerance. When the cluster advertises a newer version
//! the node shuts itself down for redeployment, unless `never-reboot`
//! is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use zold_core::txn::iso8601;
use zold_farm::Score;

use crate::error::NodeError;
use crate::node::NodeContext;

/// Seconds between ticks.
pub const PERIOD: Duration = Duration::from_secs(60);

/// Observable state served by `/metronome`.
#[derive(Clone, Debug, Default)]
pub struct MetronomeStatus {
    pub ticks: u64,
    pub failures: u64,
    pub last: Option<DateTime<Utc>>,
}

impl MetronomeStatus {
    pub fn to_text(&self) -> String {
        format!(
            "ticks: {}\nfailures: {}\nlast: {}\n",
            self.ticks,
            self.failures,
            self.last.as_ref().map_or_else(|| "never".to_string(), iso8601),
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ticks": self.ticks,
            "failures": self.failures,
            "last": self.last.as_ref().map(iso8601),
        })
    }
}

/// Launch the metronome at the default [`PERIOD`].
pub fn spawn(ctx: Arc<NodeContext>) -> tokio::task::JoinHandle<()> {
    spawn_with_period(ctx, PERIOD)
}

/// Launch the metronome with an explicit period.
pub fn spawn_with_period(
    ctx: Arc<NodeContext>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if ctx.shutdown_requested() {
                break;
            }
            tick(&ctx).await;
        }
        debug!("metronome stopped");
    })
}

/// One refresh pass over all known peers.
pub async fn tick(ctx: &NodeContext) {
    let newer: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let failed = ctx
        .remotes
        .iterate(&ctx.farm, &ctx.cfg.network, |remote| {
            let remotes = ctx.remotes.clone();
            let newer = newer.clone();
            async move {
                let response = remote.get("/").await?;
                if !response.status().is_success() {
                    return Err(NodeError::Peer {
                        host: remote.host.clone(),
                        port: remote.port,
                        reason: format!("status {}", response.status()),
                    });
                }
                let status: serde_json::Value = response.json().await?;
                if let Some(text) = status["score"].as_str() {
                    if let Ok(score) = text.parse::<Score>() {
                        if score.valid() && !score.expired() {
                            remotes.rescore(&remote.host, remote.port, score.value() as u64);
                        }
                    }
                }
                if let Some(version) = status["version"].as_str() {
                    if version_newer(env!("CARGO_PKG_VERSION"), version) {
                        *newer.lock() = Some(version.to_string());
                    }
                }
                Ok(())
            }
        })
        .await;
    {
        let mut status = ctx.metronome.lock();
        status.ticks += 1;
        status.failures += failed as u64;
        status.last = Some(Utc::now());
    }
    let newer = newer.lock().take();
    if let Some(version) = newer {
        if ctx.cfg.never_reboot {
            debug!(version, "newer version advertised, reboot disabled");
        } else {
            info!(version, "newer version advertised cluster-wide, shutting down");
            ctx.request_shutdown();
        }
    }
}

/// True if `remote` is a strictly newer dotted version than `own`.
fn version_newer(own: &str, remote: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    parse(remote) > parse(own)
}
