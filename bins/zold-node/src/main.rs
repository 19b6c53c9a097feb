//! Zold node binary.
//!
//! Starts the proof-of-work farm, the metronome, and the HTTP front, and
//! runs until SIGINT or a matched `?halt=` request shuts it down.

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use tracing::info;

use zold_core::constants::NETWORK;
use zold_core::wallet::{parse_invoice, valid_network};
use zold_farm::score::STRENGTH;
use zold_node_lib::config::DEFAULT_PORT;
use zold_node_lib::{NodeConfig, NodeContext, front, metronome};

/// Zold network node.
#[derive(Parser, Debug)]
#[command(
    name = "zold-node",
    version,
    about = "Zold node with HTTP front and proof-of-work farm"
)]
struct Args {
    /// The score invoice (prefix@id) mining rewards accrue to.
    #[arg(long)]
    invoice: String,

    /// Advertised host name.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Advertised TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// TCP port to bind the HTTP front to (defaults to --port).
    #[arg(long)]
    bind_port: Option<u16>,

    /// Persistent-state root directory.
    #[arg(long)]
    home: Option<PathBuf>,

    /// Farm worker count; zero disables mining.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Required proof-of-work strength.
    #[arg(long, default_value_t = STRENGTH)]
    strength: u32,

    /// Network name.
    #[arg(long, default_value = NETWORK)]
    network: String,

    /// Run without any remotes (empty, immutable registry).
    #[arg(long)]
    standalone: bool,

    /// Accept peer scores below the required strength.
    #[arg(long)]
    ignore_score_weakness: bool,

    /// Never shut down when the cluster advertises a newer version.
    #[arg(long)]
    never_reboot: bool,

    /// Secret accepted by the ?halt= shutdown parameter.
    #[arg(long)]
    halt_code: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json").
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> Result<(NodeConfig, String, String)> {
        parse_invoice(&self.invoice)
            .with_context(|| format!("invalid invoice {:?}", self.invoice))?;
        ensure!(
            valid_network(&self.network),
            "invalid network name {:?}",
            self.network
        );
        let home = self.home.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("zold")
        });
        let config = NodeConfig {
            invoice: self.invoice,
            host: self.host,
            port: self.port,
            bind_port: self.bind_port.unwrap_or(self.port),
            home,
            threads: self.threads,
            strength: self.strength,
            network: self.network,
            standalone: self.standalone,
            ignore_score_weakness: self.ignore_score_weakness,
            never_reboot: self.never_reboot,
            halt_code: self.halt_code,
        };
        Ok((config, self.log_level, self.log_format))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, log_level, log_format) = args.into_config()?;
    init_logging(&log_level, &log_format);

    info!("zold-node v{}", env!("CARGO_PKG_VERSION"));
    info!("invoice: {}", config.invoice);
    info!("network: {}", config.network);
    info!("home: {}", config.home.display());
    info!("endpoint: {}:{}", config.host, config.port);

    let ctx = NodeContext::open(config.clone()).context("failed to open node home")?;

    ctx.farm
        .start(&config.host, config.port, config.threads, config.strength)
        .context("failed to start the farm")?;
    info!(
        "farm started with {} thread(s) at strength {}",
        config.threads, config.strength
    );

    let ticker = metronome::spawn(ctx.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr()))?;
    info!("listening on http://{}", config.bind_addr());

    let shutdown_ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received SIGINT, shutting down");
        shutdown_ctx.request_shutdown();
    });

    front::serve(ctx.clone(), listener)
        .await
        .context("HTTP front error")?;

    ticker.abort();
    ctx.farm.stop();
    info!("node shutdown complete");
    Ok(())
}

/// Initialize tracing with the given log level and output format.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
