//! Node-wide context.
//!
//! [`NodeContext`] owns every injected collaborator — wallets, remotes,
//! farm, entrance, metronome status — and is passed explicitly to route
//! handlers and background tasks. There are no process-global variables.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use zold_core::wallets::Wallets;
use zold_farm::{Farm, Score};

use crate::config::NodeConfig;
use crate::entrance::Entrance;
use crate::error::NodeError;
use crate::metronome::MetronomeStatus;
use crate::remotes::Remotes;

/// Everything a running node shares between its HTTP front, farm, and
/// background tasks.
pub struct NodeContext {
    pub cfg: NodeConfig,
    pub wallets: Wallets,
    pub remotes: Arc<Remotes>,
    pub farm: Farm,
    pub entrance: Entrance,
    pub metronome: Arc<Mutex<MetronomeStatus>>,
    started: Instant,
    shutdown: Notify,
    halted: AtomicBool,
}

impl NodeContext {
    /// Build the context over the persistent state under `cfg.home`,
    /// creating the directory layout as needed. The farm is not started.
    pub fn open(cfg: NodeConfig) -> Result<Arc<Self>, NodeError> {
        std::fs::create_dir_all(cfg.wallets_dir())?;
        std::fs::create_dir_all(cfg.copies_dir())?;
        let wallets = Wallets::new(cfg.wallets_dir());
        let remotes = Arc::new(if cfg.standalone {
            Remotes::standalone()
        } else {
            Remotes::new(cfg.remotes_path())
        });
        let farm = Farm::new(&cfg.invoice, cfg.farm_path());
        let entrance = Entrance::new(
            Wallets::new(cfg.wallets_dir()),
            cfg.copies_dir(),
            &cfg.network,
        );
        Ok(Arc::new(Self {
            wallets,
            remotes,
            farm,
            entrance,
            metronome: Arc::new(Mutex::new(MetronomeStatus::default())),
            started: Instant::now(),
            shutdown: Notify::new(),
            halted: AtomicBool::new(false),
            cfg,
        }))
    }

    /// The score this node presents: the farm head, or a fresh zero score
    /// if the farm has nothing yet.
    pub fn best_score(&self) -> Score {
        self.farm.best().into_iter().next().unwrap_or_else(|| {
            Score::new(
                Utc::now(),
                &self.cfg.host,
                self.cfg.port,
                &self.cfg.invoice,
                self.cfg.strength,
            )
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Ask every long-running task to wind down.
    pub fn request_shutdown(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.shutdown.notify_one();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait_shutdown(&self) {
        if self.shutdown_requested() {
            return;
        }
        self.shutdown.notified().await;
    }
}
