//! Server-side intake for pushed wallet bodies.
//!
//! A pushed body is stored as a copy, the copies are merged with the local
//! wallet, and — when the merge changed anything — every negative row is
//! propagated into the local wallet of its beneficiary as an unsigned
//! positive mirror.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use zold_core::constants::PROTOCOL;
use zold_core::copies::Copies;
use zold_core::error::WalletError;
use zold_core::id::Id;
use zold_core::patch::Patch;
use zold_core::wallet::WalletBody;
use zold_core::wallets::Wallets;

use crate::error::NodeError;

/// The origin of a pushed body: host, port, and score value of the
/// pushing remote.
#[derive(Clone, Debug)]
pub struct PushSource {
    pub host: String,
    pub port: u16,
    pub score: u64,
}

impl Default for PushSource {
    fn default() -> Self {
        Self {
            host: "unknown".to_string(),
            port: 0,
            score: 0,
        }
    }
}

/// The push/merge/propagate pipeline.
pub struct Entrance {
    wallets: Wallets,
    copies_root: PathBuf,
    network: String,
    pushed: AtomicU64,
    modified: AtomicU64,
}

impl Entrance {
    pub fn new(wallets: Wallets, copies_root: impl Into<PathBuf>, network: &str) -> Self {
        Self {
            wallets,
            copies_root: copies_root.into(),
            network: network.to_string(),
            pushed: AtomicU64::new(0),
            modified: AtomicU64::new(0),
        }
    }

    /// Accept a pushed wallet body. Returns the ids of all wallets the
    /// push ended up modifying; empty when the merge was a no-op.
    pub fn push(
        &self,
        id: Id,
        body: &str,
        source: Option<PushSource>,
    ) -> Result<Vec<Id>, NodeError> {
        let doc = WalletBody::parse(body)?;
        if doc.id != id {
            return Err(WalletError::IdMismatch {
                found: doc.id.to_string(),
                expected: id.to_string(),
            }
            .into());
        }
        if doc.network != self.network {
            return Err(WalletError::NetworkMismatch {
                found: doc.network,
                expected: self.network.clone(),
            }
            .into());
        }
        if doc.protocol != PROTOCOL {
            return Err(WalletError::ProtocolMismatch {
                found: doc.protocol,
                expected: PROTOCOL,
            }
            .into());
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);

        let source = source.unwrap_or_default();
        let copies = Copies::new(self.copies_root.join(id.to_string()));
        copies.add(body, &source.host, source.port, source.score)?;

        let mut patch = Patch::new();
        for copy in copies.load()? {
            let text = std::fs::read_to_string(&copy.path)?;
            let candidate = match WalletBody::parse(&text) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(copy = %copy.name, error = %e, "skipping unparseable copy");
                    continue;
                }
            };
            if let Err(e) = patch.join(&candidate) {
                warn!(copy = %copy.name, error = %e, "skipping incompatible copy");
            }
        }
        let local = self.wallets.find(id);
        if local.exists() {
            if let Err(e) = patch.join(&local.body()?) {
                warn!(wallet = %id, error = %e, "local wallet incompatible with merge");
            }
        }

        let changed = patch.save(self.wallets.path_of(id), true)?;
        if !changed {
            debug!(wallet = %id, "push did not modify the wallet");
            return Ok(Vec::new());
        }
        info!(wallet = %id, "wallet modified by push");
        self.modified.fetch_add(1, Ordering::Relaxed);

        let merged = self.wallets.find(id).body()?;
        let mut affected = vec![id];
        affected.extend(self.propagate(id, &merged));
        Ok(affected)
    }

    /// Append the positive mirror of every negative row into the local
    /// wallet of its beneficiary. Returns the ids of wallets touched.
    fn propagate(&self, id: Id, body: &WalletBody) -> Vec<Id> {
        let mut touched = Vec::new();
        for txn in body.txns.iter().filter(|t| t.is_negative()) {
            if txn.bnf == id {
                debug!(wallet = %id, id = txn.id, "skipping self-paying txn");
                continue;
            }
            let target = self.wallets.find(txn.bnf);
            if !target.exists() {
                continue;
            }
            let mirrored = (|| -> Result<bool, NodeError> {
                let target_body = target.body()?;
                if target_body.network != body.network {
                    debug!(wallet = %txn.bnf, "network mismatch, not propagating");
                    return Ok(false);
                }
                if target.has(txn.id, id)? {
                    return Ok(false);
                }
                if !target_body.key.contains(&txn.prefix) {
                    debug!(wallet = %txn.bnf, id = txn.id, "prefix mismatch, not propagating");
                    return Ok(false);
                }
                let inverse = txn.inverse(id).map_err(WalletError::from)?;
                target.add(inverse)?;
                Ok(true)
            })();
            match mirrored {
                Ok(true) => {
                    info!(from = %id, to = %txn.bnf, id = txn.id, "txn propagated");
                    if !touched.contains(&txn.bnf) {
                        touched.push(txn.bnf);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(from = %id, to = %txn.bnf, error = %e, "propagation failed"),
            }
        }
        touched
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "pushed": self.pushed.load(Ordering::Relaxed),
            "modified": self.modified.load(Ordering::Relaxed),
        })
    }
}
