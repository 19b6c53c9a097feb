//! The merge algorithm.
//!
//! Given candidate copies of one wallet, ranked strongest first, [`Patch`]
//! produces the strongest consistent union of their rows. Negative rows
//! are authoritative (signed by the owner) and their ids stay monotonic;
//! positive rows are unsigned mirrors and must never carry a signature.
//!
//! The first joined body is adopted wholesale as the baseline; every later
//! candidate contributes row by row under the rules of each branch below.
//! Joining is idempotent, and commutative for candidates of equal rank.

use std::path::Path;

use tracing::debug;

use crate::amount::Amount;
use crate::atomic_file::AtomicFile;
use crate::error::{PatchError, WalletError};
use crate::wallet::WalletBody;

/// Accumulates rows from candidate wallet bodies.
pub struct Patch {
    baseline: Option<WalletBody>,
    /// Running sum of all accepted rows.
    total: Amount,
    /// Portion of `total` contributed by positive rows joined from
    /// non-baseline candidates; subtracted from the spending ceiling in
    /// strict mode.
    foreign_positive: Amount,
    strict: bool,
}

impl Patch {
    pub fn new() -> Self {
        Self {
            baseline: None,
            total: Amount::ZERO,
            foreign_positive: Amount::ZERO,
            strict: false,
        }
    }

    /// A patch whose spending ceiling counts signed outflows and baseline
    /// rows only, ignoring mirrors picked up from later candidates.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::new()
        }
    }

    /// True if nothing has been joined yet.
    pub fn is_empty(&self) -> bool {
        self.baseline.is_none()
    }

    /// Merge one candidate body in. The first call adopts the candidate
    /// wholesale; later calls contribute row by row.
    pub fn join(&mut self, candidate: &WalletBody) -> Result<(), PatchError> {
        let Some(base) = self.baseline.as_mut() else {
            self.total = candidate.balance()?;
            self.baseline = Some(candidate.clone());
            return Ok(());
        };
        if candidate.network != base.network {
            return Err(WalletError::NetworkMismatch {
                found: candidate.network.clone(),
                expected: base.network.clone(),
            }
            .into());
        }
        if candidate.id != base.id {
            return Err(WalletError::IdMismatch {
                found: candidate.id.to_string(),
                expected: base.id.to_string(),
            }
            .into());
        }
        if candidate.key != base.key {
            return Err(WalletError::Malformed(format!(
                "public key mismatch in a copy of {}",
                base.id
            ))
            .into());
        }
        let max_neg_id = base.max_negative_id();
        for txn in &candidate.txns {
            if base.txns.contains(txn) {
                continue;
            }
            if txn.is_negative() {
                if base.txns.iter().any(|t| t.is_negative() && t.id == txn.id) {
                    debug!(id = txn.id, "Transaction already exists");
                    continue;
                }
                if max_neg_id.is_some_and(|max| txn.id <= max) {
                    debug!(id = txn.id, "skipping txn, negative history is sealed");
                    continue;
                }
                let ceiling = if self.strict {
                    self.total.checked_sub(self.foreign_positive)?
                } else {
                    self.total
                };
                if !base.id.is_root()
                    && ceiling.checked_add(txn.amount)?.is_negative()
                {
                    debug!(id = txn.id, amount = %txn.amount, "skipping txn, balance would go negative");
                    continue;
                }
                let Some(sign) = txn.sign.as_deref().filter(|s| !s.is_empty()) else {
                    debug!(id = txn.id, "skipping unsigned negative txn");
                    continue;
                };
                if base.key.verify(&txn.signature_body(base.id), sign).is_err() {
                    debug!(id = txn.id, "skipping txn, signature does not verify");
                    continue;
                }
            } else if txn.sign.as_deref().is_some_and(|s| !s.is_empty()) {
                debug!(id = txn.id, "skipping positive txn carrying a signature");
                continue;
            }
            self.total = self.total.checked_add(txn.amount)?;
            if !txn.is_negative() {
                self.foreign_positive = self.foreign_positive.checked_add(txn.amount)?;
            }
            base.txns.push(txn.clone());
        }
        Ok(())
    }

    /// The merged body.
    pub fn body(&self) -> Result<&WalletBody, PatchError> {
        self.baseline.as_ref().ok_or(PatchError::Empty)
    }

    /// Write the merged wallet to `path`. Returns true iff the file
    /// content actually changed.
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<bool, PatchError> {
        let body = self.body()?;
        let rendered = body.render();
        let file = AtomicFile::new(path.as_ref());
        if file.exists() {
            if file.read()? == rendered {
                return Ok(false);
            }
            if !overwrite {
                return Err(WalletError::AlreadyExists(
                    path.as_ref().display().to_string(),
                )
                .into());
            }
        }
        file.write(&rendered)?;
        Ok(true)
    }
}

impl Default for Patch {
    fn default() -> Self {
        Self::new()
    }
}
