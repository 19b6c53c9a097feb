//! Directory of wallets keyed by id.

use std::path::{Path, PathBuf};

use crate::constants::WALLET_EXT;
use crate::error::WalletError;
use crate::id::Id;
use crate::wallet::Wallet;

/// The `zold-wallets` directory.
#[derive(Clone, Debug)]
pub struct Wallets {
    dir: PathBuf,
}

impl Wallets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a wallet with this id lives at (whether or not it exists).
    pub fn path_of(&self, id: Id) -> PathBuf {
        self.dir.join(format!("{id}{WALLET_EXT}"))
    }

    /// Handle to the wallet with this id; may not exist yet.
    pub fn find(&self, id: Id) -> Wallet {
        Wallet::new(self.path_of(id))
    }

    /// Ids of all wallet files present, sorted.
    pub fn all(&self) -> Result<Vec<Id>, WalletError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(WALLET_EXT) else {
                continue;
            };
            if let Ok(id) = stem.parse::<Id>() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize, WalletError> {
        Ok(self.all()?.len())
    }
}
