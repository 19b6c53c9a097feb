//! Error types for the node layer.
use thiserror::Error;

use zold_core::error::{CopiesError, PatchError, WalletError};
use zold_farm::error::ScoreError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("peer {host}:{port}: {reason}")]
    Peer {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Took too long to execute")] Timeout,
    #[error("http: {0}")] Http(#[from] reqwest::Error),
    #[error(transparent)] Wallet(#[from] WalletError),
    #[error(transparent)] Copies(#[from] CopiesError),
    #[error(transparent)] Patch(#[from] PatchError),
    #[error(transparent)] Score(#[from] ScoreError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
