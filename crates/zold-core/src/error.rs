//! Error types for the Zold core.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount overflow")] Overflow,
    #[error("amount must not be zero")] Zero,
    #[error("not a valid ZLD amount: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("wallet id must be 16 hex digits, got {0:?}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key: {0}")] InvalidPublicKey(String),
    #[error("invalid private key: {0}")] InvalidPrivateKey(String),
    #[error("invalid signature encoding: {0}")] InvalidSignature(String),
    #[error("signature verification failed")] VerificationFailed,
    #[error("signing failed: {0}")] SigningFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("txn id {0:#06x} exceeds 0xffff")] IdTooLarge(u32),
    #[error("amount must not be zero")] ZeroAmount,
    #[error("invalid invoice prefix {0:?}")] BadPrefix(String),
    #[error("invalid details {0:?}")] BadDetails(String),
    #[error("not a valid txn line: {0}")] Malformed(String),
    #[error(transparent)] Amount(#[from] AmountError),
    #[error(transparent)] Id(#[from] IdError),
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("wallet file {0} already exists")] AlreadyExists(String),
    #[error("wallet file {0} not found")] NotFound(String),
    #[error("invalid network name {0:?}")] BadNetwork(String),
    #[error("network mismatch: wallet has {found:?}, expected {expected:?}")]
    NetworkMismatch { found: String, expected: String },
    #[error("protocol mismatch: wallet has {found}, expected {expected}")]
    ProtocolMismatch { found: u32, expected: u32 },
    #[error("wallet id mismatch: file has {found}, expected {expected}")]
    IdMismatch { found: String, expected: String },
    #[error("txn #{id:04x} with beneficiary {bnf} already present")]
    DuplicateTxn { id: u32, bnf: String },
    #[error("duplicate tax payment: {0:?}")] DuplicateTax(String),
    #[error("balance overflow while adding txn")] BalanceOverflow,
    #[error("negative amount passed to sub")] NegativeSub,
    #[error("no txn ids left, wallet is full")] Exhausted,
    #[error("signature does not verify against the wallet key")] BadSignature,
    #[error("malformed wallet: {0}")] Malformed(String),
    #[error(transparent)] Txn(#[from] TxnError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Amount(#[from] AmountError),
    #[error(transparent)] Id(#[from] IdError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CopiesError {
    #[error("malformed copies sidecar line: {0}")] Malformed(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("nothing joined yet, patch is empty")] Empty,
    #[error(transparent)] Wallet(#[from] WalletError),
    #[error(transparent)] Amount(#[from] AmountError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ZoldError {
    #[error(transparent)] Amount(#[from] AmountError),
    #[error(transparent)] Id(#[from] IdError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Txn(#[from] TxnError),
    #[error(transparent)] Wallet(#[from] WalletError),
    #[error(transparent)] Copies(#[from] CopiesError),
    #[error(transparent)] Patch(#[from] PatchError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
