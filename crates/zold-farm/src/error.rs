//! Error types for the score engine.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("not a valid score: {0}")] Malformed(String),
    #[error("score value {value} does not match {count} suffixes")]
    ValueMismatch { value: usize, count: usize },
}

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("farm is already running")] AlreadyRunning,
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
