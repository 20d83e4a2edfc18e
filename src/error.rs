//! Error types shared by the estimator layer and the benchmark engine.

use std::io;

use thiserror::Error;

/// Errors raised by an estimator instance.
#[derive(Error, Debug)]
pub enum EstimatorError {
    /// The item cannot be encoded by the variant.
    #[error("{variant}: item of {len} bytes cannot be encoded")]
    InvalidItem { variant: String, len: usize },

    /// Merge between instances of different family or precision.
    #[error("cannot merge {found} into {expected}")]
    IncompatibleVariant { expected: String, found: String },

    /// Snapshot bytes do not decode into a consistent estimator state.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Variant name or parameter outside the supported set.
    #[error("invalid variant: {0}")]
    InvalidVariant(String),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the benchmark engine.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("configuration error: {0}")]
    Config(String),

    /// A worker task did not produce a result.
    #[error("worker task {task} failed: {reason}")]
    Worker { task: usize, reason: String },

    /// Every task of a parallel run failed.
    #[error("all {0} tasks failed")]
    AllTasksFailed(usize),
}

impl From<toml::de::Error> for BenchError {
    fn from(e: toml::de::Error) -> Self {
        BenchError::Config(e.to_string())
    }
}
