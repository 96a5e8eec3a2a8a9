//! Error types for gae-nn.

use thiserror::Error;

/// Layer construction and forward-pass errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Unrecognized configuration key (or malformed option payload).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Layer received the wrong kind of input (sparse vs dense).
    #[error("layer {layer} expects {expected} input")]
    InputKind { layer: String, expected: &'static str },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
