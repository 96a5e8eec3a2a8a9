//! Error types for gae-model.

use thiserror::Error;

/// Model construction and inference errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Layer error.
    #[error(transparent)]
    Nn(#[from] gae_nn::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Unrecognized option key or malformed option payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A decoder that does not define its reconstruction.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Model used before `build`.
    #[error("model {0} has not been built")]
    NotBuilt(String),

    /// `build` called twice.
    #[error("model {0} is already built")]
    AlreadyBuilt(String),

    /// No trainable parameter under this key.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
