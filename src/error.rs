use thiserror::Error;

/// Errors raised while configuring, building or training a regressor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing capability: {0}")]
    MissingCapability(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("input shape mismatch: expected (series_length, dimensions) = {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("regressor has not been fitted yet")]
    NotFitted,

    #[error("loss became non-finite ({loss}) in epoch {epoch}")]
    NonFiniteLoss { epoch: usize, loss: f32 },

    #[error("unknown {kind} identifier `{name}`")]
    UnknownIdentifier { kind: &'static str, name: String },

    #[error("callback failed: {0}")]
    Callback(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gpu error: {0}")]
    Gpu(String),
}

pub type Result<T> = std::result::Result<T, Error>;
