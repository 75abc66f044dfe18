//! Error types shared by the control, environment and training layers

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, LqrError>;

/// Errors raised while solving, simulating or training
#[derive(Error, Debug)]
pub enum LqrError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Riccati iteration did not converge after {iterations} iterations (residual {residual:e})")]
    RiccatiDivergence { iterations: usize, residual: f64 },

    #[error("Singular matrix: {0}")]
    Singular(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Episode already finished; call reset() before stepping again")]
    EpisodeFinished,

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint error: {0:?}")]
    Recorder(burn::record::RecorderError),
}

impl From<burn::record::RecorderError> for LqrError {
    fn from(err: burn::record::RecorderError) -> Self {
        LqrError::Recorder(err)
    }
}
