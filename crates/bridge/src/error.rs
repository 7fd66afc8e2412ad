//! Error types for the bridge

use thiserror::Error;

/// Bridge-specific error types
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid bridge configuration: {0}")]
    Config(String),

    #[error("Audio sink error: {0}")]
    SinkInit(String),

    #[error("Sample rate conversion error: {0}")]
    Conversion(String),
}

impl From<rubato::ResampleError> for BridgeError {
    fn from(err: rubato::ResampleError) -> Self {
        BridgeError::Conversion(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for BridgeError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        BridgeError::Conversion(err.to_string())
    }
}
