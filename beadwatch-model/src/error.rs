use thiserror::Error;

/// Errors produced while decoding or validating wire payloads.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
