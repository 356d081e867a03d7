//! Shared error type for wire-level encode/decode and validation.

/// Errors produced while encoding, decoding, or validating wire data.
#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("inflate: {0}")]
    Inflate(String),

    #[error("unsupported frame type for codec")]
    UnsupportedFrame,

    #[error("unknown intent bits: {bits:#x}")]
    UnknownIntents { bits: u64 },
}

pub type Result<T> = std::result::Result<T, WireError>;
