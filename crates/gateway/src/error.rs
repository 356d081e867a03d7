//! Gateway error taxonomy.
//!
//! Only terminal outcomes surface here: non-resumable closes (`Fatal`),
//! an exhausted reconnect budget, configuration mistakes, and shutdown.
//! Everything recoverable — resumable closes, invalid sessions, zombied
//! heartbeats — is retried inside the shard loop and never escapes.

use accord_wire::CloseCode;

/// Top-level gateway error.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("config: {0}")]
    Config(String),

    #[error("fatal close {code}: {reason}")]
    Fatal { code: CloseCode, reason: String },

    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("shard discovery: {0}")]
    Discovery(#[from] accord_rest::RestError),

    #[error("shutdown")]
    Shutdown,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
