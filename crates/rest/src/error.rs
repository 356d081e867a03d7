//! REST error taxonomy.
//!
//! Rate limits never surface here — the pipeline always waits them out.
//! Everything else maps onto one variant: transient faults that exhausted
//! their retries (`Timeout`, `Upstream`), permanent client errors (`Auth`,
//! `Api`), and local failures (`Http`, `Json`, `Config`).

/// Errors surfaced by the request pipeline.
#[derive(thiserror::Error, Debug)]
pub enum RestError {
    #[error("HTTP: {0}")]
    Http(String),

    #[error("timed out after {attempts} attempts: {message}")]
    Timeout { attempts: u32, message: String },

    #[error("upstream fault after {attempts} attempts (last status {status}): {message}")]
    Upstream {
        attempts: u32,
        status: u16,
        message: String,
    },

    #[error("auth rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RestError>;
