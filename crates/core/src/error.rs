//! Error types shared across the luabox crates.

use thiserror::Error;

/// Result type for luabox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the build engine.
///
/// Script-level failures (parse errors, runtime errors raised inside the
/// evaluator) are collapsed into `Script`; failures reported by the container
/// backend keep their message under `Executor`. Cancellation and deadline
/// expiry surface unchanged so callers can tell them apart from real faults.
#[derive(Error, Debug)]
pub enum Error {
    #[error("build cancelled")]
    Cancelled,

    #[error("build deadline exceeded")]
    DeadlineExceeded,

    #[error("executor error: {0}")]
    Executor(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("executor {0:?} not found")]
    UnknownBackend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
