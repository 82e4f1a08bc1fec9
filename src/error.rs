use std::path::PathBuf;

use thiserror::Error;

/// Semantic error kinds surfaced by optimisers, the process runner and the
/// settings store. These map 1:1 onto spec §7; there is deliberately no
/// generic `Other(String)` variant so callers can match exhaustively.
#[derive(Debug, Error)]
pub enum ClopError {
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("unsupported item type for {0}")]
    UnsupportedType(PathBuf),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("encrypted input: {0}")]
    EncryptedInput(PathBuf),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("process exited with code {0:?}: {1}")]
    NonZeroExit(Option<i32>, String),

    #[error("tool failed (exit {exit_code:?}): {stderr_snippet}")]
    ToolFailed {
        exit_code: Option<i32>,
        stderr_snippet: String,
    },

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("size limit exceeded: {0} bytes")]
    SizeLimitExceeded(u64),

    #[error("input dimension exceeded: {width}x{height}")]
    InputDimensionExceeded { width: u32, height: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ClopResult<T> = Result<T, ClopError>;
