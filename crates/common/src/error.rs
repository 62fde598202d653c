//! Error types shared across Splice crates.

use std::path::PathBuf;

/// Top-level error type for Splice operations.
#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("Another writer session is already active")]
    AlreadyActive,

    #[error("Writer session has not been prepared")]
    NotPrepared,

    #[error("Failed to set up {track} track: {message}")]
    TrackSetupFailed { track: String, message: String },

    #[error("Backend error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("Executor error: {message}")]
    Executor { message: String },

    #[error("Script error: {message}")]
    Script { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Resource not found: {path}")]
    ResourceNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using SpliceError.
pub type SpliceResult<T> = Result<T, SpliceError>;

impl SpliceError {
    pub fn track_setup(track: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TrackSetupFailed {
            track: track.into(),
            message: msg.into(),
        }
    }

    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        Self::Backend(err.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor {
            message: msg.into(),
        }
    }

    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error is surfaced synchronously at session setup.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive | Self::NotPrepared | Self::TrackSetupFailed { .. }
        )
    }
}
