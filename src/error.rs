//! Error types and exit codes for trackd

use std::process::ExitCode;
use thiserror::Error;

use crate::tracks::StoreError;

/// Errors that stop trackd from starting or serving
#[derive(Error, Debug)]
pub enum TrackdError {
    #[error("no track database configured (tried {tried})")]
    NoDatabase { tried: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("Track store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackdError {
    /// Process exit code:
    /// - 1: IO error (including failure to bind)
    /// - 2: Bad configuration or no database
    /// - 3: Track store failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::from(1),
            Self::NoDatabase { .. } | Self::Config { .. } => ExitCode::from(2),
            Self::Store(_) => ExitCode::from(3),
        }
    }
}

/// Result type alias for trackd operations
pub type Result<T> = std::result::Result<T, TrackdError>;
