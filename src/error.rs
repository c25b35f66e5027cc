//! Error types of the synchronization cycle

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to the remote store
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether the server rejected the access token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Error kinds of a synchronization cycle
///
/// None of these terminate the process, the scheduler logs them and tries
/// again on the next cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source directory {} does not exist or is not a directory", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("no source directory selected")]
    NoDirectorySelected,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("existence query for '{name}' failed: {source}")]
    RemoteQuery {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("upload of {} failed: {source}", path.display())]
    UploadTransfer {
        path: PathBuf,
        #[source]
        source: RemoteError,
    },

    #[error("state record {}: {message}", path.display())]
    State { path: PathBuf, message: String },
}

impl SyncError {
    /// Whether the remote store rejected the credentials
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncError::RemoteQuery { source, .. } | SyncError::UploadTransfer { source, .. } => {
                source.is_unauthorized()
            }
            _ => false,
        }
    }
}
