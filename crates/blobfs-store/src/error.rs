use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during blob store operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {id}")]
    NotFound { id: String },

    #[error("Invalid blob id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// Reference counting cannot tell which copy to release without a token.
    #[error("Blob id {id} carries no copy token")]
    MissingCopy { id: String },

    /// No free staging, partition, folder or marker name could be claimed.
    #[error("Could not allocate a free name at {}", path.display())]
    Exhausted { path: PathBuf },

    #[error("Unknown digest algorithm: {0}")]
    UnknownDigest(String),
}

impl BlobError {
    /// True for errors caused by the caller's arguments rather than the store.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            BlobError::InvalidId { .. } | BlobError::MissingCopy { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;
