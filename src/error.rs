//! Error taxonomy for the ingestion pipeline.
//!
//! [`StoreError`] is the per-item failure produced by an [`ObjectStore`]
//! upload; the coordinator records it and carries on. [`PipelineError`] is a
//! whole-call failure surfaced to the caller.
//!
//! [`ObjectStore`]: crate::traits::ObjectStore

use thiserror::Error;

/// Failure of a single upload to a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached (connect failure, timeout, or an
    /// upload directory that could not be created). A directory removed
    /// after startup surfaces as [`StoreError::Io`] instead.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the object (auth, quota, bad request).
    #[error("store rejected upload (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The item itself is not storable (e.g. empty body).
    #[error("invalid upload: {0}")]
    Invalid(String),

    /// The store client is misconfigured (e.g. missing credentials).
    #[error("store configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this failure means the store itself is out of reach, as
    /// opposed to a problem with this particular item.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            StoreError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// Failure of a whole pipeline call.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The caller sent a malformed request (e.g. invalid `existingImages`
    /// JSON). Never retried.
    #[error("invalid request: {0}")]
    ClientInput(String),

    /// Backing storage cannot be used at all: the upload directory could not
    /// be created, or the remote store was unreachable for every item.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
