//! Core data models used throughout the image pipeline.
//!
//! These types represent the references, uploads, and ingestion results that
//! flow between the HTTP boundary, the fan-out coordinator, and the stores.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a stored image: an absolute URL for the remote store
/// or a public relative path (e.g. `/uploads/<name>`) for local storage.
///
/// Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageReference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImageReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One new binary submitted for ingestion.
///
/// Zero-length items are ignored by every consumer rather than treated as
/// errors; the content length is always `bytes.len()`.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Original filename as supplied by the client, if any.
    pub filename: Option<String>,
    /// Declared MIME type of the part, if any.
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadItem {
    pub fn new(filename: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename,
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Filename for log lines; never empty.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

/// An upload that could not be stored, with its position in the submission.
#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    /// Index of the item in the original (unfiltered) upload sequence.
    pub index: usize,
    pub filename: Option<String>,
    /// Human-readable failure cause.
    pub cause: String,
}

/// Outcome of one ingestion call.
///
/// `images` is always the existing set followed by the successfully stored
/// uploads in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionResult {
    pub images: Vec<ImageReference>,
    pub failed: Vec<FailedUpload>,
}

impl IngestionResult {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}
