//! Upload fan-out coordination.
//!
//! Reconciles the images an entity keeps with the images it gains:
//! existing references → filter empty uploads → concurrent upload to the
//! configured [`ObjectStore`] → ordered merge.
//!
//! Failure policy is best-effort everywhere: an upload that fails is left out
//! of the final list and reported in [`IngestionResult::failed`], and the
//! call still succeeds. The only whole-call failures are a malformed
//! `existing` payload and a store that was unreachable for every item.

use anyhow::Context;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, StoreMode};
use crate::error::{PipelineError, StoreError};
use crate::models::{FailedUpload, ImageReference, IngestionResult, UploadItem};
use crate::store_local::LocalStore;
use crate::store_s3::S3Store;
use crate::traits::ObjectStore;

/// Parse the serialized existing-image list sent by the client.
///
/// Absent, blank, `"[]"` and `"null"` payloads all mean "no existing images".
/// Anything else must be a JSON array of strings; otherwise the request is
/// malformed and [`PipelineError::ClientInput`] is returned.
pub fn parse_existing(raw: Option<&str>) -> Result<Vec<ImageReference>, PipelineError> {
    let raw = match raw.map(str::trim) {
        None | Some("") | Some("[]") | Some("null") => return Ok(Vec::new()),
        Some(raw) => raw,
    };

    let refs: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        PipelineError::ClientInput(format!(
            "existing images must be a JSON array of strings: {}",
            e
        ))
    })?;

    Ok(refs.into_iter().map(ImageReference::from).collect())
}

/// Fans uploads out to a store and merges the results in order.
#[derive(Clone)]
pub struct ImageIngestor {
    store: Arc<dyn ObjectStore>,
}

impl ImageIngestor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Build the ingestor for the store selected by `store.mode`.
    ///
    /// Local mode creates the upload directory. Remote mode reads AWS
    /// credentials from the environment.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.store.mode {
            StoreMode::Local => Arc::new(LocalStore::init(&config.local)?),
            StoreMode::Remote => {
                let remote = config
                    .remote
                    .as_ref()
                    .context("[remote] section is required when store.mode = \"remote\"")?;
                Arc::new(S3Store::from_env(remote)?)
            }
        };
        info!(store = store.name(), "Object store ready");
        Ok(Self::new(store))
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Wait for the store's background work to finish.
    pub async fn drain(&self) {
        self.store.drain().await;
    }

    /// Merge `existing_json` with freshly uploaded `uploads` stored under
    /// `folder`.
    ///
    /// The result lists the existing references first, unchanged and in
    /// order, followed by each successful upload in submission order.
    pub async fn ingest(
        &self,
        existing_json: Option<&str>,
        uploads: Vec<UploadItem>,
        folder: &str,
    ) -> Result<IngestionResult, PipelineError> {
        let existing = parse_existing(existing_json)?;
        self.ingest_parsed(existing, uploads, folder).await
    }

    /// Like [`ingest`](Self::ingest) with an already-parsed existing set.
    pub async fn ingest_parsed(
        &self,
        existing: Vec<ImageReference>,
        uploads: Vec<UploadItem>,
        folder: &str,
    ) -> Result<IngestionResult, PipelineError> {
        let submitted = uploads.len();
        let kept = existing.len();

        // Keep the original index of every non-empty item.
        let pending: Vec<(usize, UploadItem)> = uploads
            .into_iter()
            .enumerate()
            .filter(|(_, item)| !item.is_empty())
            .collect();

        if pending.len() < submitted {
            debug!(
                folder,
                skipped = submitted - pending.len(),
                "Skipping empty uploads"
            );
        }

        // One task per item; handles stay in submission order.
        let mut meta = Vec::with_capacity(pending.len());
        let mut handles = Vec::with_capacity(pending.len());
        for (index, item) in pending {
            let store = Arc::clone(&self.store);
            let folder = folder.to_string();
            meta.push((index, item.filename.clone()));
            handles.push(tokio::spawn(async move {
                store.upload(&item, &folder).await
            }));
        }

        let dispatched = handles.len();
        let outcomes = join_all(handles).await;

        let mut images = existing;
        let mut failed = Vec::new();
        let mut unreachable = 0usize;

        for ((index, filename), outcome) in meta.into_iter().zip(outcomes) {
            let cause = match outcome {
                Ok(Ok(reference)) => {
                    images.push(reference);
                    continue;
                }
                Ok(Err(e)) => {
                    if e.is_unavailable() {
                        unreachable += 1;
                    }
                    log_upload_failure(self.store.name(), folder, index, filename.as_deref(), &e);
                    e.to_string()
                }
                Err(e) => {
                    error!(
                        store = self.store.name(),
                        folder,
                        index,
                        filename = filename.as_deref().unwrap_or("<unnamed>"),
                        error = %e,
                        "Upload task aborted"
                    );
                    format!("upload task aborted: {}", e)
                }
            };
            failed.push(FailedUpload {
                index,
                filename,
                cause,
            });
        }

        if dispatched > 0 && unreachable == dispatched {
            error!(
                store = self.store.name(),
                folder, dispatched, "Store unreachable for every upload"
            );
            return Err(PipelineError::StorageUnavailable(format!(
                "{} store unreachable for all {} uploads",
                self.store.name(),
                dispatched
            )));
        }

        info!(
            store = self.store.name(),
            folder,
            existing = kept,
            uploaded = images.len() - kept,
            failed = failed.len(),
            "Ingestion complete"
        );

        Ok(IngestionResult { images, failed })
    }
}

fn log_upload_failure(
    store: &str,
    folder: &str,
    index: usize,
    filename: Option<&str>,
    err: &StoreError,
) {
    warn!(
        store,
        folder,
        index,
        filename = filename.unwrap_or("<unnamed>"),
        error = %err,
        "Upload failed, omitting image"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_existing_empty_encodings() {
        for raw in [None, Some(""), Some("   "), Some("[]"), Some("null"), Some(" [] ")] {
            assert!(parse_existing(raw).unwrap().is_empty(), "{:?}", raw);
        }
    }

    #[test]
    fn test_parse_existing_preserves_order() {
        let refs = parse_existing(Some(r#"["https://x/b.jpg", "https://x/a.jpg", "/uploads/c.png"]"#))
            .unwrap();
        let strs: Vec<&str> = refs.iter().map(|r| r.as_str()).collect();
        assert_eq!(strs, vec!["https://x/b.jpg", "https://x/a.jpg", "/uploads/c.png"]);
    }

    #[test]
    fn test_parse_existing_keeps_duplicates() {
        let refs = parse_existing(Some(r#"["a", "a"]"#)).unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_parse_existing_malformed_is_client_error() {
        for raw in [r#"["a","#, r#"{"a": 1}"#, "[1, 2]", "not json", "[null]"] {
            let err = parse_existing(Some(raw)).unwrap_err();
            assert!(matches!(err, PipelineError::ClientInput(_)), "{}", raw);
        }
    }
}
