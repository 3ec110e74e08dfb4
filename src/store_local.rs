//! Local-disk object store.
//!
//! Adapts the [`DeferredOptimizer`] to the [`ObjectStore`] seam so the
//! coordinator can fan out to local disk exactly as it does to S3. Files are
//! stored flat in the upload directory; the folder only selects the target
//! width (see `local.target_widths`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LocalStoreConfig;
use crate::encode::{ImageEncoder, RustEncoder};
use crate::error::{PipelineError, StoreError};
use crate::models::{ImageReference, UploadItem};
use crate::optimizer::DeferredOptimizer;
use crate::traits::ObjectStore;

pub struct LocalStore {
    optimizer: DeferredOptimizer,
    default_width: u32,
    folder_widths: HashMap<String, u32>,
}

impl LocalStore {
    /// Build a local store with the production encoder.
    pub fn init(config: &LocalStoreConfig) -> Result<Self, PipelineError> {
        Self::with_encoder(config, Arc::new(RustEncoder))
    }

    pub fn with_encoder(
        config: &LocalStoreConfig,
        encoder: Arc<dyn ImageEncoder>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            optimizer: DeferredOptimizer::init(config, encoder)?,
            default_width: config.target_width,
            folder_widths: config.target_widths.clone(),
        })
    }

    /// Target width for images stored under `folder`.
    pub fn width_for(&self, folder: &str) -> u32 {
        self.folder_widths
            .get(folder)
            .copied()
            .unwrap_or(self.default_width)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, item: &UploadItem, folder: &str) -> Result<ImageReference, StoreError> {
        match self.optimizer.save_and_defer(item, self.width_for(folder)).await {
            Ok(Some(reference)) => Ok(reference),
            Ok(None) => Err(StoreError::Invalid("empty upload".to_string())),
            Err(PipelineError::Io(e)) => Err(StoreError::Io(e)),
            Err(PipelineError::ClientInput(msg)) => Err(StoreError::Invalid(msg)),
            Err(PipelineError::StorageUnavailable(msg)) => Err(StoreError::Unavailable(msg)),
        }
    }

    async fn drain(&self) {
        let pending = self.optimizer.pending();
        if pending > 0 {
            tracing::info!(pending, "Waiting for background optimizations");
        }
        self.optimizer.drain().await;
    }
}
