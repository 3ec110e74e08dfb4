//! Storage seam between the fan-out coordinator and the backends.
//!
//! The coordinator only ever talks to an [`ObjectStore`]. Two built-in
//! implementations exist: [`S3Store`](crate::store_s3::S3Store) for the
//! remote deployment and [`LocalStore`](crate::store_local::LocalStore) for
//! local disk with deferred optimization.
//!
//! ```text
//!               ┌──────────────────┐
//!  multipart ──▶│  ImageIngestor   │── fan-out ──┐
//!               └──────────────────┘             ▼
//!                                     ┌────────────────────┐
//!                                     │  dyn ObjectStore   │
//!                                     │  ┌──────┐ ┌──────┐ │
//!                                     │  │  S3  │ │Local │ │
//!                                     │  └──────┘ └──────┘ │
//!                                     └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use catalog_images::error::StoreError;
//! use catalog_images::models::{ImageReference, UploadItem};
//! use catalog_images::traits::ObjectStore;
//!
//! pub struct NullStore;
//!
//! #[async_trait]
//! impl ObjectStore for NullStore {
//!     fn name(&self) -> &str { "null" }
//!
//!     async fn upload(&self, item: &UploadItem, folder: &str) -> Result<ImageReference, StoreError> {
//!         Ok(ImageReference::new(format!("null://{}/{}", folder, item.display_name())))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{ImageReference, UploadItem};

/// A durable destination for new image binaries.
///
/// Implementations must be safe to call concurrently: the coordinator
/// dispatches every item of a batch at once. Retries, if any, are the
/// implementation's business; the coordinator never retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in log lines (e.g. `"s3"`, `"local"`).
    fn name(&self) -> &str;

    /// Store one binary under `folder` and return its reference.
    async fn upload(&self, item: &UploadItem, folder: &str) -> Result<ImageReference, StoreError>;

    /// Wait for background work this store started after returning from
    /// [`upload`](Self::upload). Called once at shutdown. The default does
    /// nothing.
    async fn drain(&self) {}
}
