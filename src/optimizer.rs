//! Deferred local optimization.
//!
//! Local-disk deployments store uploads in two steps:
//!
//! 1. [`DeferredOptimizer::save_and_defer`] writes the raw bytes under a
//!    unique name and returns the public reference right away.
//! 2. A background task runs [`optimize`]: it resizes and re-encodes the file
//!    and atomically replaces it at the same path.
//!
//! Readers of a reference see the raw upload until the background task
//! finishes, then the optimized file. They never see a partial write: the
//! optimized bytes go to a temporary sibling that is renamed over the
//! original.
//!
//! Background tasks are detached. They outlive the request that scheduled
//! them and cannot be cancelled or awaited; their only observable effects
//! are the replaced file and log output. A semaphore bounds how many run at
//! once. [`DeferredOptimizer::drain`] waits for every scheduled task, for
//! process shutdown.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

use crate::config::LocalStoreConfig;
use crate::encode::{EncodeError, ImageEncoder};
use crate::error::PipelineError;
use crate::models::{ImageReference, UploadItem};
use crate::naming;

/// Saves uploads to local disk and optimizes them in the background.
pub struct DeferredOptimizer {
    upload_dir: PathBuf,
    public_prefix: String,
    quality: f32,
    encoder: Arc<dyn ImageEncoder>,
    permits: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

/// Count of scheduled-but-unfinished optimizations.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a background task ends, however it ends.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl DeferredOptimizer {
    /// Prepare the upload directory and build the optimizer.
    ///
    /// Call once at startup. Creates `upload_dir` (and parents) if missing;
    /// failure to do so is [`PipelineError::StorageUnavailable`].
    pub fn init(
        config: &LocalStoreConfig,
        encoder: Arc<dyn ImageEncoder>,
    ) -> Result<Self, PipelineError> {
        ensure_upload_dir(&config.upload_dir)?;

        Ok(Self {
            upload_dir: config.upload_dir.clone(),
            public_prefix: config.public_prefix_trimmed().to_string(),
            quality: config.quality,
            encoder,
            permits: Arc::new(Semaphore::new(config.max_concurrent_optimizations.max(1))),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Number of optimizations scheduled and not yet finished.
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Wait until every scheduled optimization has finished.
    pub async fn drain(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Write `upload` to disk and schedule its optimization to `target_width`.
    ///
    /// Returns `Ok(None)` for an empty upload. Otherwise returns the public
    /// reference (`{public_prefix}/{uuid}_{name}`) as soon as the raw bytes
    /// are on disk, without waiting for optimization.
    pub async fn save_and_defer(
        &self,
        upload: &UploadItem,
        target_width: u32,
    ) -> Result<Option<ImageReference>, PipelineError> {
        if upload.is_empty() {
            warn!(filename = upload.display_name(), "Ignoring empty upload");
            return Ok(None);
        }
        if target_width == 0 {
            return Err(PipelineError::ClientInput(
                "target width must be a positive integer".to_string(),
            ));
        }

        let filename = naming::unique_name(upload.filename.as_deref());
        let path = self.upload_dir.join(&filename);

        info!(path = %path.display(), bytes = upload.len(), "Saving raw upload");
        write_raw(&path, &upload.bytes).await?;

        self.schedule(path, target_width);

        Ok(Some(ImageReference::new(format!(
            "{}/{}",
            self.public_prefix, filename
        ))))
    }

    /// Spawn the detached optimization task for `path`.
    fn schedule(&self, path: PathBuf, target_width: u32) {
        let encoder = Arc::clone(&self.encoder);
        let permits = Arc::clone(&self.permits);
        let quality = self.quality;

        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        tokio::spawn(async move {
            let _guard = guard;
            // Held until the task finishes.
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(path = %path.display(), "Optimizer shut down, skipping optimization");
                    return;
                }
            };
            optimize(path, target_width, quality, encoder).await;
        });
    }
}

/// Write `bytes` to `path`, removing whatever was written if the write fails.
async fn write_raw(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let err = match tokio::fs::write(path, bytes).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!(path = %path.display(), error = %err, "Removed partial upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to remove partial upload")
        }
    }
    Err(err)
}

/// Create the upload directory if it does not exist.
pub fn ensure_upload_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.is_dir() {
        return Ok(());
    }
    match std::fs::create_dir_all(dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "Created upload directory");
            Ok(())
        }
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Failed to create upload directory");
            Err(PipelineError::StorageUnavailable(format!(
                "cannot create upload directory {}: {}",
                dir.display(),
                e
            )))
        }
    }
}

/// What a single optimization run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeOutcome {
    /// The file was replaced by its optimized version.
    Optimized { original_bytes: u64, optimized_bytes: u64 },
    /// The file was gone before (or while) optimizing; nothing was written.
    Missing,
    /// Optimization failed; the original file is untouched.
    Failed(String),
}

#[derive(Error, Debug)]
enum OptimizeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Resize and re-encode the file at `path` in place.
///
/// Never fails outward: a missing file is logged at warn, any other failure
/// at error, and in both cases the file on disk is left as it was.
pub async fn optimize(
    path: PathBuf,
    target_width: u32,
    quality: f32,
    encoder: Arc<dyn ImageEncoder>,
) -> OptimizeOutcome {
    info!(path = %path.display(), target_width, "Starting optimization");

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        warn!(path = %path.display(), "Cannot optimize image, file not found");
        return OptimizeOutcome::Missing;
    }

    let job_path = path.clone();
    let result = tokio::task::spawn_blocking(move || {
        replace_with_optimized(&job_path, target_width, quality, encoder.as_ref())
    })
    .await;

    match result {
        Ok(Ok(Some((original_bytes, optimized_bytes)))) => {
            info!(
                path = %path.display(),
                original_bytes,
                optimized_bytes,
                "Optimized image"
            );
            OptimizeOutcome::Optimized {
                original_bytes,
                optimized_bytes,
            }
        }
        Ok(Ok(None)) => {
            warn!(path = %path.display(), "Image removed during optimization, discarding result");
            OptimizeOutcome::Missing
        }
        Ok(Err(e)) => {
            error!(path = %path.display(), error = %e, "Error optimizing image, keeping original");
            OptimizeOutcome::Failed(e.to_string())
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Optimization task panicked, keeping original");
            OptimizeOutcome::Failed(e.to_string())
        }
    }
}

/// Blocking half of [`optimize`]. Returns `None` when the file disappeared.
fn replace_with_optimized(
    path: &Path,
    target_width: u32,
    quality: f32,
    encoder: &dyn ImageEncoder,
) -> Result<Option<(u64, u64)>, OptimizeError> {
    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let permissions = std::fs::metadata(path)?.permissions();

    let encoded = encoder.reencode(&raw, target_width, quality)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".optimizing-")
        .tempfile_in(dir)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;

    // Deleted while encoding: drop the temp file instead of resurrecting it.
    if !path.exists() {
        return Ok(None);
    }
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(Some((raw.len() as u64, encoded.len() as u64)))
}
