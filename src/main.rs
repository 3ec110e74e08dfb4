//! # Catalog image CLI (`catimg`)
//!
//! The `catimg` binary runs the image ingestion pipeline: it prepares the
//! store, ingests files from the command line, optimizes a single file in
//! the foreground, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! catimg --config ./config/catimg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catimg init` | Create the upload directory or check remote credentials |
//! | `catimg ingest --collection C FILE...` | Ingest files and print the merged image list |
//! | `catimg optimize FILE` | Resize and re-encode one file in place |
//! | `catimg serve` | Start the HTTP ingestion server |
//!
//! ## Examples
//!
//! ```bash
//! # Prepare local storage
//! catimg init
//!
//! # Add two images to a product that already has one
//! catimg ingest --collection products \
//!     --existing '["https://cdn.example.com/a.jpg"]' shoe.jpg box.png
//!
//! # Shrink a single file to 800px wide
//! catimg optimize ./uploads/1b2c_shoe.jpg --width 800
//!
//! # Debug logging for the server
//! RUST_LOG=catalog_images=debug catimg serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use catalog_images::config::{self, Config, StoreMode};
use catalog_images::encode::RustEncoder;
use catalog_images::ingest::ImageIngestor;
use catalog_images::models::UploadItem;
use catalog_images::naming;
use catalog_images::optimizer::{self, OptimizeOutcome};
use catalog_images::server;
use catalog_images::store_s3::AwsCredentials;

/// Catalog image pipeline: concurrent upload fan-out and deferred local
/// optimization.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/catimg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "catimg",
    about = "Catalog image ingestion: fan-out uploads and deferred optimization",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catimg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the configured store.
    ///
    /// Local mode creates the upload directory. Remote mode checks that AWS
    /// credentials are present in the environment. Safe to run repeatedly.
    Init,

    /// Ingest image files into a collection and print the resulting list.
    Ingest {
        /// Collection (and store folder) the images belong to.
        #[arg(long)]
        collection: String,

        /// JSON array of references the entity already has.
        #[arg(long)]
        existing: Option<String>,

        /// Image files to upload, in order.
        files: Vec<PathBuf>,
    },

    /// Resize and re-encode one file in place, in the foreground.
    Optimize {
        file: PathBuf,

        /// Target width in pixels. Defaults to `local.target_width`.
        #[arg(long)]
        width: Option<u32>,
    },

    /// Start the HTTP ingestion server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&cfg)?,
        Commands::Ingest {
            collection,
            existing,
            files,
        } => cmd_ingest(&cfg, &collection, existing.as_deref(), &files).await?,
        Commands::Optimize { file, width } => cmd_optimize(&cfg, file, width).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

fn cmd_init(cfg: &Config) -> anyhow::Result<()> {
    match cfg.store.mode {
        StoreMode::Local => {
            optimizer::ensure_upload_dir(&cfg.local.upload_dir)?;
            println!(
                "Upload directory ready: {} (served at {})",
                cfg.local.upload_dir.display(),
                cfg.local.public_prefix_trimmed()
            );
        }
        StoreMode::Remote => {
            AwsCredentials::from_env()?;
            if let Some(remote) = &cfg.remote {
                println!(
                    "Remote store configured: bucket {} in {}",
                    remote.bucket, remote.region
                );
            }
        }
    }
    Ok(())
}

async fn cmd_ingest(
    cfg: &Config,
    collection: &str,
    existing: Option<&str>,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    if !cfg.accepts_collection(collection) {
        anyhow::bail!(
            "Unknown collection '{}'. Configured: {}",
            collection,
            cfg.ingest.collections.join(", ")
        );
    }

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        uploads.push(read_upload(path).await?);
    }

    let ingestor = ImageIngestor::from_config(cfg)?;
    let result = ingestor.ingest(existing, uploads, collection).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.has_failures() {
        eprintln!("{} of {} uploads failed:", result.failed.len(), files.len());
    }
    for failure in &result.failed {
        eprintln!(
            "failed: #{} {}: {}",
            failure.index,
            failure.filename.as_deref().unwrap_or("<unnamed>"),
            failure.cause
        );
    }

    // Local mode optimizes in the background; finish before exiting.
    ingestor.drain().await;
    Ok(())
}

async fn read_upload(path: &Path) -> anyhow::Result<UploadItem> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    let content_type = naming::detect_content_type(filename.as_deref().unwrap_or_default());
    Ok(UploadItem::new(filename, bytes).with_content_type(content_type))
}

async fn cmd_optimize(cfg: &Config, file: PathBuf, width: Option<u32>) -> anyhow::Result<()> {
    let width = width.unwrap_or(cfg.local.target_width);
    if width == 0 {
        anyhow::bail!("--width must be > 0");
    }

    let display = file.display().to_string();
    match optimizer::optimize(file, width, cfg.local.quality, Arc::new(RustEncoder)).await {
        OptimizeOutcome::Optimized {
            original_bytes,
            optimized_bytes,
        } => {
            println!(
                "Optimized {}: {} -> {} bytes",
                display, original_bytes, optimized_bytes
            );
            Ok(())
        }
        OptimizeOutcome::Missing => anyhow::bail!("File not found: {}", display),
        OptimizeOutcome::Failed(cause) => {
            anyhow::bail!("Failed to optimize {}: {}", display, cause)
        }
    }
}
