//! # Catalog Images
//!
//! Image ingestion for an e-commerce catalog.
//!
//! When a product or category is created or edited, the admin UI sends the
//! images the entity keeps plus any new files. This crate uploads the new
//! files concurrently to the configured store and merges the results into
//! one ordered list. With the local-disk store, each file is saved raw and
//! its reference returned at once, then resized and re-encoded in the
//! background.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ HTTP / CLI │──▶│ ImageIngestor│──▶│ dyn ObjectStore  │
//! │ multipart  │   │ fan-out+merge│   │  S3  │  Local    │
//! └────────────┘   └──────────────┘   └──────┴────┬─────┘
//!                                                 │ spawn
//!                                                 ▼
//!                                      ┌────────────────────┐
//!                                      │ DeferredOptimizer  │
//!                                      │ resize → rename    │
//!                                      └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! catimg init                                   # create upload directory
//! catimg ingest --collection products a.jpg     # ingest from the CLI
//! catimg serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Upload items, references, ingestion results |
//! | [`error`] | Store and pipeline error types |
//! | [`traits`] | The [`ObjectStore`](traits::ObjectStore) seam |
//! | [`naming`] | Filename sanitization and unique names |
//! | [`ingest`] | Upload fan-out coordinator |
//! | [`encode`] | Resize and re-encode backend |
//! | [`optimizer`] | Deferred local optimization |
//! | [`store_local`] | Local-disk store |
//! | [`store_s3`] | S3-compatible remote store |
//! | [`server`] | HTTP ingestion server |
//! | [`keepalive`] | Periodic self-ping |

pub mod config;
pub mod encode;
pub mod error;
pub mod ingest;
pub mod keepalive;
pub mod models;
pub mod naming;
pub mod optimizer;
pub mod server;
pub mod store_local;
pub mod store_s3;
pub mod traits;
