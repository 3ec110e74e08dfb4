use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub local: LocalStoreConfig,
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest accepted request body, in bytes, across all parts.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

/// Which backend receives new uploads.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Local disk with deferred optimization.
    #[default]
    Local,
    /// Remote S3-compatible object store.
    Remote,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub mode: StoreMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Entity collections accepted by the HTTP boundary. Each name doubles as
    /// the store folder for that collection's images.
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collections: default_collections(),
        }
    }
}

fn default_collections() -> Vec<String> {
    vec!["products".to_string(), "categories".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalStoreConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// URL path under which `upload_dir` is served.
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    /// Per-folder overrides of `target_width` (e.g. `categories = 600`).
    #[serde(default)]
    pub target_widths: HashMap<String, u32>,
    /// Re-encode quality factor in `(0.0, 1.0]`.
    #[serde(default = "default_quality")]
    pub quality: f32,
    #[serde(default = "default_max_concurrent_optimizations")]
    pub max_concurrent_optimizations: usize,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            public_prefix: default_public_prefix(),
            target_width: default_target_width(),
            target_widths: HashMap::new(),
            quality: default_quality(),
            max_concurrent_optimizations: default_max_concurrent_optimizations(),
        }
    }
}

impl LocalStoreConfig {
    /// Public prefix without a trailing slash (`/uploads`).
    pub fn public_prefix_trimmed(&self) -> &str {
        self.public_prefix.trim_end_matches('/')
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_public_prefix() -> String {
    "/uploads".to_string()
}
fn default_target_width() -> u32 {
    1200
}
fn default_quality() -> f32 {
    0.8
}
fn default_max_concurrent_optimizations() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteStoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    /// When set, requests use path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Base URL used to build public image URLs (e.g. a CDN).
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeepAliveConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: default_keepalive_interval(),
        }
    }
}

fn default_keepalive_interval() -> u64 {
    600
}

impl Config {
    /// Configuration for tests and ad-hoc runs: local store rooted at
    /// `upload_dir`, default everything else.
    pub fn local(upload_dir: impl Into<PathBuf>, bind: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                bind: bind.into(),
                max_body_bytes: default_max_body_bytes(),
            },
            store: StoreConfig {
                mode: StoreMode::Local,
            },
            ingest: IngestConfig::default(),
            local: LocalStoreConfig {
                upload_dir: upload_dir.into(),
                ..LocalStoreConfig::default()
            },
            remote: None,
            keepalive: KeepAliveConfig::default(),
        }
    }

    /// Whether `collection` is served by the HTTP boundary.
    pub fn accepts_collection(&self, collection: &str) -> bool {
        self.ingest.collections.iter().any(|c| c == collection)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate local store
    if config.local.target_width == 0 {
        anyhow::bail!("local.target_width must be > 0");
    }

    for (folder, width) in &config.local.target_widths {
        if *width == 0 {
            anyhow::bail!("local.target_widths.{} must be > 0", folder);
        }
    }

    if !(config.local.quality > 0.0 && config.local.quality <= 1.0) {
        anyhow::bail!("local.quality must be in (0.0, 1.0]");
    }

    if config.local.max_concurrent_optimizations == 0 {
        anyhow::bail!("local.max_concurrent_optimizations must be >= 1");
    }

    if !config.local.public_prefix.starts_with('/') || config.local.public_prefix_trimmed().is_empty() {
        anyhow::bail!(
            "local.public_prefix must start with '/' and name a path below the root: '{}'",
            config.local.public_prefix
        );
    }

    if config.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be > 0");
    }

    // Validate remote store
    if config.store.mode == StoreMode::Remote {
        let remote = config
            .remote
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[remote] section is required when store.mode = \"remote\""))?;
        if remote.bucket.trim().is_empty() {
            anyhow::bail!("remote.bucket must not be empty");
        }
        if remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be > 0");
        }
    }

    // Validate ingest
    if config.ingest.collections.is_empty() {
        anyhow::bail!("ingest.collections must list at least one collection");
    }
    for collection in &config.ingest.collections {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!(
                "Invalid collection name: '{}'. Use letters, digits, '-' or '_'.",
                collection
            );
        }
    }

    if config.keepalive.url.is_some() && config.keepalive.interval_secs == 0 {
        anyhow::bail!("keepalive.interval_secs must be > 0");
    }

    Ok(config)
}
