//! Amazon S3 object store.
//!
//! Uploads images with a signed `PutObject` request using the S3 REST API
//! and AWS Signature V4. Works against AWS (virtual-hosted addressing) and
//! S3-compatible services such as MinIO or LocalStack (path-style addressing
//! when `endpoint_url` is set).
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! mode = "remote"
//!
//! [remote]
//! bucket = "catalog-images"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"      # MinIO
//! # public_base_url = "https://cdn.example.com"  # URL prefix returned to clients
//! timeout_secs = 60
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Object keys
//!
//! Each upload is stored at `{folder}/{uuid}_{sanitized-filename}`, so two
//! uploads never overwrite each other. The store does not retry; a failed
//! request is reported to the coordinator as a per-item failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::RemoteStoreConfig;
use crate::error::StoreError;
use crate::models::{ImageReference, UploadItem};
use crate::naming;
use crate::traits::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, StoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StoreError::Config("AWS_ACCESS_KEY_ID environment variable not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            StoreError::Config("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Where an object lives: the request URL plus the pieces that get signed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjectLocation {
    scheme: &'static str,
    host: String,
    canonical_uri: String,
}

impl ObjectLocation {
    fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.canonical_uri)
    }
}

/// Remote store backed by an S3 bucket.
pub struct S3Store {
    config: RemoteStoreConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    /// Build a store with credentials from the environment.
    pub fn from_env(config: &RemoteStoreConfig) -> Result<Self, StoreError> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    pub fn new(config: &RemoteStoreConfig, creds: AwsCredentials) -> Result<Self, StoreError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            creds,
            client,
        })
    }

    /// Object key for a new upload under `folder`.
    pub fn object_key(folder: &str, item: &UploadItem) -> String {
        let name = naming::unique_name(item.filename.as_deref());
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            name
        } else {
            format!("{}/{}", folder, name)
        }
    }

    /// Public URL returned to clients for `key`.
    pub fn public_url(&self, key: &str) -> String {
        match self.config.public_base_url {
            Some(ref base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => self.location(key).url(),
        }
    }

    /// Compute the host and canonical URI for `key`.
    ///
    /// With a custom `endpoint_url`, the bucket goes in the path
    /// (`http://host:9000/<bucket>/<key>`); otherwise the standard
    /// `<bucket>.s3.<region>.amazonaws.com` host is used.
    fn location(&self, key: &str) -> ObjectLocation {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

        if let Some(ref endpoint) = self.config.endpoint_url {
            let scheme = if endpoint.starts_with("http://") {
                "http"
            } else {
                "https"
            };
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            ObjectLocation {
                scheme,
                host,
                canonical_uri: format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key),
            }
        } else {
            ObjectLocation {
                scheme: "https",
                host: format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                canonical_uri: format!("/{}", encoded_key),
            }
        }
    }

    /// Upload `body` to `key` with a signed `PutObject` request.
    async fn put_object(&self, key: &str, body: bytes::Bytes, content_type: &str) -> Result<(), StoreError> {
        let location = self.location(key);
        let payload_hash = hex_sha256(&body);
        let signed = sign_request(
            "PUT",
            &location,
            &payload_hash,
            &self.creds,
            &self.config.region,
            Utc::now(),
        );

        let mut req_builder = self
            .client
            .put(location.url())
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date)
            .header("Content-Type", content_type)
            .body(body);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status,
                message: format!(
                    "PutObject s3://{}/{} failed: {}",
                    self.config.bucket,
                    key,
                    body.chars().take(500).collect::<String>()
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload(&self, item: &UploadItem, folder: &str) -> Result<ImageReference, StoreError> {
        if item.is_empty() {
            return Err(StoreError::Invalid("empty upload".to_string()));
        }

        let key = Self::object_key(folder, item);
        let content_type = item
            .content_type
            .clone()
            .unwrap_or_else(|| naming::detect_content_type(&key).to_string());

        debug!(
            bucket = %self.config.bucket,
            key = %key,
            bytes = item.len(),
            "Uploading object"
        );
        let start = Instant::now();
        self.put_object(&key, item.bytes.clone(), &content_type).await?;
        debug!(key = %key, elapsed = ?start.elapsed(), "Upload complete");

        Ok(ImageReference::new(self.public_url(&key)))
    }
}

// ============ AWS SigV4 Helpers ============

/// Headers produced by signing a request.
struct SignedRequest {
    authorization: String,
    amz_date: String,
}

/// Sign a request without query parameters.
///
/// Signed headers are `host`, `x-amz-content-sha256`, `x-amz-date`, and
/// `x-amz-security-token` when a session token is present.
fn sign_request(
    method: &str,
    location: &ObjectLocation,
    payload_hash: &str,
    creds: &AwsCredentials,
    region: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), location.host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, location.canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    SignedRequest {
        authorization,
        amz_date,
    }
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
