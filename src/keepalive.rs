//! Periodic self-ping.
//!
//! Some hosting platforms idle a service that receives no traffic. When
//! `[keepalive].url` is set, the server pings that URL every
//! `interval_secs` seconds. Failures are logged and never stop the loop.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::KeepAliveConfig;

/// Spawn the keep-alive loop, or return `None` when no URL is configured.
pub fn spawn(config: &KeepAliveConfig) -> Option<JoinHandle<()>> {
    let url = config.url.clone()?;
    let interval = Duration::from_secs(config.interval_secs.max(1));

    Some(tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so the first ping
        // happens one interval after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            ping(&client, &url).await;
        }
    }))
}

/// Send one GET to `url` and log the outcome. Returns the HTTP status.
pub async fn ping(client: &reqwest::Client, url: &str) -> Option<u16> {
    match client
        .get(url)
        .header("User-Agent", concat!("catimg/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status().as_u16();
            info!(url, status, "Self-ping sent");
            Some(status)
        }
        Err(e) => {
            warn!(url, error = %e, "Self-ping failed");
            None
        }
    }
}
