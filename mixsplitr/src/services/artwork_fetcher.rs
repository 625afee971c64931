//! Cover art download with a per-run cache
//!
//! Each URL is fetched at most once per run; failures are cached too so a
//! broken URL shared by several tracks is not retried for each of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::ProviderError;

const USER_AGENT: &str = concat!("MixSplitR/", env!("CARGO_PKG_VERSION"));
const MAX_ARTWORK_BYTES: usize = 10 * 1024 * 1024;

/// Downloaded image bytes
pub type Artwork = Arc<Vec<u8>>;

/// Resolve size placeholders (`{w}x{h}`) used by some cover URLs
pub fn normalize_artwork_url(url: &str) -> String {
    url.trim().replace("{w}x{h}", "600x600")
}

pub struct ArtworkFetcher {
    http_client: reqwest::Client,
    cache: Mutex<HashMap<String, Option<Artwork>>>,
}

impl ArtworkFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Image bytes for `url`, or `None` if it cannot be downloaded
    pub async fn fetch(&self, url: &str) -> Option<Artwork> {
        let url = normalize_artwork_url(url);
        if url.is_empty() {
            return None;
        }

        // Lock held across the download so concurrent tracks share one request
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&url) {
            return cached.clone();
        }

        let artwork = match self.download(&url).await {
            Ok(bytes) => {
                debug!(url = %url, bytes = bytes.len(), "Artwork downloaded");
                Some(Arc::new(bytes))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Artwork download failed");
                None
            }
        };
        cache.insert(url, artwork.clone());
        artwork
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api(format!("HTTP {}", status)));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Parse("empty image".to_string()));
        }
        if bytes.len() > MAX_ARTWORK_BYTES {
            return Err(ProviderError::Parse(format!("image too large ({} bytes)", bytes.len())));
        }
        Ok(bytes.to_vec())
    }

    /// Seed the cache with bytes obtained elsewhere
    pub async fn insert(&self, url: &str, artwork: Artwork) {
        self.cache.lock().await.insert(normalize_artwork_url(url), Some(artwork));
    }
}
