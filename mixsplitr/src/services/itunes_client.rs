//! iTunes Search API artwork lookup
//!
//! Keyless last resort for cover art. Only ever fills `artwork_url`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::rate_limiter::{pacer, DirectRateLimiter};
use crate::types::{EnhancedMetadata, IdentificationCandidate, MetadataEnricher, ProviderError, ProviderId};

const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";
const USER_AGENT: &str = concat!("MixSplitR/", env!("CARGO_PKG_VERSION"));
// Apple documents roughly 20 calls per minute
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "resultCount", default)]
    result_count: u32,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

pub struct ItunesClient {
    http_client: reqwest::Client,
    rate_limiter: DirectRateLimiter,
}

impl ItunesClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            rate_limiter: pacer(MIN_REQUEST_INTERVAL),
        })
    }
}

/// Upscale the 100px thumbnail URL to 600px
pub fn upscale_artwork_url(url: &str) -> String {
    url.replace("100x100bb", "600x600bb")
}

/// Artwork URL of the first search result
pub fn parse_search_response(body: &str) -> Result<Option<String>, ProviderError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("iTunes response: {}", e)))?;
    if response.result_count == 0 {
        return Ok(None);
    }
    Ok(response
        .results
        .into_iter()
        .next()
        .and_then(|r| r.artwork_url_100)
        .filter(|u| !u.trim().is_empty())
        .map(|u| upscale_artwork_url(&u)))
}

#[async_trait]
impl MetadataEnricher for ItunesClient {
    fn provider(&self) -> ProviderId {
        ProviderId::Itunes
    }

    fn wants(&self, metadata: &EnhancedMetadata) -> bool {
        metadata.artwork_url.is_none()
    }

    async fn enrich(&self, candidate: &IdentificationCandidate) -> Result<EnhancedMetadata, ProviderError> {
        self.rate_limiter.until_ready().await;

        let term = format!("{} {}", candidate.artist, candidate.title);
        debug!(term = %term, "Searching iTunes for artwork");

        let response = self
            .http_client
            .get(ITUNES_SEARCH_URL)
            .query(&[("term", term.as_str()), ("entity", "song"), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }

        Ok(EnhancedMetadata {
            artwork_url: parse_search_response(&response.text().await?)?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_upscales_artwork() {
        let body = r#"{"resultCount": 1, "results": [
            {"trackName": "Strobe", "artworkUrl100": "https://is1.mzstatic.com/image/thumb/x/100x100bb.jpg"}
        ]}"#;
        assert_eq!(
            parse_search_response(body).unwrap().as_deref(),
            Some("https://is1.mzstatic.com/image/thumb/x/600x600bb.jpg")
        );
    }

    #[test]
    fn test_parse_search_empty() {
        assert_eq!(parse_search_response(r#"{"resultCount": 0, "results": []}"#).unwrap(), None);
        assert!(matches!(parse_search_response("<html>"), Err(ProviderError::Parse(_))));
    }
}
