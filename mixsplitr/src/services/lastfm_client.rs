//! Last.fm enrichment client (`track.getInfo`)
//!
//! Supplies album title, album art and top tags for an already identified
//! track. Requires an API key.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::rate_limiter::{per_second, DirectRateLimiter};
use crate::types::{EnhancedMetadata, IdentificationCandidate, MetadataEnricher, ProviderError, ProviderId};

const LASTFM_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";
const USER_AGENT: &str = concat!("MixSplitR/", env!("CARGO_PKG_VERSION"));
const REQUESTS_PER_SECOND: u32 = 5;
const MAX_GENRES: usize = 3;

// Last.fm error codes
const ERROR_NOT_FOUND: i64 = 6;
const ERROR_INVALID_API_KEY: i64 = 10;
const ERROR_SUSPENDED_KEY: i64 = 26;
const ERROR_RATE_LIMIT: i64 = 29;

/// Image sizes from smallest to largest
const IMAGE_SIZES: [&str; 5] = ["small", "medium", "large", "extralarge", "mega"];

#[derive(Debug, Deserialize)]
struct TrackInfoResponse {
    track: Option<LfmTrack>,
    error: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LfmTrack {
    album: Option<LfmAlbum>,
    toptags: Option<LfmTopTags>,
}

#[derive(Debug, Deserialize)]
struct LfmAlbum {
    title: Option<String>,
    #[serde(default)]
    image: Vec<LfmImage>,
}

#[derive(Debug, Deserialize)]
struct LfmImage {
    #[serde(rename = "#text", default)]
    url: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct LfmTopTags {
    #[serde(default)]
    tag: Vec<LfmTag>,
}

#[derive(Debug, Deserialize)]
struct LfmTag {
    name: String,
}

/// Last.fm-backed [`MetadataEnricher`]
pub struct LastFmClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    rate_limiter: DirectRateLimiter,
}

impl LastFmClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            rate_limiter: per_second(REQUESTS_PER_SECOND),
        })
    }
}

/// Map a `track.getInfo` body to enrichment metadata
///
/// "Track not found" is an empty result, not an error.
pub fn parse_track_info(body: &str) -> Result<EnhancedMetadata, ProviderError> {
    let response: TrackInfoResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("Last.fm response: {}", e)))?;

    if let Some(code) = response.error {
        return match code {
            ERROR_NOT_FOUND => Ok(EnhancedMetadata::default()),
            ERROR_INVALID_API_KEY | ERROR_SUSPENDED_KEY => Err(ProviderError::Auth(response.message)),
            ERROR_RATE_LIMIT => Err(ProviderError::RateLimited(response.message)),
            _ => Err(ProviderError::Api(format!("code {}: {}", code, response.message))),
        };
    }

    let Some(track) = response.track else {
        return Ok(EnhancedMetadata::default());
    };

    let (album, artwork_url) = match track.album {
        Some(album) => (
            album.title.filter(|t| !t.trim().is_empty()),
            largest_image(&album.image),
        ),
        None => (None, None),
    };

    let genres = track
        .toptags
        .map(|t| t.tag.into_iter().map(|t| t.name).take(MAX_GENRES).collect())
        .unwrap_or_default();

    Ok(EnhancedMetadata {
        album,
        genres,
        artwork_url,
        ..Default::default()
    })
}

fn largest_image(images: &[LfmImage]) -> Option<String> {
    images
        .iter()
        .filter(|img| !img.url.trim().is_empty())
        .max_by_key(|img| IMAGE_SIZES.iter().position(|s| *s == img.size).unwrap_or(0))
        .map(|img| img.url.clone())
}

#[async_trait]
impl MetadataEnricher for LastFmClient {
    fn provider(&self) -> ProviderId {
        ProviderId::LastFm
    }

    async fn enrich(&self, candidate: &IdentificationCandidate) -> Result<EnhancedMetadata, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("Last.fm API key not configured".to_string()))?;

        self.rate_limiter.until_ready().await;
        debug!(artist = %candidate.artist, title = %candidate.title, "Querying Last.fm");

        let response = self
            .http_client
            .get(LASTFM_BASE_URL)
            .query(&[
                ("method", "track.getInfo"),
                ("api_key", api_key),
                ("artist", candidate.artist.as_str()),
                ("track", candidate.title.as_str()),
                ("autocorrect", "1"),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if status.is_server_error() {
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }
        // Error responses carry a JSON body with a Last.fm error code
        parse_track_info(&response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_info() {
        let body = r##"{
            "track": {
                "name": "Windowlicker",
                "album": {
                    "title": "Windowlicker",
                    "image": [
                        {"#text": "https://img/s.png", "size": "small"},
                        {"#text": "https://img/xl.png", "size": "extralarge"},
                        {"#text": "https://img/l.png", "size": "large"}
                    ]
                },
                "toptags": {"tag": [
                    {"name": "electronic"}, {"name": "idm"}, {"name": "aphex twin"}, {"name": "90s"}
                ]}
            }
        }"##;
        let meta = parse_track_info(body).unwrap();
        assert_eq!(meta.album.as_deref(), Some("Windowlicker"));
        assert_eq!(meta.artwork_url.as_deref(), Some("https://img/xl.png"));
        assert_eq!(meta.genres, vec!["electronic", "idm", "aphex twin"]);
        assert_eq!(meta.isrc, None);
    }

    #[test]
    fn test_parse_track_without_album() {
        let meta = parse_track_info(r#"{"track": {"name": "Loose"}}"#).unwrap();
        assert_eq!(meta, EnhancedMetadata::default());
    }

    #[test]
    fn test_blank_images_ignored() {
        let body = r##"{"track": {"album": {"title": "A", "image": [{"#text": "", "size": "mega"}]}}}"##;
        assert_eq!(parse_track_info(body).unwrap().artwork_url, None);
    }

    #[test]
    fn test_parse_errors() {
        let not_found = r#"{"error": 6, "message": "Track not found"}"#;
        assert_eq!(parse_track_info(not_found).unwrap(), EnhancedMetadata::default());

        let bad_key = r#"{"error": 10, "message": "Invalid API key"}"#;
        assert!(matches!(parse_track_info(bad_key), Err(ProviderError::Auth(_))));

        let throttled = r#"{"error": 29, "message": "Rate limit exceeded"}"#;
        assert!(matches!(parse_track_info(throttled), Err(ProviderError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error() {
        let client = LastFmClient::new(None, Duration::from_secs(1)).unwrap();
        let candidate = IdentificationCandidate::new(ProviderId::AcrCloud, "A", "T", 0.9);
        assert!(matches!(client.enrich(&candidate).await, Err(ProviderError::Auth(_))));
    }
}
