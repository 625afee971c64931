//! AcoustID/MusicBrainz identification client
//!
//! Fingerprints the start of a segment with Chromaprint (via
//! [`AudioFingerprinter`]) and looks the fingerprint up on AcoustID, which
//! answers with scored MusicBrainz recordings.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

use super::fingerprinter::AudioFingerprinter;
use super::rate_limiter::{per_second, DirectRateLimiter};
use super::segment_extractor::{materialize_temp_wav, SampleWindow, Segment};
use crate::types::{EnhancedMetadata, FingerprintClient, IdentificationCandidate, ProviderError, ProviderId};

const ACOUSTID_BASE_URL: &str = "https://api.acoustid.org/v2/lookup";
const USER_AGENT: &str = concat!("MixSplitR/", env!("CARGO_PKG_VERSION"));
const REQUESTS_PER_SECOND: u32 = 3;

/// Public application key used when the user has none (best-effort mode)
pub const PUBLIC_CLIENT_KEY: &str = "8XaBELgH";

/// Chromaprint only looks at the first two minutes
const FINGERPRINT_SECONDS: f64 = 120.0;

/// Matches at or below this score are discarded
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

// AcoustID error codes
const ERROR_INVALID_API_KEY: i64 = 4;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<LookupResult>,
    error: Option<LookupError>,
}

#[derive(Debug, Deserialize)]
struct LookupError {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    score: f64,
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
    #[serde(default)]
    releasegroups: Vec<ReleaseGroup>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
    joinphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroup {
    title: Option<String>,
}

/// AcoustID-backed [`FingerprintClient`]
pub struct AcoustIdClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    fingerprinter: Arc<dyn AudioFingerprinter>,
    rate_limiter: DirectRateLimiter,
    scratch: TempDir,
    min_score: f64,
}

impl AcoustIdClient {
    pub fn new(
        api_key: Option<String>,
        fingerprinter: Arc<dyn AudioFingerprinter>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let scratch = tempfile::Builder::new()
            .prefix("mixsplitr-fp-")
            .tempdir()
            .map_err(|e| ProviderError::Unavailable(format!("scratch directory: {}", e)))?;

        Ok(Self {
            http_client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            fingerprinter,
            rate_limiter: per_second(REQUESTS_PER_SECOND),
            scratch,
            min_score: DEFAULT_MIN_SCORE,
        })
    }

    async fn lookup(&self, api_key: &str, fingerprint: &str, duration: u64) -> Result<String, ProviderError> {
        let duration = duration.to_string();
        let params = [
            ("client", api_key),
            ("meta", "recordings releasegroups"),
            ("duration", duration.as_str()),
            ("fingerprint", fingerprint),
            ("format", "json"),
        ];

        let response = self.http_client.post(ACOUSTID_BASE_URL).form(&params).send().await?;
        let status = response.status();

        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if status.is_server_error() {
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }
        if status.as_u16() == 401 {
            return Err(ProviderError::Auth("invalid API key".to_string()));
        }
        // 400 responses still carry a JSON error body
        Ok(response.text().await?)
    }
}

/// Map a lookup response body to candidates scoring above `min_score`
pub fn parse_lookup_response(body: &str, min_score: f64) -> Result<Vec<IdentificationCandidate>, ProviderError> {
    let response: LookupResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("AcoustID response: {}", e)))?;

    if response.status != "ok" {
        let (code, message) = response
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or((0, "unknown error".to_string()));
        if code == ERROR_INVALID_API_KEY {
            return Err(ProviderError::Auth(message));
        }
        if message.to_lowercase().contains("rate") {
            return Err(ProviderError::RateLimited(message));
        }
        return Err(ProviderError::Api(format!("code {}: {}", code, message)));
    }

    let mut results = response.results;
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();
    for result in results.into_iter().filter(|r| r.score > min_score) {
        for recording in result.recordings {
            let Some(title) = recording.title.filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            if recording.artists.is_empty() || !seen.insert(recording.id.clone()) {
                continue;
            }
            let artist = join_artists(&recording.artists);
            let album = recording.releasegroups.into_iter().find_map(|rg| rg.title);

            let rank = candidates.len();
            candidates.push(
                IdentificationCandidate::new(ProviderId::AcoustId, artist, title, result.score)
                    .with_album(album.clone())
                    .with_rank(rank)
                    .with_recording_id(Some(recording.id))
                    .with_provider_metadata(EnhancedMetadata {
                        album,
                        ..Default::default()
                    }),
            );
        }
    }
    Ok(candidates)
}

fn join_artists(artists: &[Artist]) -> String {
    let mut out = String::new();
    for (i, artist) in artists.iter().enumerate() {
        out.push_str(&artist.name);
        if i + 1 < artists.len() {
            out.push_str(artist.joinphrase.as_deref().unwrap_or(", "));
        }
    }
    out
}

#[async_trait]
impl FingerprintClient for AcoustIdClient {
    fn provider(&self) -> ProviderId {
        ProviderId::AcoustId
    }

    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    async fn identify(&self, segment: &Segment) -> Result<Vec<IdentificationCandidate>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("AcoustID API key not configured".to_string()))?;

        // WAV encoding is blocking file IO
        let owned = segment.clone();
        let dir = self.scratch.path().to_path_buf();
        let wav = tokio::task::spawn_blocking(move || {
            materialize_temp_wav(&owned, SampleWindow::Leading { seconds: FINGERPRINT_SECONDS }, &dir)
        })
        .await
        .map_err(|e| ProviderError::Extraction(e.to_string()))?
        .map_err(|e| ProviderError::Extraction(e.to_string()))?;

        // Dropping `wav` removes the clip, also when this call is abandoned
        let fingerprint = self.fingerprinter.fingerprint(wav.path()).await?;
        drop(wav);

        debug!(
            segment_index = segment.index,
            fingerprint_duration = fingerprint.duration,
            "Querying AcoustID"
        );

        // AcoustID wants the full track length, not the fingerprinted window
        let duration = segment.duration_seconds().round().max(1.0) as u64;
        let body = self.lookup(api_key, &fingerprint.fingerprint, duration).await?;
        let candidates = parse_lookup_response(&body, self.min_score)?;

        if let Some(best) = candidates.first() {
            info!(
                segment_index = segment.index,
                artist = %best.artist,
                title = %best.title,
                confidence = best.confidence,
                "AcoustID match"
            );
        }
        Ok(candidates)
    }
}
