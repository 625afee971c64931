//! ACRCloud identification client
//!
//! Uploads a short WAV clip from the middle of the segment to the ACRCloud
//! `/v1/identify` endpoint. Requests are signed with HMAC-SHA1 over the
//! canonical request string and paced to one request per 1.2s.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, info};

use super::rate_limiter::{pacer, DirectRateLimiter};
use super::segment_extractor::{materialize_wav, SampleWindow, Segment};
use crate::types::{
    year_from_date, EnhancedMetadata, FingerprintClient, IdentificationCandidate, ProviderError, ProviderId,
};
use mixsplitr_common::credentials::Credentials;

const HTTP_URI: &str = "/v1/identify";
const DATA_TYPE: &str = "audio";
const SIGNATURE_VERSION: &str = "1";
const USER_AGENT: &str = concat!("MixSplitR/", env!("CARGO_PKG_VERSION"));

/// Length of the clip sent for recognition
pub const SAMPLE_SECONDS: f64 = 12.0;
/// Minimum spacing between requests
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1200);

// ACRCloud status codes
const CODE_SUCCESS: i64 = 0;
const CODE_NO_RESULT: i64 = 1001;
const CODE_NO_FINGERPRINT: i64 = 2004;
const CODE_INVALID_KEY: i64 = 3001;
const CODE_LIMIT_EXCEEDED: i64 = 3003;
const CODE_INVALID_SIGNATURE: i64 = 3014;
const CODE_TRIAL_EXPIRED: i64 = 3015;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Deserialize)]
struct AcrResponse {
    status: AcrStatus,
    metadata: Option<AcrMetadata>,
}

#[derive(Debug, Deserialize)]
struct AcrStatus {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AcrMetadata {
    #[serde(default)]
    music: Vec<AcrMusic>,
}

#[derive(Debug, Deserialize)]
struct AcrMusic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artists: Vec<AcrName>,
    album: Option<AcrAlbum>,
    score: Option<f64>,
    acrid: Option<String>,
    release_date: Option<String>,
    label: Option<String>,
    #[serde(default)]
    genres: Vec<AcrName>,
    external_ids: Option<AcrExternalIds>,
    external_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AcrName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AcrAlbum {
    name: Option<String>,
    cover: Option<AcrCover>,
}

#[derive(Debug, Deserialize)]
struct AcrCover {
    large: Option<String>,
    medium: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcrExternalIds {
    isrc: Option<serde_json::Value>,
}

/// ACRCloud-backed [`FingerprintClient`]
pub struct AcrCloudClient {
    http_client: reqwest::Client,
    credentials: Option<Credentials>,
    rate_limiter: DirectRateLimiter,
}

impl AcrCloudClient {
    pub fn new(credentials: Option<Credentials>, timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            credentials,
            rate_limiter: pacer(MIN_REQUEST_INTERVAL),
        })
    }

    fn endpoint(host: &str) -> String {
        let host = host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}{}", host, HTTP_URI)
        } else {
            format!("https://{}{}", host, HTTP_URI)
        }
    }
}

/// Canonical string signed for an identify request
pub fn string_to_sign(access_key: &str, timestamp: i64) -> String {
    format!(
        "POST\n{}\n{}\n{}\n{}\n{}",
        HTTP_URI, access_key, DATA_TYPE, SIGNATURE_VERSION, timestamp
    )
}

/// Base64 HMAC-SHA1 signature
pub fn sign(string_to_sign: &str, access_secret: &str) -> Result<String, ProviderError> {
    let mut mac = HmacSha1::new_from_slice(access_secret.as_bytes())
        .map_err(|e| ProviderError::Auth(format!("unusable access secret: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Map an identify response body to candidates
pub fn parse_identify_response(body: &str) -> Result<Vec<IdentificationCandidate>, ProviderError> {
    let response: AcrResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("ACRCloud response: {}", e)))?;

    match response.status.code {
        CODE_SUCCESS => {}
        CODE_NO_RESULT | CODE_NO_FINGERPRINT => return Ok(Vec::new()),
        CODE_INVALID_KEY | CODE_INVALID_SIGNATURE | CODE_TRIAL_EXPIRED => {
            return Err(ProviderError::Auth(response.status.msg));
        }
        CODE_LIMIT_EXCEEDED => return Err(ProviderError::RateLimited(response.status.msg)),
        code => {
            return Err(ProviderError::Api(format!("status {}: {}", code, response.status.msg)));
        }
    }

    let music = response.metadata.map(|m| m.music).unwrap_or_default();
    let candidates = music
        .into_iter()
        .filter_map(|m| {
            let artist = m.artists.first()?.name.trim().to_string();
            let title = m.title.trim().to_string();
            if artist.is_empty() || title.is_empty() {
                return None;
            }
            Some((m, artist, title))
        })
        .enumerate()
        .map(|(rank, (m, artist, title))| {
            // Scores are 0-100; a match without one is a confident hit
            let confidence = m.score.unwrap_or(100.0) / 100.0;
            let (album, artwork_url) = match m.album {
                Some(album) => {
                    let cover = album.cover.and_then(|c| c.large.or(c.medium));
                    (album.name, cover)
                }
                None => (None, None),
            };
            let metadata = EnhancedMetadata {
                album: album.clone(),
                year: m.release_date.as_deref().and_then(year_from_date),
                genres: m.genres.into_iter().map(|g| g.name).take(3).collect(),
                isrc: m.external_ids.and_then(|ids| first_string(ids.isrc.as_ref())),
                label: m.label.filter(|l| !l.trim().is_empty()),
                artwork_url,
            };
            let recording_id = m
                .external_metadata
                .as_ref()
                .and_then(|meta| meta.get("musicbrainz"))
                .and_then(musicbrainz_track_id);

            IdentificationCandidate::new(ProviderId::AcrCloud, artist, title, confidence)
                .with_album(album)
                .with_rank(rank)
                .with_external_id(m.acrid)
                .with_recording_id(recording_id)
                .with_provider_metadata(metadata)
        })
        .collect();

    Ok(candidates)
}

/// ISRC may be a string or a list of strings
fn first_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

/// `external_metadata.musicbrainz` is an object or a list of objects
fn musicbrainz_track_id(value: &serde_json::Value) -> Option<String> {
    let entry = match value {
        serde_json::Value::Array(items) => items.first()?,
        other => other,
    };
    entry
        .get("track")
        .and_then(|t| t.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

#[async_trait]
impl FingerprintClient for AcrCloudClient {
    fn provider(&self) -> ProviderId {
        ProviderId::AcrCloud
    }

    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    async fn identify(&self, segment: &Segment) -> Result<Vec<IdentificationCandidate>, ProviderError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| ProviderError::Auth("ACRCloud credentials not configured".to_string()))?;
        let host = creds
            .host
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("ACRCloud host not configured".to_string()))?;
        let secret = creds
            .secret
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("ACRCloud access secret not configured".to_string()))?;

        let sample = materialize_wav(segment, SampleWindow::Middle { seconds: SAMPLE_SECONDS })
            .map_err(|e| ProviderError::Extraction(e.to_string()))?;

        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(&string_to_sign(&creds.key, timestamp), secret)?;
        let sample_bytes = sample.len();

        let part = reqwest::multipart::Part::bytes(sample)
            .file_name(format!("segment_{:03}.wav", segment.index))
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("sample", part)
            .text("access_key", creds.key.clone())
            .text("data_type", DATA_TYPE)
            .text("signature_version", SIGNATURE_VERSION)
            .text("signature", signature)
            .text("sample_bytes", sample_bytes.to_string())
            .text("timestamp", timestamp.to_string());

        debug!(segment_index = segment.index, sample_bytes, "Querying ACRCloud");

        let response = self
            .http_client
            .post(Self::endpoint(host))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::Auth(format!("HTTP {}", status)));
        }
        if status.is_server_error() {
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, text)));
        }

        let body = response.text().await?;
        let candidates = parse_identify_response(&body)?;

        if let Some(best) = candidates.first() {
            info!(
                segment_index = segment.index,
                artist = %best.artist,
                title = %best.title,
                confidence = best.confidence,
                "ACRCloud match"
            );
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCH_BODY: &str = r#"{
        "status": {"msg": "Success", "code": 0, "version": "1.0"},
        "metadata": {
            "music": [
                {
                    "title": "Windowlicker",
                    "artists": [{"name": "Aphex Twin"}],
                    "album": {"name": "Windowlicker", "cover": {"large": "https://img.example/large.jpg"}},
                    "score": 92,
                    "acrid": "abc123",
                    "release_date": "1999-03-22",
                    "label": "Warp",
                    "genres": [{"name": "Electronic"}],
                    "external_ids": {"isrc": "GBBPW9900001"},
                    "external_metadata": {"musicbrainz": [{"track": {"id": "mbid-1"}}]}
                },
                {
                    "title": "Untitled",
                    "artists": [],
                    "score": 50
                }
            ]
        },
        "result_type": 0
    }"#;

    #[test]
    fn test_signature_known_vector() {
        // RFC 2202 test case 2
        let sig = sign("what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(sig, BASE64.encode(hex("effcdf6ae5eb2fa2d27416d5f184df9c259a7c79")));
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_string_to_sign_layout() {
        assert_eq!(
            string_to_sign("KEY", 1700000000),
            "POST\n/v1/identify\nKEY\naudio\n1\n1700000000"
        );
    }

    #[test]
    fn test_parse_match() {
        let candidates = parse_identify_response(MATCH_BODY).unwrap();
        // Second entry has no artist and is dropped
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.artist, "Aphex Twin");
        assert_eq!(c.title, "Windowlicker");
        assert_eq!(c.album.as_deref(), Some("Windowlicker"));
        assert!((c.confidence - 0.92).abs() < 1e-9);
        assert_eq!(c.external_id.as_deref(), Some("abc123"));
        assert_eq!(c.recording_id.as_deref(), Some("mbid-1"));
        assert_eq!(c.provider_metadata.year, Some(1999));
        assert_eq!(c.provider_metadata.label.as_deref(), Some("Warp"));
        assert_eq!(c.provider_metadata.isrc.as_deref(), Some("GBBPW9900001"));
        assert_eq!(
            c.provider_metadata.artwork_url.as_deref(),
            Some("https://img.example/large.jpg")
        );
    }

    #[test]
    fn test_parse_status_codes() {
        let body = |code: i64| format!(r#"{{"status": {{"msg": "m", "code": {}}}}}"#, code);
        assert_eq!(parse_identify_response(&body(1001)).unwrap(), vec![]);
        assert!(matches!(parse_identify_response(&body(3001)), Err(ProviderError::Auth(_))));
        assert!(matches!(parse_identify_response(&body(3014)), Err(ProviderError::Auth(_))));
        assert!(matches!(
            parse_identify_response(&body(3003)),
            Err(ProviderError::RateLimited(_))
        ));
        assert!(matches!(parse_identify_response(&body(3000)), Err(ProviderError::Api(_))));
        assert!(matches!(parse_identify_response("<html>"), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            AcrCloudClient::endpoint("identify-eu-west-1.acrcloud.com"),
            "https://identify-eu-west-1.acrcloud.com/v1/identify"
        );
        assert_eq!(
            AcrCloudClient::endpoint("http://127.0.0.1:9000/"),
            "http://127.0.0.1:9000/v1/identify"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_error() {
        use crate::utils::MixSource;
        use crate::workflow::boundary_detector::Boundary;
        use std::sync::Arc;

        let source = Arc::new(MixSource::from_interleaved(vec![0.1; 2000], 100, 1).unwrap());
        let segments = crate::services::segment_extractor::extract(&source, &Boundary::whole(20.0));
        let client = AcrCloudClient::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.identify(&segments[0]).await,
            Err(ProviderError::Auth(_))
        ));
    }
}
