//! MusicBrainz metadata enrichment
//!
//! Looks up the chosen recording (by MBID when the recognizer supplied one,
//! otherwise by an artist/title search) and returns release album, year,
//! top genres by tag count, ISRC and label.
//!
//! MusicBrainz allows one request per second per client.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::rate_limiter::{pacer, DirectRateLimiter};
use crate::types::{year_from_date, EnhancedMetadata, IdentificationCandidate, MetadataEnricher, ProviderError, ProviderId};

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!(
    "MixSplitR/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/chefkjd/MixSplitR)"
);
const RATE_LIMIT: Duration = Duration::from_millis(1000);
const MAX_GENRES: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct MbRecording {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<MbTag>,
    #[serde(default)]
    pub isrcs: Vec<String>,
    #[serde(default)]
    pub releases: Vec<MbRelease>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbTag {
    pub name: String,
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbRelease {
    pub id: String,
    pub title: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MbSearchResponse {
    #[serde(default)]
    recordings: Vec<MbRecording>,
}

#[derive(Debug, Deserialize)]
struct MbReleaseLabels {
    #[serde(rename = "label-info", default)]
    label_info: Vec<MbLabelInfo>,
}

#[derive(Debug, Deserialize)]
struct MbLabelInfo {
    label: Option<MbLabel>,
}

#[derive(Debug, Deserialize)]
struct MbLabel {
    name: String,
}

/// MusicBrainz API client used as a [`MetadataEnricher`]
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    rate_limiter: DirectRateLimiter,
}

impl MusicBrainzClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: pacer(RATE_LIMIT),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Option<String>, ProviderError> {
        self.rate_limiter.until_ready().await;
        debug!(url = %url, "Querying MusicBrainz API");

        let response = self.http_client.get(url).query(query).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 503 || status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, text)));
        }
        Ok(Some(response.text().await?))
    }

    /// Lookup recording by MBID
    pub async fn lookup_recording(&self, mbid: &str) -> Result<Option<MbRecording>, ProviderError> {
        let url = format!("{}/recording/{}", MUSICBRAINZ_BASE_URL, mbid);
        let Some(body) = self
            .get_json(&url, &[("inc", "releases+tags+isrcs"), ("fmt", "json")])
            .await?
        else {
            return Ok(None);
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ProviderError::Parse(format!("MusicBrainz recording: {}", e)))
    }

    /// Best recording for an artist/title pair
    pub async fn search_recording(&self, artist: &str, title: &str) -> Result<Option<MbRecording>, ProviderError> {
        let url = format!("{}/recording", MUSICBRAINZ_BASE_URL);
        let query = search_query(artist, title);
        let Some(body) = self
            .get_json(&url, &[("query", query.as_str()), ("limit", "1"), ("fmt", "json")])
            .await?
        else {
            return Ok(None);
        };
        let response: MbSearchResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(format!("MusicBrainz search: {}", e)))?;
        Ok(response.recordings.into_iter().next())
    }

    /// First label of a release
    pub async fn release_label(&self, release_id: &str) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/release/{}", MUSICBRAINZ_BASE_URL, release_id);
        let Some(body) = self.get_json(&url, &[("inc", "labels"), ("fmt", "json")]).await? else {
            return Ok(None);
        };
        let release: MbReleaseLabels =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(format!("MusicBrainz release: {}", e)))?;
        Ok(release
            .label_info
            .into_iter()
            .filter_map(|li| li.label)
            .map(|l| l.name)
            .find(|n| !n.trim().is_empty()))
    }
}

/// Lucene query matching artist and recording title exactly
pub fn search_query(artist: &str, title: &str) -> String {
    fn quote(s: &str) -> String {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    }
    format!("artist:\"{}\" AND recording:\"{}\"", quote(artist), quote(title))
}

/// Metadata carried by a recording (label needs a separate release lookup)
pub fn metadata_from_recording(recording: &MbRecording) -> EnhancedMetadata {
    let mut tags = recording.tags.clone();
    // Stable sort keeps MusicBrainz order among equal counts
    tags.sort_by(|a, b| b.count.cmp(&a.count));

    let release = recording.releases.first();
    EnhancedMetadata {
        album: release.and_then(|r| r.title.clone()).filter(|t| !t.trim().is_empty()),
        year: release.and_then(|r| r.date.as_deref()).and_then(year_from_date),
        genres: tags.into_iter().map(|t| t.name).take(MAX_GENRES).collect(),
        isrc: recording.isrcs.first().cloned(),
        label: None,
        artwork_url: None,
    }
}

#[async_trait]
impl MetadataEnricher for MusicBrainzClient {
    fn provider(&self) -> ProviderId {
        ProviderId::MusicBrainz
    }

    async fn enrich(&self, candidate: &IdentificationCandidate) -> Result<EnhancedMetadata, ProviderError> {
        let recording = match candidate.recording_id.as_deref() {
            Some(mbid) => match self.lookup_recording(mbid).await? {
                Some(rec) => Some(rec),
                None => self.search_recording(&candidate.artist, &candidate.title).await?,
            },
            None => self.search_recording(&candidate.artist, &candidate.title).await?,
        };

        let Some(recording) = recording else {
            return Ok(EnhancedMetadata::default());
        };

        let mut metadata = metadata_from_recording(&recording);
        if candidate.provider_metadata.label.is_none() {
            if let Some(release) = recording.releases.first() {
                metadata.label = self.release_label(&release.id).await?;
            }
        }

        debug!(
            recording_id = %recording.id,
            title = %recording.title,
            genres = ?metadata.genres,
            "MusicBrainz enrichment"
        );
        Ok(metadata)
    }
}
