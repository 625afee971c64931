//! Core types for segment identification and output
//!
//! Shared by the provider clients, the identification pipeline and the track
//! assembler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::services::segment_extractor::Segment;

pub use mixsplitr_common::ProviderId;

// ============================================================================
// Provider capabilities
// ============================================================================

/// Recognition provider: "what is this audio"
///
/// Credentials are injected when the client is built. A client built without
/// them answers every call with [`ProviderError::Auth`].
#[async_trait]
pub trait FingerprintClient: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Wait for the provider's request pacing to allow one more call
    ///
    /// Awaited before every [`identify`](Self::identify) and not counted
    /// against the call timeout.
    async fn ready(&self) {}

    /// Identify one segment
    ///
    /// An empty vector means the query succeeded and nothing matched.
    async fn identify(&self, segment: &Segment) -> Result<Vec<IdentificationCandidate>, ProviderError>;
}

/// Enrichment provider: fills metadata for an already chosen match
///
/// The returned [`EnhancedMetadata`] carries no artist or title, so an
/// enricher cannot change which track was identified. An enrichment may take
/// several paced requests; each request is bounded by the enricher's own
/// transport timeout rather than one timeout around the whole call.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Whether this enricher could add anything to `metadata`
    fn wants(&self, metadata: &EnhancedMetadata) -> bool {
        !metadata.is_complete()
    }

    async fn enrich(&self, candidate: &IdentificationCandidate) -> Result<EnhancedMetadata, ProviderError>;
}

/// Failure of a single provider call
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A local prerequisite (e.g. the fingerprint tool) is missing
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// The segment could not be prepared for this provider
    #[error("segment extraction failed: {0}")]
    Extraction(String),
}

impl ProviderError {
    /// Transport failures are worth another try
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

// ============================================================================
// Candidates and results
// ============================================================================

/// One provider's answer for a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationCandidate {
    pub provider: ProviderId,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    /// Normalized to [0, 1]
    pub confidence: f64,
    /// Position in the provider's own ranking (0 = best)
    pub rank: usize,
    /// MusicBrainz recording MBID when known
    pub recording_id: Option<String>,
    /// Provider-specific id (ACRCloud acrid)
    pub external_id: Option<String>,
    /// Extra metadata the provider returned alongside the match
    #[serde(default)]
    pub provider_metadata: EnhancedMetadata,
}

impl IdentificationCandidate {
    pub fn new(
        provider: ProviderId,
        artist: impl Into<String>,
        title: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            provider,
            artist: artist.into(),
            title: title.into(),
            album: None,
            confidence: clamp_confidence(confidence),
            rank: 0,
            recording_id: None,
            external_id: None,
            provider_metadata: EnhancedMetadata::default(),
        }
    }

    pub fn with_album(mut self, album: Option<String>) -> Self {
        self.album = album.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_recording_id(mut self, id: Option<String>) -> Self {
        self.recording_id = id;
        self
    }

    pub fn with_external_id(mut self, id: Option<String>) -> Self {
        self.external_id = id;
        self
    }

    pub fn with_provider_metadata(mut self, metadata: EnhancedMetadata) -> Self {
        self.provider_metadata = metadata;
        self
    }

    /// `Artist - Title`
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// What came back from one provider for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched { candidates: Vec<IdentificationCandidate> },
    NoMatch,
    Failed { error: ProviderError },
    /// Not queried (provider throttled for the rest of the run)
    Skipped { reason: String },
}

/// Provenance entry: one provider consulted for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: ProviderId,
    pub outcome: AttemptOutcome,
    /// Number of calls made, including retries
    pub tries: u32,
    pub elapsed_ms: u64,
}

impl ProviderAttempt {
    pub fn candidates(&self) -> &[IdentificationCandidate] {
        match &self.outcome {
            AttemptOutcome::Matched { candidates } => candidates,
            _ => &[],
        }
    }
}

/// How the final candidate was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMethod {
    /// Reached the accept threshold; later providers were not queried
    EarlyAccept,
    /// Only one candidate was produced
    SingleCandidate,
    /// All candidates named the same track
    Consensus,
    /// Conflicting candidates; highest confidence won outright
    HighestConfidence,
    /// Conflicting candidates tied on confidence; provider priority decided
    PriorityTieBreak,
}

/// Why a segment ended up unidentified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnidentifiedReason {
    /// Run mode skips identification
    SplitOnly,
    /// Shorter than the minimum identifiable duration
    TooShort,
    /// Every provider returned nothing or failed
    NoMatch,
    /// The run was cancelled before this segment was queried
    Cancelled,
    /// The segment could not be materialized
    ExtractionFailed { message: String },
}

/// Final decision for a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    Identified {
        candidate: IdentificationCandidate,
        method: ReconciliationMethod,
    },
    Unidentified {
        reason: UnidentifiedReason,
    },
}

/// Reconciled identification for exactly one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub segment_index: usize,
    pub decision: Decision,
    /// Every provider consulted, in query order, with its raw answer
    pub attempts: Vec<ProviderAttempt>,
    #[serde(default)]
    pub metadata: EnhancedMetadata,
}

impl IdentificationResult {
    pub fn unidentified(segment_index: usize, reason: UnidentifiedReason, attempts: Vec<ProviderAttempt>) -> Self {
        Self {
            segment_index,
            decision: Decision::Unidentified { reason },
            attempts,
            metadata: EnhancedMetadata::default(),
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self.decision, Decision::Identified { .. })
    }

    pub fn candidate(&self) -> Option<&IdentificationCandidate> {
        match &self.decision {
            Decision::Identified { candidate, .. } => Some(candidate),
            Decision::Unidentified { .. } => None,
        }
    }

    pub fn providers_consulted(&self) -> Vec<ProviderId> {
        self.attempts.iter().map(|a| a.provider).collect()
    }
}

/// Supplementary metadata gathered after a match was chosen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedMetadata {
    pub album: Option<String>,
    pub year: Option<u32>,
    pub genres: Vec<String>,
    pub isrc: Option<String>,
    pub label: Option<String>,
    pub artwork_url: Option<String>,
}

impl EnhancedMetadata {
    /// Fill fields still missing from `other`; present values are kept
    pub fn fill_from(&mut self, other: EnhancedMetadata) {
        if self.album.is_none() {
            self.album = other.album;
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.genres.is_empty() {
            self.genres = other.genres;
        }
        if self.isrc.is_none() {
            self.isrc = other.isrc;
        }
        if self.label.is_none() {
            self.label = other.label;
        }
        if self.artwork_url.is_none() {
            self.artwork_url = other.artwork_url;
        }
    }

    /// Nothing left that an enricher could add
    pub fn is_complete(&self) -> bool {
        self.album.is_some()
            && self.year.is_some()
            && !self.genres.is_empty()
            && self.isrc.is_some()
            && self.label.is_some()
            && self.artwork_url.is_some()
    }
}

/// Parse the leading year of a `YYYY[-MM[-DD]]` date
pub fn year_from_date(date: &str) -> Option<u32> {
    let digits: String = date.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

// ============================================================================
// Output
// ============================================================================

/// Tags written into an output file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub isrc: Option<String>,
    pub label: Option<String>,
    pub track_number: u32,
}

/// What happened to an output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputStatus {
    Written,
    /// The identified track already exists in the output library
    SkippedExisting,
    /// Preview run: path chosen, nothing written
    Planned,
    Failed { error: String },
}

/// Final artifact for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTrack {
    pub segment_index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub path: PathBuf,
    pub tags: TrackTags,
    pub identified: bool,
    pub source: Option<ProviderId>,
    pub status: OutputStatus,
}

impl OutputTrack {
    pub fn is_written(&self) -> bool {
        self.status == OutputStatus::Written
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutputStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let c = IdentificationCandidate::new(ProviderId::AcrCloud, "A", "T", 1.7);
        assert_eq!(c.confidence, 1.0);
        let c = IdentificationCandidate::new(ProviderId::AcrCloud, "A", "T", -0.2);
        assert_eq!(c.confidence, 0.0);
        let c = IdentificationCandidate::new(ProviderId::AcrCloud, "A", "T", f64::NAN);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_blank_album_dropped() {
        let c = IdentificationCandidate::new(ProviderId::AcoustId, "A", "T", 0.5)
            .with_album(Some("  ".into()));
        assert_eq!(c.album, None);
    }

    #[test]
    fn test_fill_from_keeps_existing_values() {
        let mut meta = EnhancedMetadata {
            album: Some("First".into()),
            ..Default::default()
        };
        meta.fill_from(EnhancedMetadata {
            album: Some("Second".into()),
            year: Some(1999),
            genres: vec!["house".into()],
            ..Default::default()
        });
        assert_eq!(meta.album.as_deref(), Some("First"));
        assert_eq!(meta.year, Some(1999));
        assert_eq!(meta.genres, vec!["house".to_string()]);
        assert!(!meta.is_complete());
    }

    #[test]
    fn test_year_from_date() {
        assert_eq!(year_from_date("2004-05-17"), Some(2004));
        assert_eq!(year_from_date("1987"), Some(1987));
        assert_eq!(year_from_date("87"), None);
        assert_eq!(year_from_date(""), None);
    }

    #[test]
    fn test_provider_error_serialization() {
        let json = serde_json::to_value(ProviderError::Network("timeout".into())).unwrap();
        assert_eq!(json["kind"], "network");
        assert_eq!(json["message"], "timeout");
        assert!(ProviderError::Network("x".into()).is_retryable());
        assert!(!ProviderError::Auth("x".into()).is_retryable());
    }
}
