//! Per-segment identification with provider fallback
//!
//! Providers are trait objects ordered by run mode. For each segment:
//!
//! ```text
//! Pending -> Querying(p1) -> Accepted
//!                         -> NextProvider -> Querying(p2) -> ...
//!                                                        -> Unidentified
//! ```
//!
//! Distinct segments are identified concurrently (bounded by
//! `max_concurrent_identifications`); providers within a segment are queried
//! one after another. Provider failures never fail the run: they are
//! recorded in the segment's provenance and the next provider is tried.

use futures::stream::{self, StreamExt};
use mixsplitr_common::events::{EventBus, MixEvent, SegmentPhase};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconciliation::reconcile;
use crate::config::{RunConfig, RunMode};
use crate::services::acoustid_client::{AcoustIdClient, PUBLIC_CLIENT_KEY};
use crate::services::acrcloud_client::AcrCloudClient;
use crate::services::fingerprinter::{AudioFingerprinter, FpcalcFingerprinter};
use crate::services::itunes_client::ItunesClient;
use crate::services::lastfm_client::LastFmClient;
use crate::services::musicbrainz_client::MusicBrainzClient;
use crate::services::rate_limiter::{backoff_delay, ThrottleTracker};
use crate::services::segment_extractor::Segment;
use crate::types::{
    AttemptOutcome, Decision, EnhancedMetadata, FingerprintClient, IdentificationCandidate, IdentificationResult,
    MetadataEnricher, ProviderAttempt, ProviderError, ProviderId, UnidentifiedReason,
};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Pipeline tuning, usually derived from [`RunConfig`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub accept_confidence_threshold: f64,
    pub max_concurrent_identifications: usize,
    pub provider_timeout: Duration,
    pub retry_count: u32,
    pub retry_base_delay: Duration,
    pub throttle_skip_after: u32,
    pub min_identify_duration: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_run_config(&RunConfig::default())
    }
}

impl PipelineConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            accept_confidence_threshold: config.accept_confidence_threshold,
            max_concurrent_identifications: config.max_concurrent_identifications,
            provider_timeout: config.provider_timeout(),
            retry_count: config.retry_count,
            retry_base_delay: config.retry_base_delay,
            throttle_skip_after: config.throttle_skip_after,
            min_identify_duration: config.min_identify_duration,
        }
    }
}

/// Identifies segments against an ordered list of providers
pub struct IdentificationPipeline {
    mode: RunMode,
    providers: Vec<Arc<dyn FingerprintClient>>,
    enrichers: Vec<Arc<dyn MetadataEnricher>>,
    config: PipelineConfig,
    throttle: ThrottleTracker,
    events: EventBus,
    cancel: CancellationToken,
}

impl IdentificationPipeline {
    pub fn new(mode: RunMode, providers: Vec<Arc<dyn FingerprintClient>>, config: PipelineConfig) -> Self {
        let throttle = ThrottleTracker::new(config.throttle_skip_after);
        Self {
            mode,
            providers,
            enrichers: Vec::new(),
            config,
            throttle,
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Enrichers run in order after a candidate is chosen
    pub fn with_enrichers(mut self, enrichers: Vec<Arc<dyn MetadataEnricher>>) -> Self {
        self.enrichers = enrichers;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the provider chain for `mode` from resolved settings
    ///
    /// ACRCloud joins only when credentials exist (`AutoTracklist`) or is
    /// always queried first (`AcrPlusMusicBrainz`, where missing credentials
    /// surface as an auth failure in provenance). AcoustID falls back to the
    /// public client key when none is configured.
    pub fn from_run_config(mode: RunMode, config: &RunConfig) -> Result<Self, ProviderError> {
        let timeout = config.provider_timeout();
        let acr_credentials = config.credentials.get_credentials(ProviderId::AcrCloud).cloned();
        let acoustid_key = config
            .credentials
            .get_credentials(ProviderId::AcoustId)
            .map(|c| c.key.clone())
            .unwrap_or_else(|| PUBLIC_CLIENT_KEY.to_string());
        let fingerprinter: Arc<dyn AudioFingerprinter> =
            Arc::new(FpcalcFingerprinter::new(config.fpcalc_path.clone()));

        let acoustid = || -> Result<Arc<dyn FingerprintClient>, ProviderError> {
            Ok(Arc::new(AcoustIdClient::new(
                Some(acoustid_key.clone()),
                Arc::clone(&fingerprinter),
                timeout,
            )?))
        };
        let acr = || -> Result<Arc<dyn FingerprintClient>, ProviderError> {
            Ok(Arc::new(AcrCloudClient::new(acr_credentials.clone(), timeout)?))
        };

        let providers = match mode {
            RunMode::SplitOnly => Vec::new(),
            RunMode::AutoTracklist if acr_credentials.is_some() => vec![acr()?, acoustid()?],
            RunMode::AutoTracklist | RunMode::MusicBrainzOnly => vec![acoustid()?],
            RunMode::AcrPlusMusicBrainz => vec![acr()?, acoustid()?],
        };

        let mut enrichers: Vec<Arc<dyn MetadataEnricher>> = Vec::new();
        if mode != RunMode::SplitOnly {
            if config.enrich_metadata {
                enrichers.push(Arc::new(MusicBrainzClient::new(timeout)?));
                if let Some(creds) = config.credentials.get_credentials(ProviderId::LastFm) {
                    enrichers.push(Arc::new(LastFmClient::new(Some(creds.key.clone()), timeout)?));
                }
            }
            if config.fetch_artwork {
                enrichers.push(Arc::new(ItunesClient::new(timeout)?));
            }
        }

        Ok(Self::new(mode, providers, PipelineConfig::from_run_config(config)).with_enrichers(enrichers))
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Provider query order
    pub fn provider_order(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.provider()).collect()
    }

    /// Identify every segment; one result per segment, in segment order
    pub async fn identify_all(&self, segments: &[Segment]) -> Vec<IdentificationResult> {
        info!(
            segments = segments.len(),
            mode = %self.mode,
            providers = ?self.provider_order(),
            concurrency = self.config.max_concurrent_identifications,
            "Identifying segments"
        );

        let mut results: Vec<IdentificationResult> = stream::iter(segments)
            .map(|segment| self.identify_segment(segment))
            .buffer_unordered(self.config.max_concurrent_identifications.max(1))
            .collect()
            .await;

        results.sort_by_key(|r| r.segment_index);
        results
    }

    /// Identify one segment
    pub async fn identify_segment(&self, segment: &Segment) -> IdentificationResult {
        let index = segment.index;
        self.emit(index, SegmentPhase::Pending, None);

        if self.mode == RunMode::SplitOnly {
            return self.unidentified(index, UnidentifiedReason::SplitOnly, Vec::new());
        }
        if self.cancel.is_cancelled() {
            debug!(segment_index = index, "Run cancelled; segment not queried");
            return self.unidentified(index, UnidentifiedReason::Cancelled, Vec::new());
        }
        if segment.duration_seconds() < self.config.min_identify_duration {
            debug!(
                segment_index = index,
                duration = segment.duration_seconds(),
                "Segment too short to identify"
            );
            return self.unidentified(index, UnidentifiedReason::TooShort, Vec::new());
        }

        let mut attempts = Vec::with_capacity(self.providers.len());
        for (i, client) in self.providers.iter().enumerate() {
            let provider = client.provider();
            if i > 0 {
                self.emit(index, SegmentPhase::NextProvider, Some(provider));
            }

            let attempt = self.query_provider(client.as_ref(), segment).await;
            let accepted = attempt
                .candidates()
                .iter()
                .any(|c| c.confidence >= self.config.accept_confidence_threshold);
            attempts.push(attempt);

            if accepted {
                debug!(segment_index = index, provider = %provider, "Accept threshold reached");
                break;
            }
        }

        let Some(reconciled) = reconcile(&attempts, self.config.accept_confidence_threshold) else {
            let reason = unidentified_reason(&attempts);
            info!(segment_index = index, reason = ?reason, "Segment unidentified");
            return self.unidentified(index, reason, attempts);
        };

        info!(
            segment_index = index,
            provider = %reconciled.candidate.provider,
            artist = %reconciled.candidate.artist,
            title = %reconciled.candidate.title,
            confidence = reconciled.candidate.confidence,
            method = ?reconciled.method,
            "Segment identified"
        );
        self.emit(index, SegmentPhase::Accepted, Some(reconciled.candidate.provider));

        let metadata = self.enrich(index, &reconciled.candidate).await;
        IdentificationResult {
            segment_index: index,
            decision: Decision::Identified {
                candidate: reconciled.candidate,
                method: reconciled.method,
            },
            attempts,
            metadata,
        }
    }

    /// Query one provider with timeout, retry and throttle handling
    async fn query_provider(&self, client: &dyn FingerprintClient, segment: &Segment) -> ProviderAttempt {
        let provider = client.provider();
        let started = Instant::now();

        if self.throttle.is_suspended(provider) {
            return ProviderAttempt {
                provider,
                outcome: AttemptOutcome::Skipped {
                    reason: "provider suspended after repeated throttling".to_string(),
                },
                tries: 0,
                elapsed_ms: 0,
            };
        }

        self.emit(segment.index, SegmentPhase::Querying, Some(provider));
        let mut tries = 0u32;
        let outcome = loop {
            tries += 1;
            // Waiting for a pacing slot is not part of the call
            client.ready().await;
            let result = match tokio::time::timeout(self.config.provider_timeout, client.identify(segment)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Network(format!(
                    "timed out after {:.1}s",
                    self.config.provider_timeout.as_secs_f64()
                ))),
            };

            let error = match result {
                Ok(candidates) => {
                    self.throttle.record_ok(provider);
                    break if candidates.is_empty() {
                        AttemptOutcome::NoMatch
                    } else {
                        AttemptOutcome::Matched { candidates }
                    };
                }
                Err(error) => error,
            };

            let retry = match &error {
                ProviderError::RateLimited(_) => {
                    self.throttle.record_throttled(provider);
                    !self.throttle.is_suspended(provider)
                }
                e => e.is_retryable(),
            };

            if !retry || tries > self.config.retry_count || self.cancel.is_cancelled() {
                warn!(
                    segment_index = segment.index,
                    provider = %provider,
                    tries,
                    error = %error,
                    "Provider query failed"
                );
                break AttemptOutcome::Failed { error };
            }

            let delay = backoff_delay(self.config.retry_base_delay, tries - 1, MAX_RETRY_DELAY);
            debug!(
                segment_index = segment.index,
                provider = %provider,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider"
            );
            tokio::time::sleep(delay).await;
        };

        ProviderAttempt {
            provider,
            outcome,
            tries,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Fill supplementary metadata for the chosen candidate
    ///
    /// Starts from what the recognizer already returned; enrichers only fill
    /// gaps and their failures are logged and ignored.
    async fn enrich(&self, index: usize, candidate: &IdentificationCandidate) -> EnhancedMetadata {
        let mut metadata = candidate.provider_metadata.clone();
        if metadata.album.is_none() {
            metadata.album = candidate.album.clone();
        }

        for enricher in &self.enrichers {
            let provider = enricher.provider();
            if !enricher.wants(&metadata) || self.throttle.is_suspended(provider) {
                continue;
            }
            self.emit(index, SegmentPhase::Enriching, Some(provider));

            match enricher.enrich(candidate).await {
                Ok(extra) => {
                    self.throttle.record_ok(provider);
                    metadata.fill_from(extra);
                }
                Err(ProviderError::RateLimited(message)) => {
                    self.throttle.record_throttled(provider);
                    warn!(segment_index = index, provider = %provider, error = %message, "Enrichment throttled");
                }
                Err(e) => {
                    warn!(segment_index = index, provider = %provider, error = %e, "Enrichment failed");
                }
            }
        }
        metadata
    }

    fn unidentified(
        &self,
        index: usize,
        reason: UnidentifiedReason,
        attempts: Vec<ProviderAttempt>,
    ) -> IdentificationResult {
        self.emit(index, SegmentPhase::Unidentified, None);
        IdentificationResult::unidentified(index, reason, attempts)
    }

    fn emit(&self, index: usize, phase: SegmentPhase, provider: Option<ProviderId>) {
        self.events.emit_lossy(MixEvent::segment(index, phase, provider));
    }
}

/// Extraction failures on every queried provider make the segment itself
/// the problem; anything else is a plain miss
fn unidentified_reason(attempts: &[ProviderAttempt]) -> UnidentifiedReason {
    let mut message = None;
    for attempt in attempts {
        match &attempt.outcome {
            AttemptOutcome::Failed {
                error: ProviderError::Extraction(m),
            } => {
                message.get_or_insert_with(|| m.clone());
            }
            _ => return UnidentifiedReason::NoMatch,
        }
    }
    match message {
        Some(message) => UnidentifiedReason::ExtractionFailed { message },
        None => UnidentifiedReason::NoMatch,
    }
}
