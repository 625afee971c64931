// Run Orchestration
//
// decode → detect boundaries → extract segments → identify → assemble
//
// Only decoding and configuration errors abort a run. Every other failure is
// recorded against its segment and the run still yields one track per segment.

use mixsplitr_common::events::{EventBus, MixEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::boundary_detector::{Boundary, BoundaryDetection, BoundaryDetector};
use super::identification_pipeline::IdentificationPipeline;
use super::preview_cache::{self, CacheError, PreviewCache};
use super::track_assembler::{AssemblerOptions, TrackAssembler};
use crate::config::{RunConfig, RunMode};
use crate::error::RunError;
use crate::services::artwork_fetcher::ArtworkFetcher;
use crate::services::segment_extractor::{extract, Segment};
use crate::types::{IdentificationResult, OutputStatus, OutputTrack};
use crate::utils::{decode_file, MixSource};

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub input: PathBuf,
    pub mode: RunMode,
    pub duration_seconds: f64,
    /// One per segment, in segment order
    pub tracks: Vec<OutputTrack>,
    pub results: Vec<IdentificationResult>,
    /// No usable silence: the whole mix became a single track
    pub no_boundaries_found: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn identified(&self) -> usize {
        self.tracks.iter().filter(|t| t.identified).count()
    }

    pub fn unidentified(&self) -> usize {
        self.tracks.len() - self.identified()
    }

    pub fn written(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_written()).count()
    }

    pub fn skipped(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.status == OutputStatus::SkippedExisting)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_failed()).count()
    }

    fn completed_event(&self) -> MixEvent {
        MixEvent::RunCompleted {
            tracks: self.tracks.len(),
            identified: self.identified(),
            unidentified: self.unidentified(),
            failed: self.failed(),
            cancelled: self.cancelled,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Split, identify and write `input`
pub async fn run(input: &Path, mode: RunMode, config: &RunConfig) -> Result<Vec<OutputTrack>, RunError> {
    let report = run_with(input, mode, config, EventBus::default(), CancellationToken::new()).await?;
    Ok(report.tracks)
}

/// [`run`] with a progress bus and cooperative cancellation
///
/// Cancelling stops new segment queries; segments not yet queried come out
/// unidentified and are still written.
pub async fn run_with(
    input: &Path,
    mode: RunMode,
    config: &RunConfig,
    events: EventBus,
    cancel: CancellationToken,
) -> Result<RunReport, RunError> {
    let started = Instant::now();
    let (segments, detection) = analyze(input, mode, config, &events).await?;
    let results = identify(mode, config, &segments, &events, &cancel).await?;

    let tracks = assembler(config, &events)?.assemble(&segments, &results).await;

    let report = RunReport {
        input: input.to_path_buf(),
        mode,
        duration_seconds: detection.boundary.duration(),
        tracks,
        results,
        no_boundaries_found: detection.no_boundaries_found,
        cancelled: cancel.is_cancelled(),
        elapsed: started.elapsed(),
    };
    finish(&report, &events);
    Ok(report)
}

/// Detect and identify without writing audio; saves the preview cache
///
/// Returned tracks are `Planned` (or `SkippedExisting`).
pub async fn preview(
    input: &Path,
    mode: RunMode,
    config: &RunConfig,
    cache_file: &Path,
    events: EventBus,
    cancel: CancellationToken,
) -> Result<RunReport, RunError> {
    let started = Instant::now();
    let (segments, detection) = analyze(input, mode, config, &events).await?;
    let results = identify(mode, config, &segments, &events, &cancel).await?;

    let planned = TrackAssembler::new(AssemblerOptions::from_run_config(config)).plan(&segments, &results);
    let cache = PreviewCache::new(
        input,
        mode,
        detection.boundary.edges().to_vec(),
        detection.no_boundaries_found,
        &planned,
        &results,
    );
    preview_cache::save(&cache, cache_file)?;

    let report = RunReport {
        input: input.to_path_buf(),
        mode,
        duration_seconds: detection.boundary.duration(),
        tracks: planned,
        results,
        no_boundaries_found: detection.no_boundaries_found,
        cancelled: cancel.is_cancelled(),
        elapsed: started.elapsed(),
    };
    finish(&report, &events);
    Ok(report)
}

/// Write the tracks of a previewed run from its cache
///
/// The input is decoded again and cut at the cached edges; cached
/// identifications (including hand edits) are used as they are.
pub async fn apply(cache_file: &Path, config: &RunConfig, events: EventBus) -> Result<RunReport, RunError> {
    let started = Instant::now();
    config.validate()?;
    let cache = preview_cache::load(cache_file)?;
    info!(
        cache = %cache_file.display(),
        input = %cache.input.display(),
        tracks = cache.tracks.len(),
        "Applying preview cache"
    );
    events.emit_lossy(run_started(&cache.input, cache.mode));

    let source = decode(&cache.input, &events).await?;
    let boundary = Boundary::from_edges(cache.edges.clone())
        .ok_or_else(|| CacheError::Inconsistent("edges are not strictly increasing from 0".to_string()))?;
    let segments = extract(&source, &boundary);
    if segments.len() != cache.tracks.len() {
        return Err(CacheError::Inconsistent(format!(
            "{} segments for {} cached tracks",
            segments.len(),
            cache.tracks.len()
        ))
        .into());
    }

    let results = cache.results();
    let tracks = assembler(config, &events)?.assemble(&segments, &results).await;

    let report = RunReport {
        input: cache.input.clone(),
        mode: cache.mode,
        duration_seconds: source.duration_seconds(),
        tracks,
        results,
        no_boundaries_found: cache.no_boundaries_found,
        cancelled: false,
        elapsed: started.elapsed(),
    };
    finish(&report, &events);
    Ok(report)
}

fn run_started(input: &Path, mode: RunMode) -> MixEvent {
    MixEvent::RunStarted {
        input: input.display().to_string(),
        mode: mode.to_string(),
        timestamp: chrono::Utc::now(),
    }
}

async fn decode(input: &Path, events: &EventBus) -> Result<Arc<MixSource>, RunError> {
    let path = input.to_path_buf();
    let source = tokio::task::spawn_blocking(move || decode_file(&path)).await??;
    info!(
        input = %input.display(),
        duration_seconds = source.duration_seconds(),
        sample_rate = source.sample_rate(),
        channels = source.channels(),
        "Input decoded"
    );
    events.emit_lossy(MixEvent::SourceDecoded {
        duration_seconds: source.duration_seconds(),
        sample_rate: source.sample_rate(),
        channels: source.channels(),
    });
    Ok(Arc::new(source))
}

/// Validate, decode, detect boundaries and cut segments
async fn analyze(
    input: &Path,
    mode: RunMode,
    config: &RunConfig,
    events: &EventBus,
) -> Result<(Vec<Segment>, BoundaryDetection), RunError> {
    config.validate()?;
    info!(input = %input.display(), mode = %mode, "Starting run");
    events.emit_lossy(run_started(input, mode));

    let source = decode(input, events).await?;

    let detection = match config.single_track_below_seconds {
        Some(limit) if source.duration_seconds() < limit => {
            info!(
                duration_seconds = source.duration_seconds(),
                limit, "Input shorter than single-track limit; not splitting"
            );
            BoundaryDetection {
                boundary: Boundary::whole(source.duration_seconds()),
                no_boundaries_found: false,
                silence_regions: Vec::new(),
            }
        }
        _ => {
            let detector = BoundaryDetector::new(config.detection.clone());
            let scan_source = Arc::clone(&source);
            tokio::task::spawn_blocking(move || detector.detect(&scan_source)).await??
        }
    };

    if detection.no_boundaries_found {
        warn!(input = %input.display(), "No usable silence found; treating the mix as one track");
    }
    events.emit_lossy(MixEvent::BoundariesDetected {
        segment_count: detection.boundary.segment_count(),
        no_boundaries_found: detection.no_boundaries_found,
    });

    let segments = extract(&source, &detection.boundary);
    info!(segments = segments.len(), "Segments extracted");
    Ok((segments, detection))
}

async fn identify(
    mode: RunMode,
    config: &RunConfig,
    segments: &[Segment],
    events: &EventBus,
    cancel: &CancellationToken,
) -> Result<Vec<IdentificationResult>, RunError> {
    let pipeline = IdentificationPipeline::from_run_config(mode, config)
        .map_err(|e| RunError::Config(format!("provider setup failed: {}", e)))?
        .with_events(events.clone())
        .with_cancellation(cancel.clone());
    Ok(pipeline.identify_all(segments).await)
}

fn assembler(config: &RunConfig, events: &EventBus) -> Result<TrackAssembler, RunError> {
    let mut assembler = TrackAssembler::new(AssemblerOptions::from_run_config(config)).with_events(events.clone());
    if config.fetch_artwork {
        let fetcher = ArtworkFetcher::new(config.provider_timeout())
            .map_err(|e| RunError::Config(format!("artwork client setup failed: {}", e)))?;
        assembler = assembler.with_artwork(Arc::new(fetcher));
    }
    Ok(assembler)
}

fn finish(report: &RunReport, events: &EventBus) {
    info!(
        tracks = report.tracks.len(),
        identified = report.identified(),
        written = report.written(),
        skipped = report.skipped(),
        failed = report.failed(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Run complete"
    );
    events.emit_lossy(report.completed_event());
}
