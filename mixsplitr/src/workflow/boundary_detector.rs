//! Track boundary detection
//!
//! Turns the silence regions of a mix into split points:
//! 1. Compute the RMS envelope (100ms windows by default)
//! 2. Every interior silence run of at least `min_silence_duration` yields a
//!    candidate split at its midpoint
//! 3. Segments shorter than `min_segment_length` are merged into a neighbor
//! 4. `max_segments` keeps the splits backed by the longest silences
//!
//! When no usable split remains the whole mix is one segment and the result
//! is flagged `no_boundaries_found`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::services::silence_detector::{EnergyEnvelope, SilenceDetector, SilenceError, SilenceRegion};
use crate::utils::{DecodeError, MixSource};

#[derive(Debug, Error)]
pub enum BoundaryError {
    /// Nothing to analyze
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Invalid silence settings: {0}")]
    Silence(#[from] SilenceError),

    #[error("Invalid minimum segment length: {0}")]
    SegmentLength(f64),
}

/// Detection options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub silence_threshold_db: f64,
    pub min_silence_duration: f64,
    pub min_segment_length: f64,
    /// Unbounded when `None`
    pub max_segments: Option<usize>,
    pub window_ms: u32,
}

impl BoundaryConfig {
    /// Silence detector for these settings
    pub fn silence_detector(&self) -> Result<SilenceDetector, BoundaryError> {
        if !self.min_segment_length.is_finite() || self.min_segment_length < 0.0 {
            return Err(BoundaryError::SegmentLength(self.min_segment_length));
        }
        Ok(SilenceDetector::new()
            .with_threshold_db(self.silence_threshold_db)?
            .with_min_duration(self.min_silence_duration)?)
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            min_silence_duration: 2.0,
            min_segment_length: 30.0,
            max_segments: None,
            window_ms: 100,
        }
    }
}

/// Strictly increasing segment edges, including 0 and the total duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    edges: Vec<f64>,
}

impl Boundary {
    /// Validate a list of edges
    ///
    /// Returns `None` unless there are at least two edges, the first is 0 and
    /// every edge is finite and strictly greater than the previous one.
    pub fn from_edges(edges: Vec<f64>) -> Option<Self> {
        let valid = edges.len() >= 2
            && edges[0] == 0.0
            && edges.iter().all(|e| e.is_finite())
            && edges.windows(2).all(|w| w[1] > w[0]);
        valid.then_some(Self { edges })
    }

    /// One segment spanning `[0, duration]`
    pub fn whole(duration: f64) -> Self {
        Self {
            edges: vec![0.0, duration.max(f64::MIN_POSITIVE)],
        }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn segment_count(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn duration(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// `(start, end)` pairs in order
    pub fn segments(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.edges.windows(2).map(|w| (w[0], w[1]))
    }
}

/// Detection output
#[derive(Debug, Clone)]
pub struct BoundaryDetection {
    pub boundary: Boundary,
    /// No usable silence: the whole mix is a single segment
    pub no_boundaries_found: bool,
    /// Every silence region found, including leading/trailing ones
    pub silence_regions: Vec<SilenceRegion>,
}

#[derive(Debug, Clone, Copy)]
struct Cut {
    at: f64,
    silence: f64,
}

/// Silence-based boundary detector
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    config: BoundaryConfig,
}

impl BoundaryDetector {
    pub fn new(config: BoundaryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// Detect boundaries of `source`
    ///
    /// Fails when the settings are invalid or the stream has no audio to
    /// analyze.
    pub fn detect(&self, source: &MixSource) -> Result<BoundaryDetection, BoundaryError> {
        let detector = self.config.silence_detector()?;
        if source.is_empty() || source.frame_count() == 0 {
            return Err(DecodeError::Empty.into());
        }
        let total = source.duration_seconds();

        let envelope = EnergyEnvelope::compute(source, self.config.window_ms.max(1));
        let regions = detector.detect(&envelope);

        debug!(
            windows = envelope.window_count(),
            silence_regions = regions.len(),
            "Silence analysis complete"
        );

        // Leading/trailing silence is padding, not a split
        let mut cuts: Vec<Cut> = regions
            .iter()
            .filter(|r| r.start_seconds > 0.0 && r.end_seconds < total)
            .map(|r| Cut {
                at: r.midpoint(),
                silence: r.duration(),
            })
            .collect();

        merge_short_segments(&mut cuts, total, self.config.min_segment_length);
        if let Some(max) = self.config.max_segments {
            limit_segment_count(&mut cuts, max.max(1));
        }

        let no_boundaries_found = cuts.is_empty();
        let boundary = if no_boundaries_found {
            Boundary::whole(total)
        } else {
            Boundary::from_edges(edge_list(&cuts, total)).unwrap_or_else(|| Boundary::whole(total))
        };

        info!(
            segments = boundary.segment_count(),
            no_boundaries_found,
            duration_seconds = format!("{:.1}", total),
            "Boundary detection complete"
        );

        Ok(BoundaryDetection {
            boundary,
            no_boundaries_found,
            silence_regions: regions,
        })
    }
}

impl Default for BoundaryDetector {
    fn default() -> Self {
        Self::new(BoundaryConfig::default())
    }
}

fn edge_list(cuts: &[Cut], total: f64) -> Vec<f64> {
    let mut edges = Vec::with_capacity(cuts.len() + 2);
    edges.push(0.0);
    edges.extend(cuts.iter().map(|c| c.at));
    edges.push(total);
    edges
}

/// Remove cuts until every segment reaches `min_len`
///
/// The shortest offending segment is handled first (earliest on ties). It
/// gives up the edge shared with its shorter neighbor, so the edge bounding
/// the longer neighbor survives. Equal neighbors keep the earlier edge.
fn merge_short_segments(cuts: &mut Vec<Cut>, total: f64, min_len: f64) {
    while !cuts.is_empty() {
        let edges = edge_list(cuts, total);
        let len = |i: usize| edges[i + 1] - edges[i];
        let segment_count = edges.len() - 1;

        let shortest = (0..segment_count)
            .filter(|&i| len(i) < min_len)
            .min_by(|&a, &b| len(a).total_cmp(&len(b)).then(a.cmp(&b)));
        let Some(i) = shortest else { break };

        // Edge k (1..=cuts.len()) is cuts[k - 1]
        let remove_edge = if i == 0 {
            1
        } else if i == segment_count - 1 {
            i
        } else if len(i - 1) >= len(i + 1) {
            i + 1
        } else {
            i
        };
        cuts.remove(remove_edge - 1);
    }
}

/// Keep at most `max_segments` segments, dropping the cuts with the shortest
/// silence (latest on ties)
fn limit_segment_count(cuts: &mut Vec<Cut>, max_segments: usize) {
    while cuts.len() + 1 > max_segments {
        let weakest = cuts
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.silence.total_cmp(&b.silence).then(ib.cmp(ia)))
            .map(|(i, _)| i);
        match weakest {
            Some(i) => {
                cuts.remove(i);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cuts(points: &[(f64, f64)]) -> Vec<Cut> {
        points.iter().map(|&(at, silence)| Cut { at, silence }).collect()
    }

    fn positions(cuts: &[Cut]) -> Vec<f64> {
        cuts.iter().map(|c| c.at).collect()
    }

    #[test]
    fn test_boundary_validation() {
        assert!(Boundary::from_edges(vec![0.0, 10.0]).is_some());
        assert!(Boundary::from_edges(vec![0.0]).is_none());
        assert!(Boundary::from_edges(vec![1.0, 10.0]).is_none());
        assert!(Boundary::from_edges(vec![0.0, 5.0, 5.0, 10.0]).is_none());
        assert!(Boundary::from_edges(vec![0.0, f64::NAN]).is_none());
    }

    #[test]
    fn test_merge_keeps_edge_of_longer_neighbor() {
        // Segments: 0-100, 100-110 (short), 110-140
        let mut c = cuts(&[(100.0, 2.0), (110.0, 2.0)]);
        merge_short_segments(&mut c, 140.0, 30.0);
        // Left neighbor (100s) is longer than right (30s): edge 100 survives
        assert_eq!(positions(&c), vec![100.0]);

        // Mirror: 0-30, 30-40 (short), 40-140
        let mut c = cuts(&[(30.0, 2.0), (40.0, 2.0)]);
        merge_short_segments(&mut c, 140.0, 30.0);
        assert_eq!(positions(&c), vec![40.0]);
    }

    #[test]
    fn test_merge_first_and_last_segments() {
        let mut c = cuts(&[(10.0, 2.0), (100.0, 2.0)]);
        merge_short_segments(&mut c, 200.0, 30.0);
        assert_eq!(positions(&c), vec![100.0]);

        let mut c = cuts(&[(100.0, 2.0), (190.0, 2.0)]);
        merge_short_segments(&mut c, 200.0, 30.0);
        assert_eq!(positions(&c), vec![100.0]);
    }

    #[test]
    fn test_merge_everything_short() {
        let mut c = cuts(&[(5.0, 2.0), (10.0, 2.0), (15.0, 2.0)]);
        merge_short_segments(&mut c, 20.0, 30.0);
        assert!(c.is_empty());
    }

    #[test]
    fn test_limit_drops_shortest_silence() {
        let mut c = cuts(&[(60.0, 3.0), (120.0, 1.0), (180.0, 5.0), (240.0, 1.0)]);
        limit_segment_count(&mut c, 3);
        // Ties at 1.0s: the later cut (240) goes first, then 120
        assert_eq!(positions(&c), vec![60.0, 180.0]);

        limit_segment_count(&mut c, 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_detect_empty_source_fails() {
        let source = MixSource::from_interleaved(Vec::new(), 1000, 1).unwrap();
        assert!(matches!(
            BoundaryDetector::default().detect(&source),
            Err(BoundaryError::Decode(DecodeError::Empty))
        ));
    }

    #[test]
    fn test_detect_rejects_invalid_settings() {
        let mut samples: Vec<f32> = (0..30_000).map(|i| if i % 2 == 0 { 0.4 } else { -0.4 }).collect();
        samples.extend(vec![0.0f32; 3_000]);
        samples.extend((0..30_000).map(|i| if i % 2 == 0 { 0.4f32 } else { -0.4 }));
        let source = MixSource::from_interleaved(samples, 1000, 1).unwrap();

        let positive_threshold = BoundaryConfig {
            silence_threshold_db: 6.0,
            min_silence_duration: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            BoundaryDetector::new(positive_threshold).detect(&source),
            Err(BoundaryError::Silence(SilenceError::InvalidThreshold(_)))
        ));

        let negative_silence = BoundaryConfig {
            min_silence_duration: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            BoundaryDetector::new(negative_silence).detect(&source),
            Err(BoundaryError::Silence(SilenceError::InvalidParameters(_)))
        ));

        let nan_segment = BoundaryConfig {
            min_segment_length: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            BoundaryDetector::new(nan_segment).detect(&source),
            Err(BoundaryError::SegmentLength(_))
        ));

        // Same source splits once the settings are valid
        let valid = BoundaryConfig {
            min_silence_duration: 1.0,
            ..Default::default()
        };
        let detection = BoundaryDetector::new(valid).detect(&source).unwrap();
        assert_eq!(detection.boundary.segment_count(), 2);
    }

    #[test]
    fn test_detect_without_silence() {
        let samples: Vec<f32> = (0..60_000).map(|i| if i % 2 == 0 { 0.4 } else { -0.4 }).collect();
        let source = MixSource::from_interleaved(samples, 1000, 1).unwrap();
        let detection = BoundaryDetector::default().detect(&source).unwrap();

        assert!(detection.no_boundaries_found);
        assert_eq!(detection.boundary.edges(), &[0.0, 60.0]);
    }

    #[test]
    fn test_leading_and_trailing_silence_are_not_splits() {
        let mut samples = vec![0.0f32; 5_000];
        samples.extend((0..80_000).map(|i| if i % 2 == 0 { 0.4f32 } else { -0.4 }));
        samples.extend(vec![0.0f32; 5_000]);
        let source = MixSource::from_interleaved(samples, 1000, 1).unwrap();

        let config = BoundaryConfig {
            min_silence_duration: 1.0,
            ..Default::default()
        };
        let detection = BoundaryDetector::new(config).detect(&source).unwrap();
        assert!(detection.no_boundaries_found);
        assert_eq!(detection.silence_regions.len(), 2);
    }
}
