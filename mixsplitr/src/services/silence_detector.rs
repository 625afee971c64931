//! Silence detection over an RMS energy envelope
//!
//! The mix is mono-mixed and cut into fixed windows; each window's RMS level
//! is expressed in dBFS. A silence region is a run of consecutive windows
//! below the threshold lasting at least the minimum duration.

use crate::utils::MixSource;
use thiserror::Error;

/// Level reported for digital silence instead of negative infinity
pub const SILENCE_FLOOR_DB: f64 = -120.0;

/// Silence detection errors
#[derive(Debug, Error, PartialEq)]
pub enum SilenceError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Silence region in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceRegion {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl SilenceRegion {
    pub fn new(start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            start_seconds,
            end_seconds,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    pub fn midpoint(&self) -> f64 {
        (self.start_seconds + self.end_seconds) / 2.0
    }
}

/// Per-window RMS levels of a mix
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyEnvelope {
    /// dBFS per window, floored at [`SILENCE_FLOOR_DB`]
    pub levels_db: Vec<f64>,
    pub window_frames: usize,
    pub sample_rate: u32,
    pub total_frames: usize,
}

impl EnergyEnvelope {
    /// Compute the envelope of `source` with windows of `window_ms`
    pub fn compute(source: &MixSource, window_ms: u32) -> Self {
        let sample_rate = source.sample_rate();
        let window_frames = ((sample_rate as u64 * window_ms as u64) / 1000).max(1) as usize;
        let total_frames = source.frame_count();

        let mut levels_db = Vec::with_capacity(total_frames / window_frames + 1);
        let mut start = 0;
        while start < total_frames {
            let end = (start + window_frames).min(total_frames);
            let mut sum_sq = 0.0f64;
            let mut count = 0usize;
            for s in source.mono_frames(start..end) {
                sum_sq += (s as f64) * (s as f64);
                count += 1;
            }
            let rms = if count > 0 { (sum_sq / count as f64).sqrt() } else { 0.0 };
            levels_db.push(linear_to_db(rms));
            start = end;
        }

        Self {
            levels_db,
            window_frames,
            sample_rate,
            total_frames,
        }
    }

    pub fn window_count(&self) -> usize {
        self.levels_db.len()
    }

    fn window_start_seconds(&self, window: usize) -> f64 {
        (window * self.window_frames) as f64 / self.sample_rate as f64
    }

    fn window_end_seconds(&self, window: usize) -> f64 {
        ((window + 1) * self.window_frames).min(self.total_frames) as f64 / self.sample_rate as f64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }
}

/// Silence detector
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    /// Silence threshold in dBFS (default: -40dB)
    threshold_db: f64,

    /// Minimum silence duration in seconds (default: 2.0s)
    min_duration_sec: f64,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self {
            threshold_db: -40.0,
            min_duration_sec: 2.0,
        }
    }

    /// Set silence threshold in dB
    pub fn with_threshold_db(mut self, threshold_db: f64) -> Result<Self, SilenceError> {
        if !threshold_db.is_finite() || threshold_db > 0.0 {
            return Err(SilenceError::InvalidThreshold(
                "Threshold must be a negative dB value".to_string(),
            ));
        }
        self.threshold_db = threshold_db;
        Ok(self)
    }

    /// Set minimum silence duration
    pub fn with_min_duration(mut self, min_duration_sec: f64) -> Result<Self, SilenceError> {
        if !min_duration_sec.is_finite() || min_duration_sec < 0.0 {
            return Err(SilenceError::InvalidParameters(
                "Min duration must be >= 0".to_string(),
            ));
        }
        self.min_duration_sec = min_duration_sec;
        Ok(self)
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }

    /// Detect silence regions in an envelope, in time order
    pub fn detect(&self, envelope: &EnergyEnvelope) -> Vec<SilenceRegion> {
        let mut regions = Vec::new();
        let mut run_start: Option<usize> = None;

        for (idx, &level) in envelope.levels_db.iter().enumerate() {
            let silent = level < self.threshold_db;
            match (silent, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(start)) => {
                    self.close_run(envelope, start, idx - 1, &mut regions);
                    run_start = None;
                }
                _ => {}
            }
        }

        // Trailing silence
        if let Some(start) = run_start {
            self.close_run(envelope, start, envelope.window_count() - 1, &mut regions);
        }

        regions
    }

    fn close_run(&self, envelope: &EnergyEnvelope, first: usize, last: usize, out: &mut Vec<SilenceRegion>) {
        let region = SilenceRegion::new(envelope.window_start_seconds(first), envelope.window_end_seconds(last));
        if region.duration() + 1e-9 >= self.min_duration_sec {
            out.push(region);
        }
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn linear_to_db(rms: f64) -> f64 {
    if rms <= 0.0 {
        SILENCE_FLOOR_DB
    } else {
        (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
    }
}
