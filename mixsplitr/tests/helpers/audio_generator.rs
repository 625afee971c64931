//! Audio Test Fixture Generator
//!
//! Writes WAV mixes made of a steady tone broken by digital-silence gaps.

use std::path::{Path, PathBuf};

/// Configuration for a generated mix
#[derive(Debug, Clone)]
pub struct MixConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// `(center, length)` of each silent gap, in seconds
    pub silence_gaps: Vec<(f64, f64)>,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 35.0,
            sample_rate: 8000,
            channels: 1,
            silence_gaps: Vec::new(),
        }
    }
}

impl MixConfig {
    /// 3-minute mono mix with 2 s gaps centered at 0:45 and 1:45
    pub fn three_track_mix() -> Self {
        Self {
            duration_seconds: 180.0,
            silence_gaps: vec![(45.0, 2.0), (105.0, 2.0)],
            ..Default::default()
        }
    }

    fn in_gap(&self, frame: usize) -> bool {
        let rate = self.sample_rate as f64;
        self.silence_gaps.iter().any(|&(center, length)| {
            let start = ((center - length / 2.0) * rate) as usize;
            let end = ((center + length / 2.0) * rate) as usize;
            frame >= start && frame < end
        })
    }
}

/// Generate a test WAV file
///
/// Tone is 440 Hz at 30% amplitude; gaps are exact zeros.
pub fn generate_mix_wav(path: &Path, config: &MixConfig) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_frames = (config.duration_seconds * config.sample_rate as f64) as usize;

    for i in 0..total_frames {
        let sample = if config.in_gap(i) {
            0
        } else {
            let t = i as f32 / config.sample_rate as f32;
            (0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16
        };
        for _ in 0..config.channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}
