//! Audio decoding into a [`MixSource`]
//!
//! Uses symphonia for format-agnostic decoding (MP3, FLAC, AAC, WAV, OGG, ...).
//! The whole mix is decoded once into interleaved f32 samples; every later
//! stage reads from that buffer without copying it.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure to read the input mix; fatal for a run
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported or unrecognized format: {0}")]
    Probe(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Stream parameter unknown: {0}")]
    MissingParameter(&'static str),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Audio stream is empty")]
    Empty,
}

/// Immutable decoded mix
///
/// Samples are interleaved f32 in [-1.0, 1.0]. Cloning is cheap; the sample
/// buffer is shared.
#[derive(Debug, Clone)]
pub struct MixSource {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    path: Option<PathBuf>,
}

impl MixSource {
    /// Wrap already decoded interleaved samples
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, DecodeError> {
        if sample_rate == 0 {
            return Err(DecodeError::MissingParameter("sample rate"));
        }
        if channels == 0 {
            return Err(DecodeError::MissingParameter("channel count"));
        }
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);

        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
            path: None,
        })
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame index nearest to `seconds`, clamped to the stream
    pub fn frame_at(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        let frame = (seconds * self.sample_rate as f64).round() as usize;
        frame.min(self.frame_count())
    }

    /// Interleaved samples for a frame range (clamped to the stream)
    pub fn read_frames(&self, frames: Range<usize>) -> &[f32] {
        let ch = self.channels as usize;
        let end = frames.end.min(self.frame_count());
        let start = frames.start.min(end);
        &self.samples[start * ch..end * ch]
    }

    /// Mono mixdown of a frame range
    pub fn mono_frames(&self, frames: Range<usize>) -> impl Iterator<Item = f32> + '_ {
        let ch = self.channels as usize;
        self.read_frames(frames)
            .chunks_exact(ch)
            .map(move |frame| frame.iter().sum::<f32>() / ch as f32)
    }
}

/// Decode an audio file into a [`MixSource`]
///
/// **Algorithm:**
/// 1. Probe format using the file extension as a hint
/// 2. Pick the first track with a real codec
/// 3. Decode all packets, skipping individually corrupt ones
pub fn decode_file(path: &Path) -> Result<MixSource, DecodeError> {
    debug!(path = %path.display(), "Decoding audio file");

    let file = std::fs::File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Probe(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::MissingParameter("sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or(DecodeError::MissingParameter("channel layout"))?
        .count() as u16;

    debug!(
        path = %path.display(),
        sample_rate = sample_rate,
        channels = channels,
        "Audio stream info"
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decoder(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut buf_frames = 0usize;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let capacity = decoded.capacity();
                if sample_buf.is_none() || capacity > buf_frames {
                    sample_buf = Some(SampleBuffer::<f32>::new(capacity as u64, *decoded.spec()));
                    buf_frames = capacity;
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                skipped_packets += 1;
                debug!(error = %e, "Skipping corrupt packet");
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        }
    }

    if skipped_packets > 0 {
        warn!(path = %path.display(), skipped_packets, "Some packets could not be decoded");
    }

    let source = MixSource::from_interleaved(samples, sample_rate, channels)?.with_path(path);
    if source.is_empty() {
        return Err(DecodeError::Empty);
    }

    debug!(
        path = %path.display(),
        frames = source.frame_count(),
        duration_seconds = format!("{:.2}", source.duration_seconds()),
        "Audio decoding complete"
    );

    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_drops_partial_frame() {
        let source = MixSource::from_interleaved(vec![0.1, 0.2, 0.3, 0.4, 0.5], 10, 2).unwrap();
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.duration_seconds(), 0.2);
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(matches!(
            MixSource::from_interleaved(vec![0.0; 4], 0, 1),
            Err(DecodeError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_read_frames_is_clamped() {
        let source = MixSource::from_interleaved((0..8).map(|i| i as f32).collect(), 4, 2).unwrap();
        assert_eq!(source.read_frames(1..3), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(source.read_frames(3..100), &[6.0, 7.0]);
        assert!(source.read_frames(10..12).is_empty());
    }

    #[test]
    fn test_mono_frames_averages_channels() {
        let source = MixSource::from_interleaved(vec![1.0, 0.0, 0.5, 0.5], 2, 2).unwrap();
        let mono: Vec<f32> = source.mono_frames(0..2).collect();
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn test_frame_at_rounds_and_clamps() {
        let source = MixSource::from_interleaved(vec![0.0; 100], 10, 1).unwrap();
        assert_eq!(source.frame_at(0.0), 0);
        assert_eq!(source.frame_at(2.46), 25);
        assert_eq!(source.frame_at(50.0), 100);
        assert_eq!(source.frame_at(-1.0), 0);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_file(Path::new("/nonexistent/mix.flac")).unwrap_err();
        assert!(matches!(err, DecodeError::Open { .. }));
    }
}
