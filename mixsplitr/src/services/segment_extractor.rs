//! Segment extraction and materialization
//!
//! A [`Segment`] is a frame range over the shared [`MixSource`]; no samples
//! are copied until a provider needs an encoded clip. Materialization writes
//! 16-bit PCM WAV, either into memory or into a scratch directory.

use std::io::{BufWriter, Cursor};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::utils::MixSource;
use crate::workflow::boundary_detector::Boundary;

/// Per-segment extraction failure; the segment is marked unidentified
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Segment {index} covers no audio")]
    EmptyRange { index: usize },

    #[error("Segment {index} could not be encoded: {message}")]
    Encode { index: usize, message: String },
}

/// Which part of a segment to materialize
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleWindow {
    Full,
    /// Clip of `seconds` centered on the segment middle
    Middle { seconds: f64 },
    /// First `seconds` of the segment
    Leading { seconds: f64 },
}

/// One inter-boundary interval of the mix
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub frames: Range<usize>,
    source: Arc<MixSource>,
}

impl Segment {
    pub fn duration_seconds(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    pub fn source(&self) -> &MixSource {
        &self.source
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.source.channels()
    }

    /// Interleaved samples of the whole segment
    pub fn samples(&self) -> &[f32] {
        self.source.read_frames(self.frames.clone())
    }

    /// Frame range selected by `window`
    pub fn window_frames(&self, window: SampleWindow) -> Range<usize> {
        match window {
            SampleWindow::Full => self.frames.clone(),
            SampleWindow::Middle { seconds } => {
                let len = self.frames.end - self.frames.start;
                let wanted = ((seconds.max(0.0) * self.sample_rate() as f64).round() as usize).min(len);
                let start = self.frames.start + (len - wanted) / 2;
                start..start + wanted
            }
            SampleWindow::Leading { seconds } => {
                let len = self.frames.end - self.frames.start;
                let wanted = ((seconds.max(0.0) * self.sample_rate() as f64).round() as usize).min(len);
                self.frames.start..self.frames.start + wanted
            }
        }
    }
}

/// Split `source` at `boundary`
///
/// Frame ranges are derived only from the boundary edges and the sample rate,
/// so the same input always yields the same ranges.
pub fn extract(source: &Arc<MixSource>, boundary: &Boundary) -> Vec<Segment> {
    boundary
        .segments()
        .enumerate()
        .map(|(index, (start, end))| Segment {
            index,
            start_seconds: start,
            end_seconds: end,
            frames: source.frame_at(start)..source.frame_at(end),
            source: Arc::clone(source),
        })
        .collect()
}

fn wav_spec(segment: &Segment) -> hound::WavSpec {
    hound::WavSpec {
        channels: segment.channels(),
        sample_rate: segment.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn encode_err(index: usize) -> impl Fn(hound::Error) -> ExtractionError {
    move |e| ExtractionError::Encode {
        index,
        message: e.to_string(),
    }
}

/// Encode a window of the segment as an in-memory WAV file
pub fn materialize_wav(segment: &Segment, window: SampleWindow) -> Result<Vec<u8>, ExtractionError> {
    let frames = segment.window_frames(window);
    if frames.is_empty() {
        return Err(ExtractionError::EmptyRange { index: segment.index });
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(segment)).map_err(encode_err(segment.index))?;
        for &s in segment.source().read_frames(frames) {
            writer.write_sample(to_i16(s)).map_err(encode_err(segment.index))?;
        }
        writer.finalize().map_err(encode_err(segment.index))?;
    }
    Ok(cursor.into_inner())
}

/// Write a window of the segment to a fresh temporary WAV inside `dir`
///
/// Every call gets its own file, removed when the handle is dropped.
pub fn materialize_temp_wav(segment: &Segment, window: SampleWindow, dir: &Path) -> Result<NamedTempFile, ExtractionError> {
    let frames = segment.window_frames(window);
    if frames.is_empty() {
        return Err(ExtractionError::EmptyRange { index: segment.index });
    }
    let to_encode_err = encode_err(segment.index);

    let file = tempfile::Builder::new()
        .prefix(&format!("segment_{:03}_", segment.index))
        .suffix(".wav")
        .tempfile_in(dir)
        .map_err(|e| to_encode_err(hound::Error::IoError(e)))?;
    {
        let mut writer = hound::WavWriter::new(BufWriter::new(file.as_file()), wav_spec(segment)).map_err(&to_encode_err)?;
        for &s in segment.source().read_frames(frames) {
            writer.write_sample(to_i16(s)).map_err(&to_encode_err)?;
        }
        writer.finalize().map_err(&to_encode_err)?;
    }
    Ok(file)
}

/// Write a window of the segment as a WAV file at `path`
pub fn write_wav_file(segment: &Segment, window: SampleWindow, path: &Path) -> Result<(), hound::Error> {
    let mut writer = hound::WavWriter::create(path, wav_spec(segment))?;
    for &s in segment.source().read_frames(segment.window_frames(window)) {
        writer.write_sample(to_i16(s))?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(edges: &[f64]) -> Boundary {
        Boundary::from_edges(edges.to_vec()).unwrap()
    }

    fn ramp_source(seconds: usize, rate: u32, channels: u16) -> Arc<MixSource> {
        let n = seconds * rate as usize * channels as usize;
        let samples = (0..n).map(|i| (i % 100) as f32 / 200.0).collect();
        Arc::new(MixSource::from_interleaved(samples, rate, channels).unwrap())
    }

    #[test]
    fn test_extract_frame_ranges() {
        let src = ramp_source(10, 100, 2);
        let segments = extract(&src, &boundary(&[0.0, 2.5, 7.0, 10.0]));

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].frames, 0..250);
        assert_eq!(segments[1].frames, 250..700);
        assert_eq!(segments[2].frames, 700..1000);
        assert_eq!(segments[1].samples().len(), 450 * 2);
        assert_eq!(segments[2].index, 2);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let src = ramp_source(10, 100, 1);
        let b = boundary(&[0.0, 3.33, 10.0]);
        let a: Vec<_> = extract(&src, &b).into_iter().map(|s| s.frames).collect();
        let c: Vec<_> = extract(&src, &b).into_iter().map(|s| s.frames).collect();
        assert_eq!(a, c);
    }

    #[test]
    fn test_middle_window() {
        let src = ramp_source(60, 100, 1);
        let segments = extract(&src, &boundary(&[0.0, 40.0, 60.0]));
        assert_eq!(segments[0].window_frames(SampleWindow::Middle { seconds: 12.0 }), 1400..2600);
        // Shorter than the window: whole segment
        assert_eq!(segments[1].window_frames(SampleWindow::Middle { seconds: 30.0 }), 4000..6000);
        assert_eq!(segments[1].window_frames(SampleWindow::Leading { seconds: 5.0 }), 4000..4500);
    }

    #[test]
    fn test_materialize_wav_roundtrip_header() {
        let src = ramp_source(4, 100, 2);
        let segments = extract(&src, &boundary(&[0.0, 4.0]));
        let bytes = materialize_wav(&segments[0], SampleWindow::Middle { seconds: 1.0 }).unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 100);
        assert_eq!(reader.duration(), 100);
    }

    #[test]
    fn test_temp_wav_is_private_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let src = ramp_source(2, 100, 1);
        let segments = extract(&src, &boundary(&[0.0, 2.0]));

        let first = materialize_temp_wav(&segments[0], SampleWindow::Full, dir.path()).unwrap();
        let second = materialize_temp_wav(&segments[0], SampleWindow::Full, dir.path()).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(dir.path()));
        assert_eq!(std::fs::read(first.path()).unwrap(), std::fs::read(second.path()).unwrap());

        let reader = hound::WavReader::open(first.path()).unwrap();
        assert_eq!(reader.duration(), 200);

        let kept = first.path().to_path_buf();
        drop(first);
        assert!(!kept.exists());
        assert!(second.path().exists());
    }
}
