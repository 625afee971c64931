//! Output file naming, writing and tagging
//!
//! Naming rules:
//! - identified: `Artist - Title`, under `<output>/<Artist>/` when artist
//!   folders are enabled
//! - unidentified: `Track NN (MM-SS)` in the output root (the title tag keeps
//!   the `MM:SS` form)
//! - names never collide within a run: duplicates get ` (2)`, ` (3)` ...
//!
//! Each track is written on its own; a failed write marks that track
//! `Failed` and the remaining tracks are still written.

use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use mixsplitr_common::events::{EventBus, MixEvent, SegmentPhase};
use mixsplitr_common::human_time::format_clock;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::AssemblyError;
use crate::services::artwork_fetcher::ArtworkFetcher;
use crate::services::segment_extractor::{write_wav_file, SampleWindow, Segment};
use crate::types::{Decision, IdentificationResult, OutputStatus, OutputTrack, TrackTags, UnidentifiedReason};

const OUTPUT_EXTENSION: &str = "wav";
const FOLDER_ART_NAME: &str = "folder.jpg";
/// Keeps full paths well inside common filesystem limits
const MAX_STEM_BYTES: usize = 180;

/// Where and how tracks are written
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub output_dir: PathBuf,
    pub artist_folders: bool,
    pub skip_existing: bool,
}

impl AssemblerOptions {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            artist_folders: config.artist_folders,
            skip_existing: config.skip_existing,
        }
    }
}

/// Make `name` safe as a file or directory name
///
/// Separators (`: / \ |`) become `-`, the remaining reserved characters
/// (`< > " ? *`) and control characters are dropped, and trailing dots and
/// spaces are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ':' | '/' | '\\' | '|' => out.push('-'),
            '<' | '>' | '"' | '?' | '*' => {}
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    let mut out = out.trim().to_string();
    if out.len() > MAX_STEM_BYTES {
        let mut cut = MAX_STEM_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out.trim_end_matches(['.', ' ']).trim_start().to_string()
}

/// `Track NN (MM:SS)` with a 1-based ordinal and the segment start time
pub fn unidentified_title(segment: &Segment) -> String {
    format!("Track {:02} ({})", segment.index + 1, format_clock(segment.start_seconds))
}

/// `stem`, `stem (2)`, `stem (3)` ... whichever is unused
fn unique_stem(dir: &Path, stem: &str, taken: &mut HashSet<String>) -> String {
    let mut n = 1;
    loop {
        let candidate = if n == 1 { stem.to_string() } else { format!("{} ({})", stem, n) };
        // Case-insensitive filesystems treat these as the same file
        let key = dir.join(&candidate).to_string_lossy().to_lowercase();
        if taken.insert(key) {
            return candidate;
        }
        n += 1;
    }
}

/// Writes one output file per segment
pub struct TrackAssembler {
    options: AssemblerOptions,
    artwork: Option<Arc<ArtworkFetcher>>,
    events: EventBus,
}

impl TrackAssembler {
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            artwork: None,
            events: EventBus::default(),
        }
    }

    /// Download and embed cover art when a result carries an artwork URL
    pub fn with_artwork(mut self, fetcher: Arc<ArtworkFetcher>) -> Self {
        self.artwork = Some(fetcher);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Decide every output path and tag set without writing anything
    ///
    /// Tracks are `Planned`, or `SkippedExisting` when `skip_existing` is set
    /// and the identified track is already in the output library. A segment
    /// without a result is treated as unidentified.
    pub fn plan(&self, segments: &[Segment], results: &[IdentificationResult]) -> Vec<OutputTrack> {
        let by_index: HashMap<usize, &IdentificationResult> = results.iter().map(|r| (r.segment_index, r)).collect();
        let mut taken = HashSet::new();

        segments
            .iter()
            .map(|segment| {
                let result = by_index.get(&segment.index).copied();
                self.plan_track(segment, result, &mut taken)
            })
            .collect()
    }

    fn plan_track(
        &self,
        segment: &Segment,
        result: Option<&IdentificationResult>,
        taken: &mut HashSet<String>,
    ) -> OutputTrack {
        let track_number = segment.index as u32 + 1;
        let identified = result.and_then(|r| match &r.decision {
            Decision::Identified { candidate, .. } => Some((r, candidate)),
            Decision::Unidentified { .. } => None,
        });

        let (dir, stem, tags, source) = match identified {
            Some((result, candidate)) => {
                let meta = &result.metadata;
                let tags = TrackTags {
                    artist: Some(candidate.artist.clone()),
                    title: Some(candidate.title.clone()),
                    album: meta.album.clone().or_else(|| candidate.album.clone()),
                    genre: (!meta.genres.is_empty()).then(|| meta.genres.join(", ")),
                    year: meta.year,
                    isrc: meta.isrc.clone(),
                    label: meta.label.clone(),
                    track_number,
                };
                let artist_dir = sanitize_filename(&candidate.artist);
                let dir = if self.options.artist_folders && !artist_dir.is_empty() {
                    self.options.output_dir.join(artist_dir)
                } else {
                    self.options.output_dir.clone()
                };
                let stem = sanitize_filename(&candidate.display_name());
                (dir, stem, tags, Some(candidate.provider))
            }
            None => {
                let title = unidentified_title(segment);
                let tags = TrackTags {
                    title: Some(title.clone()),
                    track_number,
                    ..Default::default()
                };
                (self.options.output_dir.clone(), sanitize_filename(&title), tags, None)
            }
        };

        // A name made only of reserved characters falls back to the ordinal
        let stem = if stem.is_empty() {
            sanitize_filename(&unidentified_title(segment))
        } else {
            stem
        };

        let is_identified = source.is_some();
        let preexisting = dir.join(format!("{}.{}", stem, OUTPUT_EXTENSION));
        let status = if is_identified && self.options.skip_existing && preexisting.exists() {
            OutputStatus::SkippedExisting
        } else {
            OutputStatus::Planned
        };

        let path = if status == OutputStatus::SkippedExisting {
            taken.insert(preexisting.to_string_lossy().to_lowercase());
            preexisting
        } else {
            let stem = unique_stem(&dir, &stem, taken);
            dir.join(format!("{}.{}", stem, OUTPUT_EXTENSION))
        };

        OutputTrack {
            segment_index: segment.index,
            start_seconds: segment.start_seconds,
            end_seconds: segment.end_seconds,
            path,
            tags,
            identified: is_identified,
            source,
            status,
        }
    }

    /// Write every planned track; one [`OutputTrack`] per segment, in order
    pub async fn assemble(&self, segments: &[Segment], results: &[IdentificationResult]) -> Vec<OutputTrack> {
        let planned = self.plan(segments, results);
        let artwork_urls: HashMap<usize, &str> = results
            .iter()
            .filter(|r| r.is_identified())
            .filter_map(|r| r.metadata.artwork_url.as_deref().map(|url| (r.segment_index, url)))
            .collect();

        let mut tracks = Vec::with_capacity(planned.len());
        for (segment, mut track) in segments.iter().zip(planned) {
            if track.status != OutputStatus::Planned {
                info!(segment_index = track.segment_index, path = %track.path.display(), "Track already in library; skipped");
                tracks.push(track);
                continue;
            }

            self.events
                .emit_lossy(MixEvent::segment(track.segment_index, SegmentPhase::Writing, track.source));

            let artwork = match (&self.artwork, artwork_urls.get(&track.segment_index)) {
                (Some(fetcher), Some(url)) => fetcher.fetch(url).await,
                _ => None,
            };

            let folder_art = self.options.artist_folders && track.identified;
            let job_segment = segment.clone();
            let job_path = track.path.clone();
            let job_tags = track.tags.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                write_track(&job_segment, &job_path, &job_tags, artwork.as_deref().map(Vec::as_slice), folder_art)
            })
            .await
            .unwrap_or_else(|e| Err(AssemblyError::Task(e.to_string())));

            match outcome {
                Ok(()) => {
                    debug!(segment_index = track.segment_index, path = %track.path.display(), "Track written");
                    track.status = OutputStatus::Written;
                    self.events
                        .emit_lossy(MixEvent::segment(track.segment_index, SegmentPhase::Written, track.source));
                }
                Err(e) => {
                    warn!(
                        segment_index = track.segment_index,
                        path = %track.path.display(),
                        error = %e,
                        "Track write failed"
                    );
                    track.status = OutputStatus::Failed { error: e.to_string() };
                    self.events
                        .emit_lossy(MixEvent::segment(track.segment_index, SegmentPhase::WriteFailed, track.source));
                }
            }
            tracks.push(track);
        }

        let written = tracks.iter().filter(|t| t.is_written()).count();
        info!(tracks = tracks.len(), written, "Assembly complete");
        tracks
    }
}

/// Write audio, tags and the artist folder image for one track
///
/// A partially written file is removed on failure.
fn write_track(
    segment: &Segment,
    path: &Path,
    tags: &TrackTags,
    artwork: Option<&[u8]>,
    folder_art: bool,
) -> Result<(), AssemblyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let written = write_wav_file(segment, SampleWindow::Full, path)
        .map_err(AssemblyError::from)
        .and_then(|()| write_tags(path, tags, artwork));
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e);
    }

    if let (true, Some(image), Some(parent)) = (folder_art, artwork, path.parent()) {
        let folder_jpg = parent.join(FOLDER_ART_NAME);
        if !folder_jpg.exists() {
            // Sidecar art is a nicety; the track itself is already complete
            if let Err(e) = fs::write(&folder_jpg, image) {
                warn!(path = %folder_jpg.display(), error = %e, "Could not write folder image");
            }
        }
    }
    Ok(())
}

fn image_mime(data: &[u8]) -> MimeType {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        MimeType::Png
    } else {
        MimeType::Jpeg
    }
}

/// Write `tags` (and the front cover) into the file's primary tag
pub fn write_tags(path: &Path, tags: &TrackTags, artwork: Option<&[u8]>) -> Result<(), AssemblyError> {
    let mut tagged_file = Probe::open(path)?.read()?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.primary_tag_mut().is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| AssemblyError::Tag(format!("no writable {:?} tag", tag_type)))?;

    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }
    if let Some(isrc) = &tags.isrc {
        tag.insert_text(ItemKey::Isrc, isrc.clone());
    }
    if let Some(label) = &tags.label {
        tag.insert_text(ItemKey::Label, label.clone());
    }
    tag.set_track(tags.track_number);

    if let Some(data) = artwork {
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(image_mime(data)),
            None,
            data.to_vec(),
        ));
    }

    tagged_file.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

/// Reason label for summaries
pub fn unidentified_label(reason: &UnidentifiedReason) -> &'static str {
    match reason {
        UnidentifiedReason::SplitOnly => "split only",
        UnidentifiedReason::TooShort => "too short",
        UnidentifiedReason::NoMatch => "no match",
        UnidentifiedReason::Cancelled => "cancelled",
        UnidentifiedReason::ExtractionFailed { .. } => "extraction failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::segment_extractor::extract;
    use crate::types::{EnhancedMetadata, IdentificationCandidate, ProviderId, ReconciliationMethod};
    use crate::utils::MixSource;
    use crate::workflow::boundary_detector::Boundary;

    fn segments(edges: &[f64]) -> Vec<Segment> {
        let rate = 200;
        let total = *edges.last().unwrap();
        let samples = (0..(total * rate as f64) as usize)
            .map(|i| ((i as f32) * 0.05).sin() * 0.5)
            .collect();
        let source = Arc::new(MixSource::from_interleaved(samples, rate, 1).unwrap());
        extract(&source, &Boundary::from_edges(edges.to_vec()).unwrap())
    }

    fn identified(index: usize, artist: &str, title: &str) -> IdentificationResult {
        IdentificationResult {
            segment_index: index,
            decision: Decision::Identified {
                candidate: IdentificationCandidate::new(ProviderId::AcrCloud, artist, title, 0.95),
                method: ReconciliationMethod::EarlyAccept,
            },
            attempts: Vec::new(),
            metadata: EnhancedMetadata {
                album: Some("Homework".into()),
                year: Some(1997),
                genres: vec!["house".into(), "french house".into()],
                isrc: Some("GBDUW9700001".into()),
                label: Some("Virgin".into()),
                artwork_url: None,
            },
        }
    }

    fn unidentified(index: usize) -> IdentificationResult {
        IdentificationResult::unidentified(index, UnidentifiedReason::NoMatch, Vec::new())
    }

    fn options(dir: &Path) -> AssemblerOptions {
        AssemblerOptions {
            output_dir: dir.to_path_buf(),
            artist_folders: true,
            skip_existing: false,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC - Back in Black"), "AC-DC - Back in Black");
        assert_eq!(sanitize_filename("What? <Live> \"Take\" *1*"), "What Live Take 1");
        assert_eq!(sanitize_filename("Track 01 (12:45)"), "Track 01 (12-45)");
        assert_eq!(sanitize_filename("Title... "), "Title");
        assert_eq!(sanitize_filename("tab\there"), "tabhere");
        assert_eq!(sanitize_filename("???"), "");
        assert!(sanitize_filename(&"é".repeat(200)).len() <= MAX_STEM_BYTES);
    }

    #[test]
    fn test_unidentified_title() {
        let segs = segments(&[0.0, 65.0, 3700.0]);
        assert_eq!(unidentified_title(&segs[0]), "Track 01 (00:00)");
        assert_eq!(unidentified_title(&segs[1]), "Track 02 (01:05)");
    }

    #[test]
    fn test_plan_names_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        let segs = segments(&[0.0, 30.0, 60.0, 90.0]);
        let results = vec![
            identified(0, "Daft Punk", "Da Funk"),
            unidentified(1),
            identified(2, "Daft Punk", "Da Funk"),
        ];
        let plan = TrackAssembler::new(options(dir.path())).plan(&segs, &results);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].path, dir.path().join("Daft Punk").join("Daft Punk - Da Funk.wav"));
        assert_eq!(plan[1].path, dir.path().join("Track 02 (00-30).wav"));
        assert_eq!(plan[2].path, dir.path().join("Daft Punk").join("Daft Punk - Da Funk (2).wav"));
        assert!(plan.iter().all(|t| t.status == OutputStatus::Planned));

        assert_eq!(plan[0].tags.genre.as_deref(), Some("house, french house"));
        assert_eq!(plan[0].tags.track_number, 1);
        assert_eq!(plan[1].tags.title.as_deref(), Some("Track 02 (00:30)"));
        assert_eq!(plan[1].source, None);
        assert!(!dir.path().join("Daft Punk").exists());
    }

    #[test]
    fn test_plan_collisions_are_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let segs = segments(&[0.0, 30.0, 60.0]);
        let results = vec![identified(0, "Moby", "Porcelain"), identified(1, "MOBY", "porcelain")];
        let mut opts = options(dir.path());
        opts.artist_folders = false;
        let plan = TrackAssembler::new(opts).plan(&segs, &results);
        assert_eq!(plan[1].path, dir.path().join("MOBY - porcelain (2).wav"));
    }

    #[test]
    fn test_plan_skips_existing_library_tracks() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Moby")).unwrap();
        fs::write(dir.path().join("Moby").join("Moby - Porcelain.wav"), b"existing").unwrap();

        let segs = segments(&[0.0, 30.0]);
        let results = vec![identified(0, "Moby", "Porcelain")];

        let mut opts = options(dir.path());
        opts.skip_existing = true;
        let plan = TrackAssembler::new(opts).plan(&segs, &results);
        assert_eq!(plan[0].status, OutputStatus::SkippedExisting);

        let plan = TrackAssembler::new(options(dir.path())).plan(&segs, &results);
        assert_eq!(plan[0].status, OutputStatus::Planned);
    }

    #[tokio::test]
    async fn test_assemble_writes_tagged_files() {
        let dir = tempfile::tempdir().unwrap();
        let segs = segments(&[0.0, 30.0, 60.0]);
        let results = vec![identified(0, "Daft Punk", "Da Funk"), unidentified(1)];

        let tracks = TrackAssembler::new(options(dir.path())).assemble(&segs, &results).await;
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.is_written()), "{:?}", tracks);

        let reader = hound::WavReader::open(&tracks[0].path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 30 * 200);

        let tagged = Probe::open(&tracks[0].path).unwrap().read().unwrap();
        let tag = tagged.primary_tag().unwrap();
        assert_eq!(tag.artist().as_deref(), Some("Daft Punk"));
        assert_eq!(tag.title().as_deref(), Some("Da Funk"));
        assert_eq!(tag.album().as_deref(), Some("Homework"));
        assert_eq!(tag.track(), Some(1));

        let tagged = Probe::open(&tracks[1].path).unwrap().read().unwrap();
        assert_eq!(tagged.primary_tag().unwrap().title().as_deref(), Some("Track 02 (00:30)"));
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the artist folder should go
        fs::write(dir.path().join("Daft Punk"), b"not a directory").unwrap();

        let segs = segments(&[0.0, 30.0, 60.0]);
        let results = vec![identified(0, "Daft Punk", "Da Funk"), unidentified(1)];
        let tracks = TrackAssembler::new(options(dir.path())).assemble(&segs, &results).await;

        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].is_failed());
        assert!(tracks[1].is_written());
    }

    #[tokio::test]
    async fn test_folder_art_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let segs = segments(&[0.0, 30.0, 60.0]);
        let image = vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0];

        let path = dir.path().join("Artist").join("Artist - One.wav");
        let tags = TrackTags {
            artist: Some("Artist".into()),
            title: Some("One".into()),
            track_number: 1,
            ..Default::default()
        };
        write_track(&segs[0], &path, &tags, Some(&image), true).unwrap();
        let folder = dir.path().join("Artist").join(FOLDER_ART_NAME);
        assert_eq!(fs::read(&folder).unwrap(), image);

        fs::write(&folder, b"kept").unwrap();
        let path = dir.path().join("Artist").join("Artist - Two.wav");
        write_track(&segs[1], &path, &tags, Some(&image), true).unwrap();
        assert_eq!(fs::read(&folder).unwrap(), b"kept");
    }
}
