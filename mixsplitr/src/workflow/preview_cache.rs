//! Preview cache for the preview/apply workflow
//!
//! `preview` saves boundaries and identifications here without writing any
//! audio. The file is plain JSON so a misidentified track can be corrected by
//! hand before `apply` assembles the output from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RunMode;
use crate::types::{IdentificationResult, OutputStatus, OutputTrack};

pub const CACHE_FILE_NAME: &str = "mixsplitr_cache.json";
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Preview cache not found at {0}; run a preview first")]
    NotFound(PathBuf),

    #[error("Preview cache IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Preview cache is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Preview cache version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },

    /// Edges and tracks disagree, usually after a hand edit
    #[error("Preview cache is inconsistent: {0}")]
    Inconsistent(String),
}

/// One planned track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTrack {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Planned output path at preview time
    pub path: PathBuf,
    pub status: OutputStatus,
    pub result: IdentificationResult,
}

/// Everything `apply` needs to reproduce a previewed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewCache {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub input: PathBuf,
    pub mode: RunMode,
    /// Boundary edges in seconds, first 0 and last the mix duration
    pub edges: Vec<f64>,
    #[serde(default)]
    pub no_boundaries_found: bool,
    pub tracks: Vec<CachedTrack>,
}

impl PreviewCache {
    pub fn new(
        input: impl Into<PathBuf>,
        mode: RunMode,
        edges: Vec<f64>,
        no_boundaries_found: bool,
        planned: &[OutputTrack],
        results: &[IdentificationResult],
    ) -> Self {
        let tracks = planned
            .iter()
            .zip(results)
            .map(|(track, result)| CachedTrack {
                index: track.segment_index,
                start_seconds: track.start_seconds,
                end_seconds: track.end_seconds,
                path: track.path.clone(),
                status: track.status.clone(),
                result: result.clone(),
            })
            .collect();

        Self {
            version: CACHE_VERSION,
            created_at: Utc::now(),
            input: input.into(),
            mode,
            edges,
            no_boundaries_found,
            tracks,
        }
    }

    /// Identification results in segment order
    pub fn results(&self) -> Vec<IdentificationResult> {
        let mut results: Vec<_> = self.tracks.iter().map(|t| t.result.clone()).collect();
        results.sort_by_key(|r| r.segment_index);
        results
    }

    pub fn identified_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.result.is_identified()).count()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.version != CACHE_VERSION {
            return Err(CacheError::Version {
                found: self.version,
                expected: CACHE_VERSION,
            });
        }
        if self.edges.len() != self.tracks.len() + 1 {
            return Err(CacheError::Inconsistent(format!(
                "{} edges for {} tracks",
                self.edges.len(),
                self.tracks.len()
            )));
        }
        for (position, track) in self.tracks.iter().enumerate() {
            if track.index != position || track.result.segment_index != position {
                return Err(CacheError::Inconsistent(format!("track {} is out of order", position)));
            }
        }
        Ok(())
    }
}

/// Cache location for an output directory
pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CACHE_FILE_NAME)
}

pub fn save(cache: &PreviewCache, path: &Path) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cache)?;
    fs::write(path, json)?;
    info!(path = %path.display(), tracks = cache.tracks.len(), "Preview cache saved");
    Ok(())
}

pub fn load(path: &Path) -> Result<PreviewCache, CacheError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::NotFound(path.to_path_buf())),
        Err(e) => return Err(e.into()),
    };
    let cache: PreviewCache = serde_json::from_str(&json)?;
    cache.check()?;
    debug!(path = %path.display(), tracks = cache.tracks.len(), "Preview cache loaded");
    Ok(cache)
}

/// Remove the cache; `false` when there was none
pub fn clear(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Preview cache removed");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
