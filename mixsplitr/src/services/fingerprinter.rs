//! Chromaprint fingerprints via the external `fpcalc` tool
//!
//! AcoustID lookups need a Chromaprint fingerprint of the audio. The
//! fingerprint is computed by running `fpcalc -json` on a materialized WAV
//! clip of the segment.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::types::ProviderError;

/// Default executable name, looked up on `PATH`
pub const FPCALC_PROGRAM: &str = "fpcalc";

/// Fingerprint plus the duration it was computed over
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Fingerprint {
    pub duration: f64,
    pub fingerprint: String,
}

/// Computes an AcoustID-compatible fingerprint for an audio file
#[async_trait]
pub trait AudioFingerprinter: Send + Sync {
    async fn fingerprint(&self, audio_path: &Path) -> Result<Fingerprint, ProviderError>;
}

/// `fpcalc`-backed fingerprinter
#[derive(Debug, Clone)]
pub struct FpcalcFingerprinter {
    program: PathBuf,
}

impl FpcalcFingerprinter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FpcalcFingerprinter {
    fn default() -> Self {
        Self::new(FPCALC_PROGRAM)
    }
}

#[async_trait]
impl AudioFingerprinter for FpcalcFingerprinter {
    async fn fingerprint(&self, audio_path: &Path) -> Result<Fingerprint, ProviderError> {
        debug!(path = %audio_path.display(), program = %self.program.display(), "Running fingerprint tool");

        let output = Command::new(&self.program)
            .arg("-json")
            .arg(audio_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProviderError::Unavailable(format!("{} not found on PATH", self.program.display()))
                } else {
                    ProviderError::Unavailable(format!("failed to run {}: {}", self.program.display(), e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Extraction(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        parse_fpcalc_json(&output.stdout)
    }
}

/// Parse `fpcalc -json` output
pub fn parse_fpcalc_json(stdout: &[u8]) -> Result<Fingerprint, ProviderError> {
    let fp: Fingerprint =
        serde_json::from_slice(stdout).map_err(|e| ProviderError::Parse(format!("fpcalc output: {}", e)))?;
    if fp.fingerprint.is_empty() {
        return Err(ProviderError::Extraction("empty fingerprint".to_string()));
    }
    Ok(fp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fpcalc_json() {
        let fp = parse_fpcalc_json(br#"{"duration": 187.36, "fingerprint": "AQADtEmUaEkSRZEGAA"}"#).unwrap();
        assert_eq!(fp.duration, 187.36);
        assert_eq!(fp.fingerprint, "AQADtEmUaEkSRZEGAA");
    }

    #[test]
    fn test_parse_rejects_garbage_and_empty() {
        assert!(matches!(parse_fpcalc_json(b"ERROR: bad file"), Err(ProviderError::Parse(_))));
        assert!(matches!(
            parse_fpcalc_json(br#"{"duration": 1.0, "fingerprint": ""}"#),
            Err(ProviderError::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let fingerprinter = FpcalcFingerprinter::new("/nonexistent/bin/fpcalc-missing");
        let err = fingerprinter.fingerprint(Path::new("/tmp/none.wav")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
