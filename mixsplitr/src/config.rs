//! Run configuration for the split engine
//!
//! [`RunConfig`] is an explicit value passed into a run. It is built once
//! from the TOML file, the environment and command-line overrides
//! (CLI > ENV > TOML > default) and validated before any audio is touched.

use mixsplitr_common::config::{resolve_setting, TomlConfig};
use mixsplitr_common::credentials::{CredentialOverrides, CredentialStore};
use mixsplitr_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::fingerprinter::FPCALC_PROGRAM;
use crate::workflow::boundary_detector::BoundaryConfig;

pub const DEFAULT_OUTPUT_DIR: &str = "My_Music_Library";

/// Which providers identify segments, and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Split only; no identification
    SplitOnly,
    /// ACRCloud when configured, then AcoustID (public key as last resort)
    #[default]
    AutoTracklist,
    /// AcoustID/MusicBrainz exclusively
    MusicBrainzOnly,
    /// ACRCloud first, AcoustID/MusicBrainz as fallback
    AcrPlusMusicBrainz,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::SplitOnly => "split_only",
            RunMode::AutoTracklist => "auto_tracklist",
            RunMode::MusicBrainzOnly => "musicbrainz_only",
            RunMode::AcrPlusMusicBrainz => "acr_plus_musicbrainz",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "split_only" | "split" => Ok(RunMode::SplitOnly),
            "auto_tracklist" | "auto" => Ok(RunMode::AutoTracklist),
            "musicbrainz_only" | "musicbrainz" | "acoustid" => Ok(RunMode::MusicBrainzOnly),
            "acr_plus_musicbrainz" | "acr_musicbrainz" | "acrcloud" | "acr" => Ok(RunMode::AcrPlusMusicBrainz),
            other => Err(Error::InvalidInput(format!(
                "unknown run mode '{}' (expected split_only, auto_tracklist, musicbrainz_only or acr_plus_musicbrainz)",
                other
            ))),
        }
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub detection: BoundaryConfig,
    /// Inputs shorter than this are kept as one track without detection
    pub single_track_below_seconds: Option<f64>,

    pub accept_confidence_threshold: f64,
    pub max_concurrent_identifications: usize,
    pub provider_timeout_seconds: u64,
    pub retry_count: u32,
    /// First retry delay; doubles per retry
    pub retry_base_delay: Duration,
    pub throttle_skip_after: u32,
    pub min_identify_duration: f64,
    pub enrich_metadata: bool,
    pub fetch_artwork: bool,
    pub fpcalc_path: PathBuf,

    pub output_dir: PathBuf,
    pub artist_folders: bool,
    pub skip_existing: bool,

    pub credentials: CredentialStore,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            detection: BoundaryConfig::default(),
            single_track_below_seconds: None,
            accept_confidence_threshold: 0.9,
            max_concurrent_identifications: 4,
            provider_timeout_seconds: 10,
            retry_count: 2,
            retry_base_delay: Duration::from_millis(500),
            throttle_skip_after: 3,
            min_identify_duration: 10.0,
            enrich_metadata: true,
            fetch_artwork: true,
            fpcalc_path: PathBuf::from(FPCALC_PROGRAM),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            artist_folders: true,
            skip_existing: false,
            credentials: CredentialStore::new(),
        }
    }
}

impl RunConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !d.silence_threshold_db.is_finite() || d.silence_threshold_db >= 0.0 {
            return Err(Error::Config(format!(
                "silence_threshold_db must be negative dBFS, got {}",
                d.silence_threshold_db
            )));
        }
        if !d.min_silence_duration.is_finite() || d.min_silence_duration <= 0.0 {
            return Err(Error::Config(format!(
                "min_silence_duration must be positive, got {}",
                d.min_silence_duration
            )));
        }
        if !d.min_segment_length.is_finite() || d.min_segment_length < 0.0 {
            return Err(Error::Config(format!(
                "min_segment_length must not be negative, got {}",
                d.min_segment_length
            )));
        }
        if d.max_segments == Some(0) {
            return Err(Error::Config("max_segments must be at least 1".to_string()));
        }
        if d.window_ms == 0 {
            return Err(Error::Config("window_ms must be at least 1".to_string()));
        }
        if let Some(limit) = self.single_track_below_seconds {
            if !limit.is_finite() || limit < 0.0 {
                return Err(Error::Config(format!(
                    "single_track_below_seconds must not be negative, got {}",
                    limit
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.accept_confidence_threshold) {
            return Err(Error::Config(format!(
                "accept_confidence_threshold must be within [0, 1], got {}",
                self.accept_confidence_threshold
            )));
        }
        if self.max_concurrent_identifications == 0 {
            return Err(Error::Config("max_concurrent_identifications must be at least 1".to_string()));
        }
        if self.provider_timeout_seconds == 0 {
            return Err(Error::Config("provider_timeout_seconds must be at least 1".to_string()));
        }
        if !self.min_identify_duration.is_finite() || self.min_identify_duration < 0.0 {
            return Err(Error::Config(format!(
                "min_identify_duration must not be negative, got {}",
                self.min_identify_duration
            )));
        }
        if self.throttle_skip_after == 0 {
            return Err(Error::Config("throttle_skip_after must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Values given on the command line; `None` defers to the next tier
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<RunMode>,
    pub silence_threshold_db: Option<f64>,
    pub min_silence_duration: Option<f64>,
    pub min_segment_length: Option<f64>,
    pub max_segments: Option<usize>,
    pub accept_confidence_threshold: Option<f64>,
    pub max_concurrent_identifications: Option<usize>,
    pub provider_timeout_seconds: Option<u64>,
    pub retry_count: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub artist_folders: Option<bool>,
    pub skip_existing: Option<bool>,
    pub credentials: CredentialOverrides,
}

/// Resolve the run mode: CLI > `MIXSPLITR_MODE` > TOML > `auto_tracklist`
pub fn resolve_mode(overrides: &ConfigOverrides, toml: &TomlConfig) -> Result<RunMode> {
    let toml_mode = toml
        .identification
        .mode
        .as_deref()
        .map(RunMode::from_str)
        .transpose()?;
    Ok(resolve_setting(overrides.mode, "MIXSPLITR_MODE", toml_mode, RunMode::default()))
}

/// Build the run configuration from every tier
///
/// The result is not validated; call [`RunConfig::validate`].
pub fn resolve_run_config(overrides: &ConfigOverrides, toml: &TomlConfig) -> RunConfig {
    let defaults = RunConfig::default();
    let det = &toml.detection;
    let id = &toml.identification;
    let out = &toml.output;

    let detection = BoundaryConfig {
        silence_threshold_db: resolve_setting(
            overrides.silence_threshold_db,
            "MIXSPLITR_SILENCE_THRESHOLD_DB",
            det.silence_threshold_db,
            defaults.detection.silence_threshold_db,
        ),
        min_silence_duration: resolve_setting(
            overrides.min_silence_duration,
            "MIXSPLITR_MIN_SILENCE_DURATION",
            det.min_silence_duration,
            defaults.detection.min_silence_duration,
        ),
        min_segment_length: resolve_setting(
            overrides.min_segment_length,
            "MIXSPLITR_MIN_SEGMENT_LENGTH",
            det.min_segment_length,
            defaults.detection.min_segment_length,
        ),
        max_segments: overrides
            .max_segments
            .or_else(|| mixsplitr_common::config::env_value("MIXSPLITR_MAX_SEGMENTS"))
            .or(det.max_segments),
        window_ms: det.window_ms.unwrap_or(defaults.detection.window_ms),
    };

    RunConfig {
        detection,
        single_track_below_seconds: det.single_track_below_seconds,
        accept_confidence_threshold: resolve_setting(
            overrides.accept_confidence_threshold,
            "MIXSPLITR_ACCEPT_THRESHOLD",
            id.accept_confidence_threshold,
            defaults.accept_confidence_threshold,
        ),
        max_concurrent_identifications: resolve_setting(
            overrides.max_concurrent_identifications,
            "MIXSPLITR_MAX_CONCURRENT",
            id.max_concurrent_identifications,
            defaults.max_concurrent_identifications,
        ),
        provider_timeout_seconds: resolve_setting(
            overrides.provider_timeout_seconds,
            "MIXSPLITR_PROVIDER_TIMEOUT",
            id.provider_timeout_seconds,
            defaults.provider_timeout_seconds,
        ),
        retry_count: resolve_setting(
            overrides.retry_count,
            "MIXSPLITR_RETRY_COUNT",
            id.retry_count,
            defaults.retry_count,
        ),
        retry_base_delay: defaults.retry_base_delay,
        throttle_skip_after: id.throttle_skip_after.unwrap_or(defaults.throttle_skip_after),
        min_identify_duration: id.min_identify_duration.unwrap_or(defaults.min_identify_duration),
        enrich_metadata: id.enrich_metadata.unwrap_or(defaults.enrich_metadata),
        fetch_artwork: id.fetch_artwork.unwrap_or(defaults.fetch_artwork),
        fpcalc_path: resolve_setting(
            None,
            "MIXSPLITR_FPCALC",
            id.fpcalc_path.clone(),
            defaults.fpcalc_path,
        ),
        output_dir: resolve_setting(
            overrides.output_dir.clone(),
            "MIXSPLITR_OUTPUT_DIR",
            out.directory.clone(),
            defaults.output_dir,
        ),
        artist_folders: resolve_setting(
            overrides.artist_folders,
            "MIXSPLITR_ARTIST_FOLDERS",
            out.artist_folders,
            defaults.artist_folders,
        ),
        skip_existing: resolve_setting(
            overrides.skip_existing,
            "MIXSPLITR_SKIP_EXISTING",
            out.skip_existing,
            defaults.skip_existing,
        ),
        credentials: CredentialStore::resolve(&overrides.credentials, &toml.credentials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("split_only".parse::<RunMode>().unwrap(), RunMode::SplitOnly);
        assert_eq!("Auto-Tracklist".parse::<RunMode>().unwrap(), RunMode::AutoTracklist);
        assert_eq!("musicbrainz".parse::<RunMode>().unwrap(), RunMode::MusicBrainzOnly);
        assert_eq!("acr-plus-musicbrainz".parse::<RunMode>().unwrap(), RunMode::AcrPlusMusicBrainz);
        assert!("shazam".parse::<RunMode>().is_err());

        for mode in [
            RunMode::SplitOnly,
            RunMode::AutoTracklist,
            RunMode::MusicBrainzOnly,
            RunMode::AcrPlusMusicBrainz,
        ] {
            assert_eq!(mode.to_string().parse::<RunMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RunConfig::default();
        config.detection.silence_threshold_db = 3.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = RunConfig::default();
        config.detection.min_silence_duration = -1.0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.max_concurrent_identifications = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.accept_confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.min_identify_duration = -2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_resolution_priority() {
        std::env::remove_var("MIXSPLITR_SILENCE_THRESHOLD_DB");
        std::env::remove_var("MIXSPLITR_RETRY_COUNT");
        std::env::set_var("MIXSPLITR_MAX_CONCURRENT", "8");

        let mut toml = TomlConfig::default();
        toml.detection.silence_threshold_db = Some(-50.0);
        toml.identification.max_concurrent_identifications = Some(2);
        toml.identification.retry_count = Some(5);

        let overrides = ConfigOverrides {
            retry_count: Some(1),
            ..Default::default()
        };
        let config = resolve_run_config(&overrides, &toml);

        // TOML beats default
        assert_eq!(config.detection.silence_threshold_db, -50.0);
        // ENV beats TOML
        assert_eq!(config.max_concurrent_identifications, 8);
        // CLI beats everything
        assert_eq!(config.retry_count, 1);
        // Untouched: default
        assert_eq!(config.accept_confidence_threshold, 0.9);

        std::env::remove_var("MIXSPLITR_MAX_CONCURRENT");
    }

    #[test]
    #[serial]
    fn test_resolve_mode() {
        std::env::remove_var("MIXSPLITR_MODE");
        let mut toml = TomlConfig::default();
        assert_eq!(
            resolve_mode(&ConfigOverrides::default(), &toml).unwrap(),
            RunMode::AutoTracklist
        );

        toml.identification.mode = Some("split_only".into());
        assert_eq!(resolve_mode(&ConfigOverrides::default(), &toml).unwrap(), RunMode::SplitOnly);

        let cli = ConfigOverrides {
            mode: Some(RunMode::MusicBrainzOnly),
            ..Default::default()
        };
        assert_eq!(resolve_mode(&cli, &toml).unwrap(), RunMode::MusicBrainzOnly);

        toml.identification.mode = Some("bogus".into());
        assert!(resolve_mode(&ConfigOverrides::default(), &toml).is_err());
    }
}
