//! Configuration file loading and per-value resolution
//!
//! Every tunable follows the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MIXSPLITR_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file at the default location is not an error; the run
//! proceeds on defaults. An explicitly requested file that is missing or
//! malformed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MIXSPLITR_CONFIG";

/// Config file name inside the platform config directory
const CONFIG_DIR_NAME: &str = "mixsplitr";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Parsed `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub detection: DetectionSettings,
    pub identification: IdentificationSettings,
    pub output: OutputSettings,
    pub credentials: CredentialSettings,
    pub logging: LoggingConfig,
}

/// `[detection]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub silence_threshold_db: Option<f64>,
    pub min_silence_duration: Option<f64>,
    pub min_segment_length: Option<f64>,
    pub max_segments: Option<usize>,
    pub window_ms: Option<u32>,
    /// Mixes shorter than this are treated as one track without detection
    pub single_track_below_seconds: Option<f64>,
}

/// `[identification]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationSettings {
    pub mode: Option<String>,
    pub accept_confidence_threshold: Option<f64>,
    pub max_concurrent_identifications: Option<usize>,
    pub provider_timeout_seconds: Option<u64>,
    pub retry_count: Option<u32>,
    pub min_identify_duration: Option<f64>,
    pub throttle_skip_after: Option<u32>,
    pub enrich_metadata: Option<bool>,
    pub fetch_artwork: Option<bool>,
    pub fpcalc_path: Option<PathBuf>,
}

/// `[output]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: Option<PathBuf>,
    pub artist_folders: Option<bool>,
    pub skip_existing: Option<bool>,
}

/// `[credentials]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub acrcloud: Option<AcrCloudSettings>,
    pub acoustid_api_key: Option<String>,
    pub lastfm_api_key: Option<String>,
}

/// `[credentials.acrcloud]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcrCloudSettings {
    pub host: Option<String>,
    pub access_key: Option<String>,
    pub access_secret: Option<String>,
}

/// `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl LoggingConfig {
    /// Log filter directive to use when `RUST_LOG` is unset
    pub fn effective_level(&self) -> String {
        self.level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("info")
            .to_string()
    }
}

/// Platform default config file path (`~/.config/mixsplitr/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Locate the config file to load
///
/// Returns `Ok(None)` when no file is requested and none exists at the
/// default location.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    // Priority 2: Environment variable
    if let Ok(value) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(value.trim());
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file from {} not found: {}",
                CONFIG_ENV_VAR,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    // Priority 3: platform default, only if present
    Ok(default_config_path().filter(|p| p.exists()))
}

/// Parse a config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<TomlConfig>(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// Explicitly requested files must load. A broken file at the default
/// location is reported and replaced by defaults.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let explicit = cli_arg.is_some() || std::env::var(CONFIG_ENV_VAR).is_ok();

    let Some(path) = locate_config_file(cli_arg)? else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    match load_toml_config(&path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config file");
            Ok(config)
        }
        Err(e) if !explicit => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable config file, using defaults");
            Ok(TomlConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Read and parse an environment variable
///
/// Unparseable values are logged and ignored so that the next tier applies.
pub fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %trimmed, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Resolve one setting: CLI > ENV > TOML > default
pub fn resolve_setting<T: FromStr>(
    cli: Option<T>,
    env_var: &str,
    toml_value: Option<T>,
    default: T,
) -> T {
    if let Some(value) = cli {
        debug!(setting = env_var, "Using command-line value");
        return value;
    }
    if let Some(value) = env_value::<T>(env_var) {
        debug!(setting = env_var, "Using environment value");
        return value;
    }
    if let Some(value) = toml_value {
        debug!(setting = env_var, "Using config file value");
        return value;
    }
    default
}
