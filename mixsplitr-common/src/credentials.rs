//! Provider credential store
//!
//! Credentials are resolved once per process (CLI > ENV > TOML) and then
//! handed to the engine as a read-only value. The engine never reads the
//! environment itself.

use crate::config::CredentialSettings;
use crate::ProviderId;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

pub const ENV_ACRCLOUD_HOST: &str = "MIXSPLITR_ACRCLOUD_HOST";
pub const ENV_ACRCLOUD_ACCESS_KEY: &str = "MIXSPLITR_ACRCLOUD_ACCESS_KEY";
pub const ENV_ACRCLOUD_ACCESS_SECRET: &str = "MIXSPLITR_ACRCLOUD_ACCESS_SECRET";
pub const ENV_ACOUSTID_API_KEY: &str = "MIXSPLITR_ACOUSTID_API_KEY";
pub const ENV_LASTFM_API_KEY: &str = "MIXSPLITR_LASTFM_API_KEY";

/// Credentials for one provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: Option<String>,
    pub key: String,
    pub secret: Option<String>,
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            host: None,
            key: key.into(),
            secret: None,
        }
    }

    pub fn signed(host: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            key: key.into(),
            secret: Some(secret.into()),
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("key", &mask(&self.key))
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}***", visible)
}

/// Command-line credential overrides
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub acrcloud_host: Option<String>,
    pub acrcloud_access_key: Option<String>,
    pub acrcloud_access_secret: Option<String>,
    pub acoustid_api_key: Option<String>,
    pub lastfm_api_key: Option<String>,
}

/// Read-only credential lookup keyed by provider
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<ProviderId, Credentials>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mainly for callers that already hold keys
    pub fn with(mut self, provider: ProviderId, credentials: Credentials) -> Self {
        self.entries.insert(provider, credentials);
        self
    }

    pub fn get_credentials(&self, provider: ProviderId) -> Option<&Credentials> {
        self.entries.get(&provider)
    }

    pub fn has(&self, provider: ProviderId) -> bool {
        self.entries.contains_key(&provider)
    }

    /// Resolve every provider's credentials from CLI, environment and TOML
    pub fn resolve(overrides: &CredentialOverrides, toml: &CredentialSettings) -> Self {
        let mut store = Self::new();
        let acr = toml.acrcloud.clone().unwrap_or_default();

        let host = pick("ACRCloud host", &overrides.acrcloud_host, ENV_ACRCLOUD_HOST, &acr.host);
        let key = pick(
            "ACRCloud access key",
            &overrides.acrcloud_access_key,
            ENV_ACRCLOUD_ACCESS_KEY,
            &acr.access_key,
        );
        let secret = pick(
            "ACRCloud access secret",
            &overrides.acrcloud_access_secret,
            ENV_ACRCLOUD_ACCESS_SECRET,
            &acr.access_secret,
        );
        match (host, key, secret) {
            (Some(host), Some(key), Some(secret)) => {
                store.entries.insert(ProviderId::AcrCloud, Credentials::signed(host, key, secret));
            }
            (None, None, None) => {}
            _ => warn!("ACRCloud credentials incomplete (need host, access key and secret); ACRCloud disabled"),
        }

        if let Some(key) = pick(
            "AcoustID API key",
            &overrides.acoustid_api_key,
            ENV_ACOUSTID_API_KEY,
            &toml.acoustid_api_key,
        ) {
            store.entries.insert(ProviderId::AcoustId, Credentials::api_key(key));
        }

        if let Some(key) = pick(
            "Last.fm API key",
            &overrides.lastfm_api_key,
            ENV_LASTFM_API_KEY,
            &toml.lastfm_api_key,
        ) {
            store.entries.insert(ProviderId::LastFm, Credentials::api_key(key));
        }

        store
    }
}

/// Valid key: non-empty after trimming whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn pick(
    label: &str,
    cli: &Option<String>,
    env_var: &str,
    toml: &Option<String>,
) -> Option<String> {
    if let Some(value) = cli.as_deref().filter(|v| is_valid_key(v)) {
        info!("{} loaded from command line", label);
        return Some(value.trim().to_string());
    }
    if let Some(value) = std::env::var(env_var).ok().filter(|v| is_valid_key(v)) {
        info!("{} loaded from environment variable", label);
        return Some(value.trim().to_string());
    }
    if let Some(value) = toml.as_deref().filter(|v| is_valid_key(v)) {
        info!("{} loaded from config file", label);
        return Some(value.trim().to_string());
    }
    None
}
