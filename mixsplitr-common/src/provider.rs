//! Identity of the external recognition and metadata services

use serde::{Deserialize, Serialize};
use std::fmt;

/// External service identity
///
/// `AcrCloud` and `AcoustId` answer "what is this audio". The remaining
/// providers only supply supplementary metadata for an already chosen match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    AcrCloud,
    AcoustId,
    MusicBrainz,
    LastFm,
    Itunes,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::AcrCloud => "acrcloud",
            ProviderId::AcoustId => "acoustid",
            ProviderId::MusicBrainz => "musicbrainz",
            ProviderId::LastFm => "lastfm",
            ProviderId::Itunes => "itunes",
        }
    }

    /// True for providers that can produce a primary match from audio
    pub fn is_recognizer(&self) -> bool {
        matches!(self, ProviderId::AcrCloud | ProviderId::AcoustId)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
