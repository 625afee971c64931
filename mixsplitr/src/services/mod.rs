//! Service modules for mix splitting
//!
//! Signal analysis (silence detection, segment extraction), recognition
//! clients (ACRCloud, AcoustID) and enrichment clients (MusicBrainz,
//! Last.fm, iTunes, artwork download).

pub mod acoustid_client;
pub mod acrcloud_client;
pub mod artwork_fetcher;
pub mod fingerprinter;
pub mod itunes_client;
pub mod lastfm_client;
pub mod musicbrainz_client;
pub mod rate_limiter;
pub mod segment_extractor;
pub mod silence_detector;

pub use acoustid_client::AcoustIdClient;
pub use acrcloud_client::AcrCloudClient;
pub use artwork_fetcher::ArtworkFetcher;
pub use fingerprinter::{AudioFingerprinter, FpcalcFingerprinter};
pub use itunes_client::ItunesClient;
pub use lastfm_client::LastFmClient;
pub use musicbrainz_client::MusicBrainzClient;
pub use rate_limiter::ThrottleTracker;
pub use segment_extractor::{extract, ExtractionError, SampleWindow, Segment};
pub use silence_detector::{SilenceDetector, SilenceRegion};
