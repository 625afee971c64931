//! # MixSplitR Common Library
//!
//! Shared code for the MixSplitR engine and its command-line front end:
//! - Error and result types
//! - TOML configuration loading and value resolution
//! - Provider credential store
//! - Progress event types and the event bus
//! - Clock-style time formatting

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod human_time;
pub mod provider;

pub use error::{Error, Result};
pub use provider::ProviderId;
