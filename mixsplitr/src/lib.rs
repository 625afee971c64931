//! mixsplitr: split DJ mixes into identified, tagged tracks
//!
//! Library interface for the `mixsplitr` binary and integration tests.

pub mod config;
pub mod error;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::config::{RunConfig, RunMode};
pub use crate::error::{AssemblyError, RunError};
pub use crate::types::{IdentificationResult, OutputStatus, OutputTrack};
pub use crate::workflow::{run, run_with, RunReport};
