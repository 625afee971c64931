//! Error types for the split engine
//!
//! Only decoding and configuration problems abort a run. Provider, extraction
//! and write failures are recorded per segment instead.

use thiserror::Error;

use crate::utils::DecodeError;
use crate::workflow::boundary_detector::BoundaryError;
use crate::workflow::preview_cache::CacheError;

/// Fatal run error
#[derive(Debug, Error)]
pub enum RunError {
    /// Input could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output directory or scratch space could not be prepared
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Preview cache could not be read or written
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A blocking worker panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<mixsplitr_common::Error> for RunError {
    fn from(e: mixsplitr_common::Error) -> Self {
        match e {
            mixsplitr_common::Error::Io(io) => RunError::Io(io),
            mixsplitr_common::Error::Config(msg) | mixsplitr_common::Error::InvalidInput(msg) => RunError::Config(msg),
        }
    }
}

impl From<BoundaryError> for RunError {
    fn from(e: BoundaryError) -> Self {
        match e {
            BoundaryError::Decode(decode) => RunError::Decode(decode),
            other => RunError::Config(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for RunError {
    fn from(e: tokio::task::JoinError) -> Self {
        RunError::Task(e.to_string())
    }
}

/// Per-track write failure, reported in the track's output status
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("Tag write failed: {0}")]
    Tag(String),

    #[error("Write task failed: {0}")]
    Task(String),
}

impl From<lofty::error::LoftyError> for AssemblyError {
    fn from(e: lofty::error::LoftyError) -> Self {
        AssemblyError::Tag(e.to_string())
    }
}
