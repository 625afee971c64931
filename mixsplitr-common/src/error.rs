//! Common error types for MixSplitR

use thiserror::Error;

/// Common result type for MixSplitR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading and resolving settings
#[derive(Error, Debug)]
pub enum Error {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing, unparseable or out-of-range configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Option value not recognized (e.g. an unknown run mode)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
