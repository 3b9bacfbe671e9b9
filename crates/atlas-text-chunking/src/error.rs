//! Error types for chapter chunking.

use thiserror::Error;

/// Errors that can occur when splitting a chapter into segments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// `max_chars` was zero; there is no valid split.
    #[error("max_chars must be > 0, got {0}")]
    InvalidMaxChars(usize),
}

/// Result type for chapter chunking.
pub type Result<T> = std::result::Result<T, Error>;
