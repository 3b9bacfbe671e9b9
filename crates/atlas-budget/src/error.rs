//! Error types for budget planning.

use thiserror::Error;

/// Errors that can occur while computing or applying a [`crate::Budget`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A `context_window_tokens` of zero was supplied; there is no sane budget to compute.
    #[error("context window must be a positive token count, got {0}")]
    ZeroContextWindow(u32),
}

/// Result type for budget planning.
pub type Result<T> = std::result::Result<T, Error>;
