//! Crate-wide error type and the §7 failure taxonomy.

use thiserror::Error;

/// The failure taxonomy surfaced by the LLM Gateway and the Analysis
/// Orchestrator. Callers branch on this, never on a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call did not complete within its deadline.
    Timeout,
    /// The response could not be parsed as the expected JSON shape.
    ParseError,
    /// The provider rejected the request on content-policy grounds. Never
    /// worth retrying — the same content will always be rejected.
    ContentPolicy,
    /// A non-2xx HTTP response, or a transport-level failure.
    HttpError,
    /// A structural/morphological validation rule rejected extracted data.
    ValidationError,
    /// The storage backend failed to persist or load a record.
    StorageError,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// Whether the Fact Extractor should retry once in-place: true
    /// for transient failures, false for failures that will recur.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::ParseError)
    }
}

/// Classify a raw provider error body into a [`FailureKind`], implementing
/// the `_classify_error` substring match from spec §4.2: `content_filter`,
/// `违规`, and `审核` anywhere in the body mean the provider's own content
/// moderation rejected the request.
#[must_use]
pub fn classify_provider_error(body: &str) -> FailureKind {
    const CONTENT_POLICY_MARKERS: [&str; 3] = ["content_filter", "违规", "审核"];
    if CONTENT_POLICY_MARKERS.iter().any(|m| body.contains(m)) {
        FailureKind::ContentPolicy
    } else {
        FailureKind::HttpError
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A call to the LLM Gateway failed; carries the classified kind and the
    /// provider's raw message for logging.
    #[error("llm call failed ({kind:?}): {message}")]
    Llm {
        /// Which bucket of the §7 taxonomy this falls into.
        kind: FailureKind,
        /// The raw message from the provider or transport, for logs.
        message: String,
    },

    /// A Fact Validator rule rejected extracted data outright (distinct from
    /// the in-chapter soft rejection, which just drops the offending record).
    #[error("validation error: {0}")]
    Validation(String),

    /// The injected `Storage` implementation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The Hierarchy Consolidator or Map Layout Engine found the input
    /// hierarchy/graph to be structurally unusable (e.g. empty with no
    /// uber-root configured).
    #[error("structural error: {0}")]
    Structural(String),

    /// The operation was cancelled by the caller between chapters or at a
    /// rebuild phase boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON (de)serialization failure not otherwise classified above.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// The §7 [`FailureKind`] this error maps to, for the per-chapter
    /// `error_type` tag the Orchestrator records.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Llm { kind,.. } => *kind,
            Error::Validation(_) => FailureKind::ValidationError,
            Error::Storage(_) => FailureKind::StorageError,
            Error::Structural(_) => FailureKind::Unknown,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Serde(_) => FailureKind::ParseError,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_chinese_moderation_markers() {
        assert_eq!(classify_provider_error("内容违规"), FailureKind::ContentPolicy);
        assert_eq!(classify_provider_error("未通过审核"), FailureKind::ContentPolicy);
        assert_eq!(
            classify_provider_error("upstream returned content_filter"),
            FailureKind::ContentPolicy
        );
    }

    #[test]
    fn plain_http_errors_are_not_content_policy() {
        assert_eq!(classify_provider_error("502 bad gateway"), FailureKind::HttpError);
    }

    #[test]
    fn only_timeout_and_parse_are_transient() {
        assert!(FailureKind::Timeout.is_transient());
        assert!(FailureKind::ParseError.is_transient());
        assert!(!FailureKind::ContentPolicy.is_transient());
        assert!(!FailureKind::HttpError.is_transient());
    }

    #[test]
    fn error_maps_to_expected_failure_kind() {
        assert_eq!(Error::Cancelled.failure_kind(), FailureKind::Cancelled);
        assert_eq!(
            Error::Storage("disk full".into()).failure_kind(),
            FailureKind::StorageError
        );
    }
}
