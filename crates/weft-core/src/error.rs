//! Error types for weft-core.
//!
//! One taxonomy is shared across all Weft crates. Each variant maps to a
//! distinct failure policy:
//!
//! - `InvalidQuery` — caller bug, reported immediately, never retried.
//! - `Mapping` — bad field extraction for one object; callers skip-and-log
//!   at object granularity, never aborting a batch.
//! - `BackendUnavailable` — transient infrastructure fault; retryable
//!   (see [`Error::is_transient`]).
//! - `SchemaMismatch` — field/backend incompatibility; fatal for that
//!   field's indexing, surfaced to the operator.
//! - `RebuildInProgress` — rebuild serialization conflict; caller may
//!   retry later.
//! - `NotFound` — generation-lifecycle invariant violation; loud, never
//!   swallowed.

use thiserror::Error;

/// Result type alias for Weft operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the Weft search layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed query tree; a caller bug, reported immediately.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Field extraction failed for a single object.
    #[error("mapping failed for {object}: {reason}")]
    Mapping {
        /// Identifier of the object that failed to map.
        object: String,
        /// Why extraction failed.
        reason: String,
    },

    /// Transport or connection failure; retryable.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable {
        /// Name of the backend that could not be reached.
        backend: String,
        /// Underlying transport failure.
        reason: String,
    },

    /// A declared field is incompatible with a backend's storage.
    #[error("schema mismatch for field '{field}' on backend '{backend}': {reason}")]
    SchemaMismatch {
        /// The offending field.
        field: String,
        /// The backend that rejected it.
        backend: String,
        /// What was incompatible.
        reason: String,
    },

    /// A rebuild for this (model type, backend) pair is already running.
    #[error("rebuild already in progress for '{model_type}' on backend '{backend}'")]
    RebuildInProgress {
        /// Model type being rebuilt.
        model_type: String,
        /// Backend the rebuild is running against.
        backend: String,
    },

    /// Unknown generation or resource in a lifecycle operation.
    #[error("not found: {0}")]
    NotFound(String),

    /// A rebuild was cancelled between batches.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic operation failure with context.
    #[error("operation failed: {0}")]
    Operation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an `InvalidQuery` error.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery(reason.into())
    }

    /// Create a `Mapping` error for one object.
    pub fn mapping(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create a `BackendUnavailable` error.
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a `SchemaMismatch` error.
    pub fn schema_mismatch(
        field: impl Into<String>,
        backend: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            field: field.into(),
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a `RebuildInProgress` error.
    pub fn rebuild_in_progress(
        model_type: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self::RebuildInProgress {
            model_type: model_type.into(),
            backend: backend.into(),
        }
    }

    /// Create a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an `Operation` error.
    pub fn operation(reason: impl Into<String>) -> Self {
        Self::Operation(reason.into())
    }

    /// Whether this error is transient and worth retrying.
    ///
    /// Only `BackendUnavailable` qualifies; everything else is either a
    /// caller bug, a schema problem, or an internal invariant violation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_query_display() {
        let err = Error::invalid_query("boost weight must be positive");
        assert_eq!(
            err.to_string(),
            "invalid query: boost weight must be positive"
        );
    }

    #[test]
    fn test_mapping_display() {
        let err = Error::mapping("page:42", "field 'title' returned a number");
        assert!(err.to_string().contains("page:42"));
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn test_backend_unavailable_is_transient() {
        let err = Error::backend_unavailable("remote", "connection refused");
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_errors_not_transient() {
        assert!(!Error::invalid_query("x").is_transient());
        assert!(!Error::not_found("generation 3").is_transient());
        assert!(!Error::rebuild_in_progress("page", "sqlite").is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_rebuild_in_progress_display() {
        let err = Error::rebuild_in_progress("page", "remote");
        assert_eq!(
            err.to_string(),
            "rebuild already in progress for 'page' on backend 'remote'"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
