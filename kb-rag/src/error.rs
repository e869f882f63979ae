//! Error types for the `kb-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while indexing or retrieving documents.
#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed input rejected before any processing started.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Two vectors of unequal length were compared.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Length of the reference vector.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// The embedding provider failed or was rate-limited.
    #[error("Embedding provider error ({provider}): {message}")]
    ProviderError {
        /// The embedding provider that produced the error.
        provider: String,
        /// The provider's message, surfaced verbatim.
        message: String,
    },

    /// The embedding provider did not answer within the configured timeout.
    #[error("Embedding provider timed out ({provider}) after {timeout:?}")]
    ProviderTimeout {
        /// The embedding provider that timed out.
        provider: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A persistent vector backend is unreachable or rejected a request.
    #[error("Vector backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An unknown document or chunk id was requested.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up (`document`, `chunk`).
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Shorthand for a missing document.
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "document", id: id.into() }
    }

    /// Whether a caller may retry the failed operation with backoff.
    ///
    /// Only embedding provider failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderError { .. } | Self::ProviderTimeout { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
