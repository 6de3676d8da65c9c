//! Error taxonomy for the cycle.
//!
//! Stage-level errors are never propagated out of a run: each stage converts
//! them into a degraded output and an `error` effect. [`CycleError`] is
//! reserved for input validation and broken internal invariants.

use choir_core::error::{MemoryError, ProviderError};
use serde::{Deserialize, Serialize};

/// Stable identifiers carried by `error` effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServiceUnavailable,
    MalformedResponse,
    ValidationFailure,
    StateInvariantViolation,
    LoopLimitReached,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "service_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::ValidationFailure => "validation_failure",
            Self::StateInvariantViolation => "state_invariant_violation",
            Self::LoopLimitReached => "loop_limit_reached",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure inside a single stage invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// A generation, embedding or retrieval call failed.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The model output could not be used.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Input or service output failed validation (e.g. vector width).
    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    #[error("State invariant violated: {0}")]
    StateInvariantViolation(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::StateInvariantViolation(_) => ErrorKind::StateInvariantViolation,
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(e: ProviderError) -> Self {
        Self::ServiceUnavailable(e.to_string())
    }
}

impl From<MemoryError> for StageError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::DimensionMismatch { .. } => Self::ValidationFailure(e.to_string()),
            other => Self::ServiceUnavailable(other.to_string()),
        }
    }
}

/// Errors that abort a cycle run.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// The request itself is unusable (e.g. an empty prompt).
    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    /// The controller reached a state its transition rules forbid.
    #[error("State invariant violated: {0}")]
    StateInvariantViolation(String),
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::StateInvariantViolation(_) => ErrorKind::StateInvariantViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_service_unavailable() {
        let err: StageError = ProviderError::Timeout("30s".into()).into();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn dimension_mismatch_is_validation() {
        let err: StageError = MemoryError::DimensionMismatch {
            expected: 1536,
            actual: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        let err: StageError = MemoryError::QueryFailed("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::LoopLimitReached).unwrap();
        assert_eq!(json, r#""loop_limit_reached""#);
        assert_eq!(ErrorKind::MalformedResponse.to_string(), "malformed_response");
    }
}
