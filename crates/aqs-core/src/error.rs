//! Error types.
//!
//! `EvalError` is the taxonomy every pipeline component reports in; the
//! orchestrator records its [`ErrorKind`] in checkpoints and run summaries.
//! `ProviderError` classifies transport failures so the gateway can decide
//! whether a call is worth retrying without string matching.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while evaluating a single task.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A required input file is absent.
    #[error("data missing: {0}")]
    DataMissing(String),

    /// An input file exists but could not be understood.
    #[error("data malformed: {0}")]
    DataMalformed(String),

    /// The backend could not be reached, or kept failing until retries ran out.
    #[error("backend '{backend}' unavailable after {attempts} attempt(s): {message}")]
    BackendUnavailable {
        backend: String,
        attempts: u32,
        message: String,
    },

    /// The backend asked us to slow down.
    #[error("backend '{backend}' rate limited, retry after {retry_after_ms}ms")]
    BackendRateLimited { backend: String, retry_after_ms: u64 },

    /// The backend answered, but even the corrective retry produced no usable output.
    #[error("backend '{backend}' returned invalid output: {message}")]
    BackendOutputInvalid { backend: String, message: String },

    /// No JSON object, or a required section is absent.
    #[error("response unparseable: {0}")]
    ResponseUnparseable(String),

    /// A completed checkpoint was produced from different inputs.
    #[error("checksum mismatch for {task}: stored {stored}, current {current}")]
    ChecksumMismatch {
        task: String,
        stored: String,
        current: String,
    },

    /// The assessment has no questions; reported through a sentinel result.
    #[error("no questions evaluable in assessment '{0}'")]
    NoQuestionsEvaluable(String),

    /// The checkpoint store could not be read or written.
    #[error("checkpoint store: {0}")]
    Checkpoint(String),

    /// A broken invariant inside the engine.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::DataMissing(_) => ErrorKind::DataMissing,
            EvalError::DataMalformed(_) => ErrorKind::DataMalformed,
            EvalError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            EvalError::BackendRateLimited { .. } => ErrorKind::BackendRateLimited,
            EvalError::BackendOutputInvalid { .. } => ErrorKind::BackendOutputInvalid,
            EvalError::ResponseUnparseable(_) => ErrorKind::ResponseUnparseable,
            EvalError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            EvalError::NoQuestionsEvaluable(_) => ErrorKind::NoQuestionsEvaluable,
            EvalError::Checkpoint(_) => ErrorKind::Checkpoint,
            EvalError::Internal(_) => ErrorKind::Internal,
            EvalError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Serializable discriminant of [`EvalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataMissing,
    DataMalformed,
    BackendUnavailable,
    BackendRateLimited,
    BackendOutputInvalid,
    ResponseUnparseable,
    ChecksumMismatch,
    NoQuestionsEvaluable,
    Checkpoint,
    Internal,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DataMissing => "DataMissing",
            ErrorKind::DataMalformed => "DataMalformed",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::BackendRateLimited => "BackendRateLimited",
            ErrorKind::BackendOutputInvalid => "BackendOutputInvalid",
            ErrorKind::ResponseUnparseable => "ResponseUnparseable",
            ErrorKind::ChecksumMismatch => "ChecksumMismatch",
            ErrorKind::NoQuestionsEvaluable => "NoQuestionsEvaluable",
            ErrorKind::Checkpoint => "Checkpoint",
            ErrorKind::Internal => "Internal",
            ErrorKind::Io => "Io",
        };
        f.write_str(s)
    }
}

/// Errors that can occur when interacting with a scoring backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    ///
    /// Client errors other than 408 and 429 won't go away on retry; a status
    /// of 0 marks a response body we failed to decode, which may.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_) => true,
            ProviderError::ApiError { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
