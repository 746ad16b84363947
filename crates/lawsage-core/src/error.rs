use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::FinishReason;

/// Failure taxonomy shared by nodes, the retry wrapper and the caller-facing report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Pre-flight audit failure. Fatal, no generation attempted.
    SafetyRejection,
    /// Rate limiting. Retried locally.
    TransientGenerationFailure,
    /// Non-retryable model error or empty output.
    GenerationFailure,
    /// Structural or citation check failure. Triggers loop-back.
    ReliabilityDefect,
    /// Authority index unreachable. Recorded as pending manual verification.
    VerificationUncertainty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub retryable: bool,
    pub kind: ErrorKind,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("model blocked output: {0:?}")]
    Blocked(FinishReason),

    #[error("model returned no content")]
    Empty,

    #[error("generation api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Only a narrowly identified rate-limit condition is retryable.
pub fn classify_error(err: &GenerationError) -> ErrorClass {
    match err {
        GenerationError::RateLimited(_) => ErrorClass {
            retryable: true,
            kind: ErrorKind::TransientGenerationFailure,
        },
        GenerationError::Api { status: 429, .. } => ErrorClass {
            retryable: true,
            kind: ErrorKind::TransientGenerationFailure,
        },
        _ => ErrorClass {
            retryable: false,
            kind: ErrorKind::GenerationFailure,
        },
    }
}

/// Whether an error message names a quota or rate-limit condition.
pub fn is_rate_limit_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("429") || msg.contains("quota exceeded") || msg.contains("rate limit")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// Timeouts, 5xx, connection resets: the authority may exist, we just could not ask.
    #[error("authority index unavailable: {0}")]
    Transient(String),

    /// Bad credentials, malformed responses, missing configuration.
    #[error("authority index error: {0}")]
    Hard(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("deadline exceeded while running node '{node}'")]
    DeadlineExceeded { node: String },

    #[error("hard step limit {limit} reached at node '{node}'")]
    StepLimit { node: String, limit: u32 },

    #[error("router after '{from}' chose '{to}', which is not a declared target")]
    UnknownRoute { from: String, to: String },
}
