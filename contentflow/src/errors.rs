//! Error types for the contentflow orchestration engine.
//!
//! Unit-of-work failures are classified with a three-way taxonomy
//! (`retryable` / `non_retryable` / `validation_fail`) that drives retry
//! behavior, run-level failure propagation, and retry recommendations.

use crate::state::StepId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Classification of a unit-of-work failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transient failure (network, rate limit, server error). Retried with
    /// unchanged parameters up to a fixed attempt cap.
    Retryable,
    /// Permanent failure (auth, invalid configuration, bad request).
    /// Surfaced immediately, never retried.
    NonRetryable,
    /// Output did not meet structural/content requirements. May be resolved
    /// by deterministic repair, otherwise surfaces as-is.
    ValidationFail,
    /// Unclassified failure.
    Unknown,
}

impl ErrorCode {
    /// Returns true if automatic retry with identical parameters is allowed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }

    /// Parses a stored error-code string; anything unrecognized is `Unknown`.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "retryable" => Self::Retryable,
            "non_retryable" => Self::NonRetryable,
            "validation_fail" => Self::ValidationFail,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::NonRetryable => write!(f, "non_retryable"),
            Self::ValidationFail => write!(f, "validation_fail"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified failure of a single step.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Step '{step}' failed ({code}): {message}")]
pub struct StepError {
    /// The step that failed.
    pub step: StepId,
    /// Classified error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(step: StepId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            step,
            code,
            message: message.into(),
        }
    }

    /// Creates a retryable step error.
    #[must_use]
    pub fn retryable(step: StepId, message: impl Into<String>) -> Self {
        Self::new(step, ErrorCode::Retryable, message)
    }

    /// Creates a non-retryable step error.
    #[must_use]
    pub fn non_retryable(step: StepId, message: impl Into<String>) -> Self {
        Self::new(step, ErrorCode::NonRetryable, message)
    }

    /// Creates a validation-failure step error.
    #[must_use]
    pub fn validation_fail(step: StepId, message: impl Into<String>) -> Self {
        Self::new(step, ErrorCode::ValidationFail, message)
    }

    /// Converts to a dictionary representation for audit details.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("step".to_string(), serde_json::json!(self.step.as_str()));
        map.insert("code".to_string(), serde_json::json!(self.code.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map
    }
}

/// Aggregate failure of a parallel step group after the round budget is
/// exhausted. Names every still-failing member rather than the first one.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub struct GroupError {
    /// Group parent step.
    pub group: StepId,
    /// Rounds executed before giving up.
    pub rounds: usize,
    /// Last error of each still-failing member, in vocabulary order.
    pub failures: Vec<StepError>,
}

impl GroupError {
    /// Creates a new group error.
    #[must_use]
    pub fn new(group: StepId, rounds: usize, mut failures: Vec<StepError>) -> Self {
        failures.sort_by_key(|f| f.step.ordinal());
        Self {
            group,
            rounds,
            failures,
        }
    }

    /// Steps that never succeeded.
    #[must_use]
    pub fn failed_steps(&self) -> Vec<StepId> {
        self.failures.iter().map(|f| f.step).collect()
    }

    /// The most severe classification among member failures.
    ///
    /// `non_retryable` dominates, then `validation_fail`, then `retryable`.
    #[must_use]
    pub fn dominant_code(&self) -> ErrorCode {
        let mut code = ErrorCode::Unknown;
        for failure in &self.failures {
            code = match (code, failure.code) {
                (_, ErrorCode::NonRetryable) | (ErrorCode::NonRetryable, _) => {
                    ErrorCode::NonRetryable
                }
                (_, ErrorCode::ValidationFail) | (ErrorCode::ValidationFail, _) => {
                    ErrorCode::ValidationFail
                }
                (_, ErrorCode::Retryable) | (ErrorCode::Retryable, _) => ErrorCode::Retryable,
                _ => ErrorCode::Unknown,
            };
        }
        code
    }
}

impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<String> = self
            .failures
            .iter()
            .map(|e| format!("{} ({}): {}", e.step, e.code, e.message))
            .collect();
        write!(
            f,
            "Parallel group '{}' failed after {} rounds; still failing: [{}]",
            self.group,
            self.rounds,
            members.join("; ")
        )
    }
}

/// The main error type for contentflow operations.
#[derive(Debug, Error)]
pub enum ContentflowError {
    /// A step failed terminally.
    #[error("{0}")]
    Step(#[from] StepError),

    /// A parallel group exhausted its round budget.
    #[error("{0}")]
    Group(#[from] GroupError),

    /// The durable-execution substrate refused to accept the run.
    #[error("Substrate rejected run: {0}")]
    SubstrateRejected(String),

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Artifact storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContentflowError {
    /// Classified error code for recommendation purposes.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Step(e) => e.code,
            Self::Group(e) => e.dominant_code(),
            Self::SubstrateRejected(_) | Self::Internal(_) => ErrorCode::NonRetryable,
            Self::Storage(_) | Self::Io(_) => ErrorCode::Retryable,
            Self::Serialization(_) => ErrorCode::ValidationFail,
            Self::Cancelled(_) => ErrorCode::Unknown,
        }
    }
}
