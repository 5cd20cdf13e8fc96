use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a handler declined to analyze a period. None of these resolve by
/// retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EntryIncomplete,
    AlreadyExists,
    TextTooShort,
    NotEnoughEntries,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::EntryIncomplete => "Entry incomplete",
            SkipReason::AlreadyExists => "Analysis already exists",
            SkipReason::TextTooShort => "Entry text too short",
            SkipReason::NotEnoughEntries => "Not enough entries",
        })
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The analysis was produced; carries the handler's payload
    Success(serde_json::Value),
    /// The precondition will never hold; the job is done without a result
    ValidationFailure(String),
    /// Might succeed on a later attempt
    TransientFailure(String),
}

impl AnalysisOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        AnalysisOutcome::ValidationFailure(reason.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }
}

/// The handler could not be invoked or did not answer.
///
/// Always treated as a transient failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler could not be reached: {0}")]
    Unreachable(String),
    #[error("Handler returned an unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Handler panicked")]
    Panic,
    #[error("Handler did not answer within {0:?}")]
    Timeout(Duration),
}
