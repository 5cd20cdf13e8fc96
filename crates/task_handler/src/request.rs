use chrono::NaiveDate;
use reflection_worker_job::{AnalysisType, Job};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// The minimal set of identifiers a handler needs for one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnalysisRequest {
    Daily { entry_id: Uuid, user_id: Uuid },
    Weekly { user_id: Uuid, week_start: NaiveDate },
    Monthly { user_id: Uuid, month_start: NaiveDate },
}

/// A job lacks an identifier its analysis type requires.
///
/// This is a data-integrity bug: retrying cannot fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Missing {field} for {analysis_type} analysis")]
pub struct ContractViolation {
    pub analysis_type: AnalysisType,
    pub field: &'static str,
}

impl AnalysisRequest {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            AnalysisRequest::Daily { .. } => AnalysisType::Daily,
            AnalysisRequest::Weekly { .. } => AnalysisType::Weekly,
            AnalysisRequest::Monthly { .. } => AnalysisType::Monthly,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AnalysisRequest::Daily { user_id, .. }
            | AnalysisRequest::Weekly { user_id, .. }
            | AnalysisRequest::Monthly { user_id, .. } => *user_id,
        }
    }
}

impl TryFrom<&Job> for AnalysisRequest {
    type Error = ContractViolation;

    fn try_from(job: &Job) -> Result<Self, Self::Error> {
        let analysis_type = *job.analysis_type();
        let missing = |field| ContractViolation {
            analysis_type,
            field,
        };

        if job.user_id().is_nil() {
            return Err(missing("user_id"));
        }
        let user_id = *job.user_id();

        match analysis_type {
            AnalysisType::Daily => Ok(AnalysisRequest::Daily {
                entry_id: job.entry_id().ok_or_else(|| missing("entry_id"))?,
                user_id,
            }),
            AnalysisType::Weekly => Ok(AnalysisRequest::Weekly {
                user_id,
                week_start: job.week_start().ok_or_else(|| missing("week_start"))?,
            }),
            AnalysisType::Monthly => Ok(AnalysisRequest::Monthly {
                user_id,
                month_start: job.month_start().ok_or_else(|| missing("month_start"))?,
            }),
        }
    }
}
