use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Number of attempts a job gets when nothing else is configured.
pub const DEFAULT_MAX_ATTEMPTS: i16 = 3;

/// The kind of reflection a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Daily,
    Weekly,
    Monthly,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 3] = [
        AnalysisType::Daily,
        AnalysisType::Weekly,
        AnalysisType::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Daily => "daily",
            AnalysisType::Weekly => "weekly",
            AnalysisType::Monthly => "monthly",
        }
    }

    /// Last calendar day covered by a period starting at `start`.
    pub fn period_end(&self, start: NaiveDate) -> NaiveDate {
        match self {
            AnalysisType::Daily => start,
            AnalysisType::Weekly => start + Duration::days(6),
            AnalysisType::Monthly => {
                let first = start.with_day(1).unwrap_or(start);
                first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(start)
            }
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = JobDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(AnalysisType::Daily),
            "weekly" => Ok(AnalysisType::Weekly),
            "monthly" => Ok(AnalysisType::Monthly),
            other => Err(JobDecodeError::UnknownAnalysisType(other.to_string())),
        }
    }
}

/// Lifecycle state of a job.
///
/// `Processing` only lives for the duration of one consumer invocation; it
/// makes a claim visible to overlapping pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Active jobs own their period key: no second job may be queued for it.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobDecodeError::UnknownStatus(other.to_string())),
        }
    }
}

/// Errors raised while turning a stored row into a [`Job`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobDecodeError {
    #[error("Unknown analysis type '{0}'")]
    UnknownAnalysisType(String),
    #[error("Unknown job status '{0}'")]
    UnknownStatus(String),
}

/// Identifies one unit of work: a user, an analysis type and the first day
/// of the period it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeriodKey {
    pub user_id: Uuid,
    pub analysis_type: AnalysisType,
    pub period_start: NaiveDate,
}

impl PeriodKey {
    pub fn new(user_id: Uuid, analysis_type: AnalysisType, period_start: NaiveDate) -> Self {
        Self {
            user_id,
            analysis_type,
            period_start,
        }
    }

    pub fn period_end(&self) -> NaiveDate {
        self.analysis_type.period_end(self.period_start)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.user_id, self.analysis_type, self.period_start
        )
    }
}

/// Exponential retry delay applied after the `attempts`-th failure:
/// 2, 4, 8, ... minutes.
pub fn retry_delay(attempts: i16) -> Duration {
    let exponent = attempts.clamp(0, 20) as u32;
    Duration::minutes(2_i64.pow(exponent))
}

/// `DbJob` mirrors a row of the `analysis_queue` table.
///
/// Enumerations are kept as text here; [`Job::try_from`] parses them.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DbJob {
    id: Uuid,
    user_id: Uuid,
    analysis_type: String,
    target_date: NaiveDate,
    week_start: Option<NaiveDate>,
    month_start: Option<NaiveDate>,
    entry_id: Option<Uuid>,
    status: String,
    attempts: i16,
    max_attempts: i16,
    next_retry_at: DateTime<Utc>,
    error_message: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// One unit of scheduled analysis work for a user over a calendar period.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Builder, Serialize)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    #[builder(default = "Uuid::now_v7()")]
    id: Uuid,
    #[builder(default)]
    user_id: Uuid,
    #[builder(default = "AnalysisType::Daily")]
    analysis_type: AnalysisType,
    /// Day the job covers; the period start for weekly and monthly jobs
    #[builder(default = "Utc::now().date_naive()")]
    target_date: NaiveDate,
    #[builder(default, setter(strip_option))]
    week_start: Option<NaiveDate>,
    #[builder(default, setter(strip_option))]
    month_start: Option<NaiveDate>,
    /// Only set for daily jobs
    #[builder(default, setter(strip_option))]
    entry_id: Option<Uuid>,
    #[builder(default = "JobStatus::Pending")]
    status: JobStatus,
    #[builder(default)]
    attempts: i16,
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: i16,
    /// The job must not be dispatched before this instant
    #[builder(default = "Utc::now()")]
    next_retry_at: DateTime<Utc>,
    /// Last failure reason, or the skip reason of a completed job
    #[builder(default, setter(strip_option))]
    error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    processed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    locked_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option, into))]
    locked_by: Option<String>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbJob> for Job {
    type Error = JobDecodeError;

    fn try_from(db_job: DbJob) -> Result<Self, Self::Error> {
        Ok(Job {
            id: db_job.id,
            user_id: db_job.user_id,
            analysis_type: db_job.analysis_type.parse()?,
            target_date: db_job.target_date,
            week_start: db_job.week_start,
            month_start: db_job.month_start,
            entry_id: db_job.entry_id,
            status: db_job.status.parse()?,
            attempts: db_job.attempts,
            max_attempts: db_job.max_attempts,
            next_retry_at: db_job.next_retry_at,
            error_message: db_job.error_message,
            processed_at: db_job.processed_at,
            locked_at: db_job.locked_at,
            locked_by: db_job.locked_by,
            created_at: db_job.created_at,
            updated_at: db_job.updated_at,
        })
    }
}

/// What happens to a job after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to pending, not before `next_retry_at`
    Retry {
        attempts: i16,
        next_retry_at: DateTime<Utc>,
    },
    /// Attempts exhausted; the job is terminally failed
    Fail { attempts: i16 },
}

impl Job {
    /// Creates a new builder for constructing a `Job`.
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// First day of the period this job covers, or `None` when the field
    /// required by its analysis type is missing.
    pub fn period_start(&self) -> Option<NaiveDate> {
        match self.analysis_type {
            AnalysisType::Daily => Some(self.target_date),
            AnalysisType::Weekly => self.week_start,
            AnalysisType::Monthly => self.month_start,
        }
    }

    pub fn period_key(&self) -> Option<PeriodKey> {
        self.period_start()
            .map(|start| PeriodKey::new(self.user_id, self.analysis_type, start))
    }

    /// A completed job carrying a reason was skipped by its handler.
    pub fn is_skipped(&self) -> bool {
        self.status == JobStatus::Completed && self.error_message.is_some()
    }

    /// Computes the transition for a transient failure observed at `now`.
    pub fn on_transient_failure(&self, now: DateTime<Utc>) -> FailureTransition {
        let attempts = self.attempts.saturating_add(1);
        if attempts >= self.max_attempts {
            FailureTransition::Fail { attempts }
        } else {
            FailureTransition::Retry {
                attempts,
                next_retry_at: now + retry_delay(attempts),
            }
        }
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

/// A job about to be inserted by the producer.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize)]
#[getset(get = "pub")]
pub struct NewJob {
    key: PeriodKey,
    entry_id: Option<Uuid>,
    max_attempts: i16,
    next_retry_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(
        key: PeriodKey,
        entry_id: Option<Uuid>,
        max_attempts: i16,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            entry_id,
            max_attempts,
            next_retry_at,
        }
    }

    pub fn target_date(&self) -> NaiveDate {
        self.key.period_start
    }

    pub fn week_start(&self) -> Option<NaiveDate> {
        (self.key.analysis_type == AnalysisType::Weekly).then_some(self.key.period_start)
    }

    pub fn month_start(&self) -> Option<NaiveDate> {
        (self.key.analysis_type == AnalysisType::Monthly).then_some(self.key.period_start)
    }

    /// Materializes the pending job this insert creates.
    pub fn into_job(self, id: Uuid, now: DateTime<Utc>) -> Job {
        Job {
            id,
            user_id: self.key.user_id,
            analysis_type: self.key.analysis_type,
            target_date: self.target_date(),
            week_start: self.week_start(),
            month_start: self.month_start(),
            entry_id: self.entry_id,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts,
            next_retry_at: self.next_retry_at,
            error_message: None,
            processed_at: None,
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_end() {
        assert_eq!(AnalysisType::Daily.period_end(date(2025, 3, 9)), date(2025, 3, 9));
        assert_eq!(AnalysisType::Weekly.period_end(date(2025, 3, 3)), date(2025, 3, 9));
        assert_eq!(AnalysisType::Monthly.period_end(date(2024, 2, 1)), date(2024, 2, 29));
        assert_eq!(AnalysisType::Monthly.period_end(date(2025, 12, 1)), date(2025, 12, 31));
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(1), Duration::minutes(2));
        assert_eq!(retry_delay(2), Duration::minutes(4));
        assert_eq!(retry_delay(3), Duration::minutes(8));
    }

    #[test]
    fn test_transient_failure_transitions() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let job = Job::builder().attempts(0).max_attempts(3).build();
        assert_eq!(
            job.on_transient_failure(now),
            FailureTransition::Retry {
                attempts: 1,
                next_retry_at: now + Duration::minutes(2),
            }
        );

        let job = Job::builder().attempts(1).max_attempts(3).build();
        assert_eq!(
            job.on_transient_failure(now),
            FailureTransition::Retry {
                attempts: 2,
                next_retry_at: now + Duration::minutes(4),
            }
        );

        let job = Job::builder().attempts(2).max_attempts(3).build();
        assert_eq!(
            job.on_transient_failure(now),
            FailureTransition::Fail { attempts: 3 }
        );
    }

    #[test]
    fn test_period_key_requires_type_specific_field() {
        let user_id = Uuid::now_v7();
        let weekly = Job::builder()
            .user_id(user_id)
            .analysis_type(AnalysisType::Weekly)
            .target_date(date(2025, 3, 3))
            .build();
        assert_eq!(weekly.period_key(), None);

        let weekly = Job::builder()
            .user_id(user_id)
            .analysis_type(AnalysisType::Weekly)
            .target_date(date(2025, 3, 3))
            .week_start(date(2025, 3, 3))
            .build();
        assert_eq!(
            weekly.period_key(),
            Some(PeriodKey::new(user_id, AnalysisType::Weekly, date(2025, 3, 3)))
        );
    }

    #[test]
    fn test_try_from_db_job() {
        let now = Utc::now();
        let db_job = DbJob {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            analysis_type: "monthly".to_string(),
            target_date: date(2025, 2, 1),
            week_start: None,
            month_start: Some(date(2025, 2, 1)),
            entry_id: None,
            status: "pending".to_string(),
            attempts: 1,
            max_attempts: 3,
            next_retry_at: now,
            error_message: Some("timeout".to_string()),
            processed_at: None,
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        };
        let job = Job::try_from(db_job.clone()).unwrap();
        assert_eq!(job.analysis_type, AnalysisType::Monthly);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.month_start, Some(date(2025, 2, 1)));
        assert_eq!(job.error_message.as_deref(), Some("timeout"));

        let broken = DbJob {
            status: "archived".to_string(),
            ..db_job
        };
        assert_eq!(
            Job::try_from(broken),
            Err(JobDecodeError::UnknownStatus("archived".to_string()))
        );
    }

    #[test]
    fn test_new_job_sets_type_specific_columns() {
        let key = PeriodKey::new(Uuid::now_v7(), AnalysisType::Monthly, date(2025, 2, 1));
        let now = Utc::now();
        let job = NewJob::new(key, None, 3, now).into_job(Uuid::now_v7(), now);
        assert_eq!(job.target_date, date(2025, 2, 1));
        assert_eq!(job.month_start, Some(date(2025, 2, 1)));
        assert_eq!(job.week_start, None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
    }
}
