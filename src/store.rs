use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reflection_worker_job::{Job, NewJob, PeriodKey};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::Result;

/// A diary entry as seen by the eligibility rules.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: Uuid,
    pub entry_date: NaiveDate,
    pub text: Option<String>,
}

impl Entry {
    /// Character count of the entry text, 0 when absent.
    pub fn text_len(&self) -> usize {
        self.text.as_deref().map_or(0, |t| t.chars().count())
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct UserTimezone {
    pub user_id: Uuid,
    pub timezone: String,
}

/// Read-only view of the application tables consulted before enqueueing.
#[async_trait]
pub trait EligibilitySource: Send + Sync {
    /// Whether a successful analysis already exists for the period.
    async fn has_successful_result(&self, key: &PeriodKey) -> Result<bool>;

    async fn is_entry_complete(&self, entry_id: Uuid) -> Result<bool>;

    /// Entries of `user_id` dated in `[from, to]`, oldest first.
    async fn list_entries(&self, user_id: Uuid, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<Entry>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// One keyset page of users that have a timezone, ordered by id and
    /// starting strictly after `after`.
    async fn list_users_with_timezone(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<UserTimezone>>;

    /// Timezones of the given users. Users without one are absent.
    async fn timezones_for(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;
}

/// Persistence of the analysis queue.
///
/// Every release operation only applies to a job currently in
/// `processing`, and reports whether it did.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a pending job. Returns `None` when an active job already
    /// covers the same period key.
    async fn insert_job(&self, job: NewJob) -> Result<Option<Job>>;

    async fn has_active_job(&self, key: &PeriodKey) -> Result<bool>;

    /// Pending jobs with `next_retry_at <= now`, oldest first.
    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// Moves a job from `pending` to `processing`. Returns `false` when the
    /// job was no longer pending.
    async fn claim_job(&self, job_id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn complete_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Completes a job without a result, keeping `reason`.
    async fn skip_job(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Returns a job to `pending` after a transient failure.
    async fn retry_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        next_retry_at: DateTime<Utc>,
        message: &str,
    ) -> Result<bool>;

    async fn fail_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns jobs stuck in `processing` since before `locked_before` to
    /// `pending`. Returns how many were released.
    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64>;
}
