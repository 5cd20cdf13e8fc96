use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reflection_worker_job::{Job, NewJob, PeriodKey};
use reflection_worker_timezone::{TimezoneLookupError, TimezoneSource};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::Result;
use crate::sql::{
    claim_job::claim_job,
    eligibility::{has_successful_result, is_entry_complete, list_entries},
    get_due_jobs::get_due_jobs,
    insert_job::{has_active_job, insert_job},
    release_job::{complete_job, fail_job, retry_job, skip_job},
    release_stale_claims::release_stale_claims,
    timezone::get_date_in_timezone,
    users::{list_users_with_timezone, timezones_for},
};
use crate::store::{EligibilitySource, Entry, JobStore, UserDirectory, UserTimezone};

/// [`JobStore`] over `{schema}.analysis_queue`.
#[derive(Clone)]
pub struct PgJobStore {
    pg_pool: PgPool,
    escaped_schema: String,
}

impl PgJobStore {
    pub fn new(pg_pool: PgPool, escaped_schema: String) -> Self {
        Self {
            pg_pool,
            escaped_schema,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: NewJob) -> Result<Option<Job>> {
        insert_job(&self.pg_pool, &self.escaped_schema, &job).await
    }

    async fn has_active_job(&self, key: &PeriodKey) -> Result<bool> {
        has_active_job(&self.pg_pool, &self.escaped_schema, key).await
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        get_due_jobs(&self.pg_pool, &self.escaped_schema, now, limit).await
    }

    async fn claim_job(&self, job_id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        claim_job(&self.pg_pool, &self.escaped_schema, job_id, worker_id, now).await
    }

    async fn complete_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        complete_job(&self.pg_pool, &self.escaped_schema, job_id, now).await
    }

    async fn skip_job(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        skip_job(&self.pg_pool, &self.escaped_schema, job_id, reason, now).await
    }

    async fn retry_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        next_retry_at: DateTime<Utc>,
        message: &str,
    ) -> Result<bool> {
        retry_job(
            &self.pg_pool,
            &self.escaped_schema,
            job_id,
            attempts,
            next_retry_at,
            message,
        )
        .await
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        fail_job(
            &self.pg_pool,
            &self.escaped_schema,
            job_id,
            attempts,
            message,
            now,
        )
        .await
    }

    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64> {
        release_stale_claims(&self.pg_pool, &self.escaped_schema, locked_before).await
    }
}

/// Reads the application tables (`users`, `entries` and the insight
/// tables), which live on the connection's search path.
#[derive(Clone)]
pub struct PgEligibilitySource {
    pg_pool: PgPool,
}

impl PgEligibilitySource {
    pub fn new(pg_pool: PgPool) -> Self {
        Self { pg_pool }
    }
}

#[async_trait]
impl EligibilitySource for PgEligibilitySource {
    async fn has_successful_result(&self, key: &PeriodKey) -> Result<bool> {
        has_successful_result(&self.pg_pool, key).await
    }

    async fn is_entry_complete(&self, entry_id: Uuid) -> Result<bool> {
        is_entry_complete(&self.pg_pool, entry_id).await
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Entry>> {
        list_entries(&self.pg_pool, user_id, from, to).await
    }
}

#[async_trait]
impl UserDirectory for PgEligibilitySource {
    async fn list_users_with_timezone(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<UserTimezone>> {
        list_users_with_timezone(&self.pg_pool, after, limit).await
    }

    async fn timezones_for(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        timezones_for(&self.pg_pool, user_ids).await
    }
}

/// Asks the database for calendar dates so that every component agrees
/// with the SQL side on "today".
#[derive(Clone)]
pub struct PgTimezoneSource {
    pg_pool: PgPool,
}

impl PgTimezoneSource {
    pub fn new(pg_pool: PgPool) -> Self {
        Self { pg_pool }
    }
}

#[async_trait]
impl TimezoneSource for PgTimezoneSource {
    async fn date_in_timezone(
        &self,
        timezone: &str,
        offset_days: i64,
    ) -> std::result::Result<NaiveDate, TimezoneLookupError> {
        match get_date_in_timezone(&self.pg_pool, timezone, offset_days).await {
            Ok(Some(date)) => Ok(date),
            Ok(None) => Err(TimezoneLookupError::Empty(timezone.to_string())),
            Err(e) => Err(TimezoneLookupError::Unavailable(e.to_string())),
        }
    }
}
