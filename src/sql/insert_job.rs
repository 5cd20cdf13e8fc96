use indoc::formatdoc;
use reflection_worker_job::{DbJob, Job, NewJob, PeriodKey};
use sqlx::{query_as, query_scalar, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;

/// Inserts a pending job, doing nothing when the active-period index
/// already holds a job for the same key.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", period = %job.key()))]
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job: &NewJob,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.analysis_queue (
                id,
                user_id,
                analysis_type,
                target_date,
                week_start,
                month_start,
                entry_id,
                status,
                attempts,
                max_attempts,
                next_retry_at
            )
            values ($1::uuid, $2::uuid, $3::text, $4::date, $5::date, $6::date, $7::uuid, 'pending', 0, $8::smallint, $9::timestamptz)
            on conflict (user_id, analysis_type, target_date)
                where status in ('pending', 'processing')
                do nothing
            returning *
        "#
    );

    let key = job.key();
    let inserted: Option<DbJob> = query_as(&sql)
        .bind(Uuid::now_v7())
        .bind(key.user_id)
        .bind(key.analysis_type.as_str())
        .bind(job.target_date())
        .bind(job.week_start())
        .bind(job.month_start())
        .bind(job.entry_id())
        .bind(job.max_attempts())
        .bind(job.next_retry_at())
        .fetch_optional(executor)
        .await?;

    Ok(inserted.map(Job::try_from).transpose()?)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", period = %key))]
pub async fn has_active_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    key: &PeriodKey,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            select exists (
                select 1 from {escaped_schema}.analysis_queue
                    where user_id = $1::uuid
                    and analysis_type = $2::text
                    and target_date = $3::date
                    and status in ('pending', 'processing')
            )
        "#
    );

    let exists = query_scalar(&sql)
        .bind(key.user_id)
        .bind(key.analysis_type.as_str())
        .bind(key.period_start)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}
