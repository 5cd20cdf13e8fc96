use chrono::{DateTime, Utc};
use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = %job_id))]
pub async fn complete_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'completed',
                    processed_at = $2::timestamptz,
                    error_message = null,
                    locked_by = null,
                    locked_at = null
                where id = $1::uuid and status = 'processing'
        "#
    );

    let result = query(&sql).bind(job_id).bind(now).execute(executor).await?;

    Ok(result.rows_affected() == 1)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = %job_id))]
pub async fn skip_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'completed',
                    processed_at = $3::timestamptz,
                    error_message = $2::text,
                    locked_by = null,
                    locked_at = null
                where id = $1::uuid and status = 'processing'
        "#
    );

    let result = query(&sql)
        .bind(job_id)
        .bind(reason)
        .bind(now)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = %job_id))]
pub async fn retry_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: Uuid,
    attempts: i16,
    next_retry_at: DateTime<Utc>,
    message: &str,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'pending',
                    attempts = $2::smallint,
                    next_retry_at = $3::timestamptz,
                    error_message = $4::text,
                    locked_by = null,
                    locked_at = null
                where id = $1::uuid and status = 'processing' and attempts < $2::smallint
        "#
    );

    let result = query(&sql)
        .bind(job_id)
        .bind(attempts)
        .bind(next_retry_at)
        .bind(message)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = %job_id))]
pub async fn fail_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: Uuid,
    attempts: i16,
    message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'failed',
                    attempts = least($2::smallint, max_attempts),
                    error_message = $3::text,
                    processed_at = $4::timestamptz,
                    locked_by = null,
                    locked_at = null
                where id = $1::uuid and status = 'processing'
        "#
    );

    let result = query(&sql)
        .bind(job_id)
        .bind(attempts)
        .bind(message)
        .bind(now)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}
