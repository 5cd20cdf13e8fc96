use chrono::{DateTime, Utc};
use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;

/// Conditional `pending -> processing` transition. Exactly one of several
/// concurrent callers sees `true`.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = %job_id))]
pub async fn claim_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: Uuid,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'processing',
                    locked_by = $2::text,
                    locked_at = $3::timestamptz
                where id = $1::uuid and status = 'pending'
        "#
    );

    let result = query(&sql)
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}
