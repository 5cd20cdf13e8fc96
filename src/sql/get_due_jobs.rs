use chrono::{DateTime, Utc};
use indoc::formatdoc;
use reflection_worker_job::{DbJob, Job};
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn get_due_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.analysis_queue
                where status = 'pending'
                and next_retry_at <= $1::timestamptz
                order by next_retry_at asc, id asc
                limit $2::bigint
        "#
    );

    let rows: Vec<DbJob> = query_as(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    Ok(rows
        .into_iter()
        .map(Job::try_from)
        .collect::<std::result::Result<_, _>>()?)
}
