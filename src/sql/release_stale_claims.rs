use chrono::{DateTime, Utc};
use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Puts abandoned claims back in the queue without touching `attempts`.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn release_stale_claims<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    locked_before: DateTime<Utc>,
) -> Result<u64> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.analysis_queue
                set
                    status = 'pending',
                    locked_by = null,
                    locked_at = null
                where status = 'processing'
                and (locked_at is null or locked_at < $1::timestamptz)
        "#
    );

    let result = query(&sql).bind(locked_before).execute(executor).await?;

    Ok(result.rows_affected())
}
