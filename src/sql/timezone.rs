use chrono::NaiveDate;
use sqlx::{query_scalar, PgExecutor};

use crate::errors::Result;

/// Calls the database's `get_date_in_timezone` function. `None` when the
/// function returned null.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", timezone = %timezone))]
pub async fn get_date_in_timezone<'e>(
    executor: impl PgExecutor<'e>,
    timezone: &str,
    offset_days: i64,
) -> Result<Option<NaiveDate>> {
    let sql = "select get_date_in_timezone(p_timezone => $1::text, p_offset_days => $2::integer)";
    let date = query_scalar(sql)
        .bind(timezone)
        .bind(offset_days as i32)
        .fetch_one(executor)
        .await?;

    Ok(date)
}
