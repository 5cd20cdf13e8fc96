use chrono::NaiveDate;
use indoc::indoc;
use reflection_worker_job::{AnalysisType, PeriodKey};
use sqlx::{query_as, query_scalar, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;
use crate::store::Entry;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", period = %key))]
pub async fn has_successful_result<'e>(
    executor: impl PgExecutor<'e>,
    key: &PeriodKey,
) -> Result<bool> {
    let sql = match key.analysis_type {
        AnalysisType::Daily => indoc! {r#"
            select exists (
                select 1 from entry_insights
                    join entries on entries.id = entry_insights.entry_id
                    where entries.user_id = $1::uuid
                    and entries.entry_date = $2::date
                    and entry_insights.status = 'success'
            )
        "#},
        AnalysisType::Weekly => indoc! {r#"
            select exists (
                select 1 from weekly_insights
                    where user_id = $1::uuid and week_start = $2::date
            )
        "#},
        AnalysisType::Monthly => indoc! {r#"
            select exists (
                select 1 from monthly_insights
                    where user_id = $1::uuid and month_start = $2::date
            )
        "#},
    };

    let exists = query_scalar(sql)
        .bind(key.user_id)
        .bind(key.period_start)
        .fetch_one(executor)
        .await?;

    Ok(exists)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", entry_id = %entry_id))]
pub async fn is_entry_complete<'e>(executor: impl PgExecutor<'e>, entry_id: Uuid) -> Result<bool> {
    let complete: Option<bool> = query_scalar("select check_entry_completion($1::uuid)")
        .bind(entry_id)
        .fetch_one(executor)
        .await?;

    Ok(complete.unwrap_or(false))
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", user_id = %user_id))]
pub async fn list_entries<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Entry>> {
    let sql = indoc! {r#"
        select id, entry_date, diary_text as text
            from entries
            where user_id = $1::uuid
            and entry_date between $2::date and $3::date
            order by entry_date asc, id asc
    "#};

    let entries = query_as(sql)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?;

    Ok(entries)
}
