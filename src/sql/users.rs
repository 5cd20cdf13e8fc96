use std::collections::HashMap;

use indoc::indoc;
use sqlx::{query_as, PgExecutor};
use uuid::Uuid;

use crate::errors::Result;
use crate::store::UserTimezone;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn list_users_with_timezone<'e>(
    executor: impl PgExecutor<'e>,
    after: Option<Uuid>,
    limit: i64,
) -> Result<Vec<UserTimezone>> {
    let sql = indoc! {r#"
        select id as user_id, timezone
            from users
            where timezone is not null
            and ($1::uuid is null or id > $1::uuid)
            order by id asc
            limit $2::bigint
    "#};

    let users = query_as(sql)
        .bind(after)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    Ok(users)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", users = user_ids.len()))]
pub async fn timezones_for<'e>(
    executor: impl PgExecutor<'e>,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, String>> {
    let sql = indoc! {r#"
        select id as user_id, timezone
            from users
            where id = any($1::uuid[])
            and timezone is not null
    "#};

    let rows: Vec<UserTimezone> = query_as(sql).bind(user_ids).fetch_all(executor).await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.user_id, row.timezone))
        .collect())
}
