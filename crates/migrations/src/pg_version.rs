use sqlx::{query_scalar, PgExecutor};

use crate::MigrateError;

/// Oldest `server_version_num` the queue table can be created on. Partial
/// unique indexes with `on conflict ... where` inference need 12.
pub const MIN_SERVER_VERSION: u32 = 120000;

/// Asks the connected server for its version and rejects anything older
/// than [`MIN_SERVER_VERSION`].
pub async fn server_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let raw: String = query_scalar("show server_version_num")
        .fetch_one(executor)
        .await?;
    parse_server_version(&raw)
}

pub fn parse_server_version(raw: &str) -> Result<u32, MigrateError> {
    match raw.trim().parse::<u32>()? {
        version if version < MIN_SERVER_VERSION => Err(MigrateError::IncompatibleVersion(version)),
        version => Ok(version),
    }
}
