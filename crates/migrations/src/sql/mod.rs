use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;

/// A named, ordered list of statements applied in one transaction.
pub struct QueueMigration {
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl QueueMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    /// Migration numbers are encoded in the name: `m000002` is number 2.
    pub fn migration_number(&self) -> u32 {
        self.name
            .trim_start_matches('m')
            .parse()
            .unwrap_or_default()
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(":QUEUE_SCHEMA", escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const QUEUE_MIGRATIONS: &[QueueMigration] =
    &[m000001::M000001_MIGRATION, m000002::M000002_MIGRATION];
