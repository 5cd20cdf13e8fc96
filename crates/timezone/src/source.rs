use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// Errors returned by an authoritative timezone lookup.
///
/// The resolver never surfaces these; they only trigger the local fallback.
#[derive(Error, Debug)]
pub enum TimezoneLookupError {
    #[error("Timezone lookup is unavailable: {0}")]
    Unavailable(String),
    #[error("Timezone lookup returned no date for '{0}'")]
    Empty(String),
}

/// An authoritative "date in timezone" lookup, typically the database.
#[async_trait]
pub trait TimezoneSource: Send + Sync {
    /// Calendar date current in `timezone`, shifted by `offset_days`.
    async fn date_in_timezone(
        &self,
        timezone: &str,
        offset_days: i64,
    ) -> Result<NaiveDate, TimezoneLookupError>;
}
