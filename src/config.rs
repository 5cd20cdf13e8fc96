use std::time::Duration;

use chrono::TimeDelta;
use derive_builder::{Builder, UninitializedFieldError};
use getset::CopyGetters;
use reflection_worker_job::DEFAULT_MAX_ATTEMPTS;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value `{0}`")]
    UninitializedField(&'static str),
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Invalid analysis functions url `{0}`")]
    InvalidFunctionsUrl(String),
    #[error("Missing analysis service key")]
    MissingServiceKey,
}

impl From<UninitializedFieldError> for ConfigError {
    fn from(e: UninitializedFieldError) -> Self {
        ConfigError::UninitializedField(e.field_name())
    }
}

/// Every tunable of the producer and the consumer. Built once, then shared
/// read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters, Builder)]
#[getset(get_copy = "pub")]
#[builder(build_fn(validate = "Self::validate", error = "ConfigError"))]
pub struct WorkerConfig {
    /// Maximum number of due jobs fetched per consumer invocation
    #[builder(default = "50")]
    batch_size: i64,
    /// Retry ceiling stamped on new jobs
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: i16,
    /// Minimum text length for a daily analysis
    #[builder(default = "50")]
    daily_min_chars: usize,
    /// How far back catch-up looks for unanalyzed entries, in days
    #[builder(default = "30")]
    catch_up_days: i64,
    /// Entries a week needs before it is analyzed; every entry row counts
    #[builder(default = "3")]
    weekly_min_entries: usize,
    #[builder(default = "10")]
    monthly_min_entries: usize,
    /// Users fetched per page while populating
    #[builder(default = "500")]
    user_page_size: i64,
    /// Users evaluated at the same time while populating
    #[builder(default = "8")]
    producer_concurrency: usize,
    /// Jobs dispatched at the same time while processing
    #[builder(default = "1")]
    consumer_concurrency: usize,
    /// Wall-clock limit of one consumer invocation
    #[builder(default = "Duration::from_secs(50)")]
    invocation_deadline: Duration,
    /// Age after which a `processing` claim is considered abandoned
    #[builder(default = "TimeDelta::minutes(15)")]
    stale_claim_after: TimeDelta,
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            batch_size: 50,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            daily_min_chars: 50,
            catch_up_days: 30,
            weekly_min_entries: 3,
            monthly_min_entries: 10,
            user_page_size: 500,
            producer_concurrency: 8,
            consumer_concurrency: 1,
            invocation_deadline: Duration::from_secs(50),
            stale_claim_after: TimeDelta::minutes(15),
        }
    }
}

impl WorkerConfigBuilder {
    fn validate(&self) -> Result<(), ConfigError> {
        fn at_least<T: PartialOrd + std::fmt::Display>(
            field: &'static str,
            value: Option<T>,
            min: T,
        ) -> Result<(), ConfigError> {
            match value {
                Some(value) if value < min => Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be at least {min}, got {value}"),
                }),
                _ => Ok(()),
            }
        }

        at_least("batch_size", self.batch_size, 1)?;
        at_least("max_attempts", self.max_attempts, 1)?;
        at_least("catch_up_days", self.catch_up_days, 0)?;
        at_least("user_page_size", self.user_page_size, 1)?;
        at_least("producer_concurrency", self.producer_concurrency, 1)?;
        at_least("consumer_concurrency", self.consumer_concurrency, 1)?;

        if self.invocation_deadline == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "invocation_deadline",
                reason: "must be positive".into(),
            });
        }
        if matches!(self.stale_claim_after, Some(d) if d <= TimeDelta::zero()) {
            return Err(ConfigError::InvalidValue {
                field: "stale_claim_after",
                reason: "must be positive".into(),
            });
        }

        Ok(())
    }
}
