//! Scheduling and delivery of diary reflections.
//!
//! [`QueueProducer`] enqueues daily, weekly and monthly analysis jobs once
//! per period in each user's own calendar. [`QueueConsumer`] claims due
//! jobs, hands them to an [`AnalysisHandler`] and retries transient
//! failures with exponential backoff until `max_attempts`.

pub mod builder;
pub mod config;
pub mod consumer;
pub mod eligibility;
pub mod errors;
pub mod http;
pub mod pg;
pub mod producer;
mod sql;
pub mod store;
mod utils;
pub mod worker;

pub use crate::builder::{WorkerBuildError, WorkerOptions};
pub use crate::config::{ConfigError, WorkerConfig, WorkerConfigBuilder};
pub use crate::consumer::{
    JobReport, JobResolution, ProcessQueueError, ProcessSummary, QueueConsumer, ReleaseJobError,
};
pub use crate::eligibility::{Candidate, EligibilityScanner};
pub use crate::errors::{ReflectionWorkerError, Result};
pub use crate::http::HttpAnalysisHandler;
pub use crate::pg::{PgEligibilitySource, PgJobStore, PgTimezoneSource};
pub use crate::producer::{PopulateQueueError, PopulateSummary, QueueProducer};
pub use crate::store::{EligibilitySource, Entry, JobStore, UserDirectory, UserTimezone};
pub use crate::worker::Worker;

pub use reflection_worker_job::{
    AnalysisType, DbJob, FailureTransition, Job, JobBuilder, JobStatus, NewJob, PeriodKey,
};
pub use reflection_worker_migrations::MigrateError;
pub use reflection_worker_task_handler::{
    handler_fn, AnalysisHandler, AnalysisHandlers, AnalysisOutcome, AnalysisRequest,
    ContractViolation, HandlerError, SkipReason,
};
pub use reflection_worker_timezone::{
    mock, Clock, SystemClock, TimezoneLookupError, TimezoneResolver, TimezoneSource,
};
