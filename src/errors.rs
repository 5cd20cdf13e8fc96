use reflection_worker_job::JobDecodeError;
use thiserror::Error;

/// Errors raised by the queue and eligibility stores.
#[derive(Error, Debug)]
pub enum ReflectionWorkerError {
    /// A queue or eligibility query failed
    #[error("Database query failed: {0}")]
    SqlError(#[from] sqlx::Error),

    /// A queue row holds a value outside the known enums
    #[error("Invalid queue row: {0}")]
    DecodeError(#[from] JobDecodeError),

    /// The backing store refused the operation for a reason other than SQL
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = core::result::Result<T, ReflectionWorkerError>;
