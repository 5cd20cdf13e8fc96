use std::sync::Arc;

use getset::Getters;
use reflection_worker_task_handler::AnalysisHandlers;
use reflection_worker_timezone::TimezoneResolver;
use sqlx::PgPool;

use crate::builder::{WorkerBuildError, WorkerOptions};
use crate::config::WorkerConfig;
use crate::consumer::QueueConsumer;
use crate::pg::{PgEligibilitySource, PgJobStore};
use crate::producer::QueueProducer;

/// An initialized deployment: producer and consumer share the pool, the
/// configuration and the timezone resolver.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    pub(crate) worker_id: String,
    pub(crate) pg_pool: PgPool,
    pub(crate) escaped_schema: String,
    pub(crate) config: WorkerConfig,
    pub(crate) handlers: AnalysisHandlers,
    pub(crate) resolver: TimezoneResolver,
}

impl Worker {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    fn job_store(&self) -> Arc<PgJobStore> {
        Arc::new(PgJobStore::new(
            self.pg_pool.clone(),
            self.escaped_schema.clone(),
        ))
    }

    pub fn producer(&self) -> QueueProducer {
        let source = Arc::new(PgEligibilitySource::new(self.pg_pool.clone()));
        QueueProducer::new(
            self.job_store(),
            source.clone(),
            source,
            self.resolver.clone(),
            self.config,
        )
    }

    /// Fails when an analysis type has no handler.
    pub fn consumer(&self) -> Result<QueueConsumer, WorkerBuildError> {
        let missing = self.handlers.missing();
        if !missing.is_empty() {
            return Err(WorkerBuildError::MissingHandlers(missing));
        }

        Ok(QueueConsumer::new(
            self.job_store(),
            Arc::new(PgEligibilitySource::new(self.pg_pool.clone())),
            self.handlers.clone(),
            self.resolver.clone(),
            self.config,
            self.worker_id.clone(),
        ))
    }
}
