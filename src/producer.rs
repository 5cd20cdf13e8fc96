use std::sync::Arc;

use chrono::Timelike;
use futures::{stream, StreamExt};
use reflection_worker_job::{AnalysisType, NewJob};
use reflection_worker_timezone::TimezoneResolver;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::eligibility::EligibilityScanner;
use crate::errors::ReflectionWorkerError;
use crate::store::{EligibilitySource, JobStore, UserDirectory, UserTimezone};

#[derive(Error, Debug)]
pub enum PopulateQueueError {
    #[error("Failed to list users: {0}")]
    ListUsers(#[source] ReflectionWorkerError),
}

/// Counters of one populate run.
///
/// `users_processed` counts users evaluated without error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulateSummary {
    pub users_processed: usize,
    pub users_failed: usize,
    pub daily_queued: usize,
    pub weekly_queued: usize,
    pub monthly_queued: usize,
    pub total_queued: usize,
}

impl PopulateSummary {
    fn record_queued(&mut self, analysis_type: AnalysisType) {
        match analysis_type {
            AnalysisType::Daily => self.daily_queued += 1,
            AnalysisType::Weekly => self.weekly_queued += 1,
            AnalysisType::Monthly => self.monthly_queued += 1,
        }
        self.total_queued += 1;
    }

    fn merge(&mut self, user: UserPopulation) {
        for analysis_type in user.queued {
            self.record_queued(analysis_type);
        }
        match user.error {
            None => self.users_processed += 1,
            Some(_) => self.users_failed += 1,
        }
    }
}

/// Jobs queued for one user, and the error that cut the user short.
///
/// Jobs inserted before the error stay queued and are counted.
#[derive(Debug, Default)]
struct UserPopulation {
    queued: Vec<AnalysisType>,
    error: Option<ReflectionWorkerError>,
}

/// Enqueues every due analysis exactly once per period.
#[derive(Clone)]
pub struct QueueProducer {
    store: Arc<dyn JobStore>,
    source: Arc<dyn EligibilitySource>,
    users: Arc<dyn UserDirectory>,
    scanner: EligibilityScanner,
    resolver: TimezoneResolver,
    config: WorkerConfig,
}

impl QueueProducer {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn EligibilitySource>,
        users: Arc<dyn UserDirectory>,
        resolver: TimezoneResolver,
        config: WorkerConfig,
    ) -> Self {
        Self {
            scanner: EligibilityScanner::new(source.clone(), config),
            store,
            source,
            users,
            resolver,
            config,
        }
    }

    /// Walks every user with a timezone, page by page, and enqueues the
    /// jobs they are due for. A failing user is logged and counted; only a
    /// failure to list users aborts the run.
    pub async fn populate(&self) -> Result<PopulateSummary, PopulateQueueError> {
        info!(started_at = %self.resolver.now(), "Populating analysis queue");

        let mut summary = PopulateSummary::default();
        let mut after: Option<Uuid> = None;
        let page_size = self.config.user_page_size();

        loop {
            let page = self
                .users
                .list_users_with_timezone(after, page_size)
                .await
                .map_err(PopulateQueueError::ListUsers)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.user_id);
            let page_len = page.len();

            let results: Vec<_> = stream::iter(page)
                .map(|user| self.populate_user(user))
                .buffer_unordered(self.config.producer_concurrency())
                .collect()
                .await;

            for result in results {
                summary.merge(result);
            }

            if (page_len as i64) < page_size {
                break;
            }
        }

        info!(
            users_processed = summary.users_processed,
            users_failed = summary.users_failed,
            daily_queued = summary.daily_queued,
            weekly_queued = summary.weekly_queued,
            monthly_queued = summary.monthly_queued,
            "Queue population complete"
        );

        Ok(summary)
    }

    #[tracing::instrument(skip_all, fields(user_id = %user.user_id, timezone = %user.timezone))]
    async fn populate_user(&self, user: UserTimezone) -> UserPopulation {
        let mut population = UserPopulation::default();
        if let Err(e) = self.try_populate_user(&user, &mut population.queued).await {
            error!(
                error = %e,
                queued = population.queued.len(),
                "Failed to populate queue for user"
            );
            population.error = Some(e);
        }
        population
    }

    async fn try_populate_user(
        &self,
        user: &UserTimezone,
        queued: &mut Vec<AnalysisType>,
    ) -> Result<(), ReflectionWorkerError> {
        let today = self.resolver.local_date(&user.timezone, 0).await;
        let local_hour = self.resolver.local_now(&user.timezone).hour();
        let next_retry_at = self.resolver.next_local_midnight(today, &user.timezone);

        let candidates = self.scanner.scan(user.user_id, today, local_hour).await?;
        debug!(%today, local_hour, candidates = candidates.len(), "Scanned user");

        for candidate in candidates {
            let key = candidate.key;
            if self.source.has_successful_result(&key).await? {
                debug!(period = %key, "Skipped, analysis already exists");
                continue;
            }
            if self.store.has_active_job(&key).await? {
                debug!(period = %key, "Skipped, already queued");
                continue;
            }

            let job = NewJob::new(
                key,
                candidate.entry_id,
                self.config.max_attempts(),
                next_retry_at,
            );
            match self.store.insert_job(job).await? {
                Some(job) => {
                    info!(
                        job_id = %job.id(),
                        analysis_type = %key.analysis_type,
                        target_date = %key.period_start,
                        next_retry_at = %next_retry_at,
                        "Queued analysis"
                    );
                    queued.push(key.analysis_type);
                }
                None => debug!(period = %key, "Skipped, queued concurrently"),
            }
        }

        Ok(())
    }
}
