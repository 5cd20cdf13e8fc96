use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use reflection_worker_job::{AnalysisType, FailureTransition, Job};
use reflection_worker_task_handler::{
    dispatch, AnalysisHandlers, AnalysisOutcome, AnalysisRequest, HandlerError,
};
use reflection_worker_timezone::TimezoneResolver;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::ReflectionWorkerError;
use crate::store::{JobStore, UserDirectory};

const FALLBACK_TIMEZONE: &str = "UTC";

#[derive(Error, Debug)]
pub enum ProcessQueueError {
    #[error("Failed to fetch due jobs: {0}")]
    FetchDueJobs(#[source] ReflectionWorkerError),
    #[error("Failed to resolve job owners' timezones: {0}")]
    ResolveTimezones(#[source] ReflectionWorkerError),
}

#[derive(Error, Debug)]
pub enum ReleaseJobError {
    #[error("Failed to release job: {0}")]
    Store(#[from] ReflectionWorkerError),
    #[error("Job was no longer processing when releasing it")]
    NotProcessing,
}

/// What happened to one dispatched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResolution {
    Completed,
    Skipped {
        reason: String,
    },
    Retry {
        attempts: i16,
        next_retry_at: DateTime<Utc>,
        error: String,
    },
    Failed {
        attempts: i16,
        error: String,
    },
    /// Another invocation claimed the job first
    ClaimLost,
    /// The claim itself could not be attempted; the job stays pending
    ClaimError {
        error: String,
    },
    /// The invocation ran out of time before claiming the job
    DeadlineReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    #[serde(flatten)]
    pub resolution: JobResolution,
    /// Set when the resolution could not be written back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

/// Counters of one process run.
///
/// `processed` counts jobs that reached `completed`, with or without a
/// result. `deferred` counts due jobs whose period has not ended yet in the
/// owner's calendar, plus jobs left unclaimed at the deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub checked: usize,
    pub deferred: usize,
    pub completed: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
    pub claim_lost: usize,
    pub processed: usize,
    pub released_stale: u64,
    pub results: Vec<JobReport>,
}

impl ProcessSummary {
    fn record(&mut self, report: JobReport) {
        match &report.resolution {
            JobResolution::Completed => {
                self.completed += 1;
                self.processed += 1;
            }
            JobResolution::Skipped { .. } => {
                self.skipped += 1;
                self.processed += 1;
            }
            JobResolution::Retry { .. } => self.retried += 1,
            JobResolution::Failed { .. } => self.failed += 1,
            JobResolution::ClaimLost | JobResolution::ClaimError { .. } => self.claim_lost += 1,
            JobResolution::DeadlineReached => self.deferred += 1,
        }
        self.results.push(report);
    }
}

/// Claims due jobs, dispatches them and drives them to their next state.
#[derive(Clone)]
pub struct QueueConsumer {
    store: Arc<dyn JobStore>,
    users: Arc<dyn UserDirectory>,
    handlers: AnalysisHandlers,
    resolver: TimezoneResolver,
    config: WorkerConfig,
    worker_id: String,
}

impl QueueConsumer {
    pub fn new(
        store: Arc<dyn JobStore>,
        users: Arc<dyn UserDirectory>,
        handlers: AnalysisHandlers,
        resolver: TimezoneResolver,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            users,
            handlers,
            resolver,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs one bounded pass over the due jobs.
    pub async fn process(&self) -> Result<ProcessSummary, ProcessQueueError> {
        let deadline = Instant::now() + self.config.invocation_deadline();
        let now = self.resolver.now();
        info!(worker_id = %self.worker_id, started_at = %now, "Processing analysis queue");

        let mut summary = ProcessSummary {
            released_stale: self.release_stale_claims(now).await,
            ..Default::default()
        };

        let jobs = self
            .store
            .get_due_jobs(now, self.config.batch_size())
            .await
            .map_err(ProcessQueueError::FetchDueJobs)?;
        summary.checked = jobs.len();
        if jobs.is_empty() {
            info!("No pending jobs ready to process");
            return Ok(summary);
        }

        let mut user_ids: Vec<Uuid> = jobs.iter().map(|job| *job.user_id()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let timezones = self
            .users
            .timezones_for(&user_ids)
            .await
            .map_err(ProcessQueueError::ResolveTimezones)?;

        let mut ready = Vec::with_capacity(jobs.len());
        for job in jobs {
            if self.is_period_over(&job, &timezones).await {
                ready.push(job);
            } else {
                summary.deferred += 1;
            }
        }

        if ready.is_empty() {
            info!(
                checked = summary.checked,
                "No jobs to process after timezone filtering"
            );
            return Ok(summary);
        }
        info!(
            ready = ready.len(),
            checked = summary.checked,
            "Found jobs to process"
        );

        let reports: Vec<JobReport> = stream::iter(ready)
            .map(|job| self.process_job(job, deadline))
            .buffered(self.config.consumer_concurrency())
            .collect()
            .await;
        for report in reports {
            summary.record(report);
        }

        info!(
            processed = summary.processed,
            retried = summary.retried,
            failed = summary.failed,
            deferred = summary.deferred,
            claim_lost = summary.claim_lost,
            "Queue processing complete"
        );

        Ok(summary)
    }

    async fn release_stale_claims(&self, now: DateTime<Utc>) -> u64 {
        let locked_before = now - self.config.stale_claim_after();
        match self.store.release_stale_claims(locked_before).await {
            Ok(0) => 0,
            Ok(released) => {
                warn!(released, "Released abandoned job claims");
                released
            }
            Err(e) => {
                warn!(error = %e, "Failed to release abandoned job claims");
                0
            }
        }
    }

    /// A job is dispatched once its whole period lies on or before the
    /// owner's local yesterday.
    async fn is_period_over(&self, job: &Job, timezones: &HashMap<Uuid, String>) -> bool {
        let timezone = timezones
            .get(job.user_id())
            .map(String::as_str)
            .unwrap_or(FALLBACK_TIMEZONE);
        let yesterday = self.resolver.local_date(timezone, -1).await;
        let period_start = job.period_start().unwrap_or(*job.target_date());
        let period_end = job.analysis_type().period_end(period_start);

        if period_end > yesterday {
            debug!(
                job_id = %job.id(),
                %period_end,
                %yesterday,
                timezone,
                "Period not over in user's timezone, deferring"
            );
            return false;
        }
        true
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id(), user_id = %job.user_id(), analysis_type = %job.analysis_type()))]
    async fn process_job(&self, job: Job, deadline: Instant) -> JobReport {
        let resolution = self.claim_and_run(&job, deadline).await;
        let (resolution, release_error) = match resolution {
            Ok(resolution) => (resolution, None),
            Err((resolution, e)) => {
                error!(error = %e, "Failed to release job");
                (resolution, Some(e.to_string()))
            }
        };

        JobReport {
            id: *job.id(),
            user_id: *job.user_id(),
            analysis_type: *job.analysis_type(),
            resolution,
            release_error,
        }
    }

    async fn claim_and_run(
        &self,
        job: &Job,
        deadline: Instant,
    ) -> Result<JobResolution, (JobResolution, ReleaseJobError)> {
        let Some(remaining) = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
        else {
            warn!("Invocation deadline reached, leaving job pending");
            return Ok(JobResolution::DeadlineReached);
        };

        match self
            .store
            .claim_job(*job.id(), &self.worker_id, self.resolver.now())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job claimed by another invocation");
                return Ok(JobResolution::ClaimLost);
            }
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                return Ok(JobResolution::ClaimError {
                    error: e.to_string(),
                });
            }
        }

        let request = match AnalysisRequest::try_from(job) {
            Ok(request) => request,
            Err(violation) => {
                let message = violation.to_string();
                error!(error = %message, "Job is missing required identifiers");
                let attempts = job.attempts().saturating_add(1).min(*job.max_attempts());
                return self.fail(job, attempts, message).await;
            }
        };

        let outcome = self.run_handler(job, request, remaining).await;
        let now = self.resolver.now();
        match outcome {
            AnalysisOutcome::Success(_) => {
                info!("Job completed");
                let released = self.store.complete_job(*job.id(), now).await;
                release(JobResolution::Completed, released)
            }
            AnalysisOutcome::ValidationFailure(reason) => {
                info!(%reason, "Job skipped");
                let released = self.store.skip_job(*job.id(), &reason, now).await;
                release(JobResolution::Skipped { reason }, released)
            }
            AnalysisOutcome::TransientFailure(message) => {
                match job.on_transient_failure(now) {
                    FailureTransition::Retry {
                        attempts,
                        next_retry_at,
                    } => {
                        warn!(error = %message, attempts, %next_retry_at, "Job failed, will retry");
                        let released = self
                            .store
                            .retry_job(*job.id(), attempts, next_retry_at, &message)
                            .await;
                        release(
                            JobResolution::Retry {
                                attempts,
                                next_retry_at,
                                error: message,
                            },
                            released,
                        )
                    }
                    FailureTransition::Fail { attempts } => {
                        error!(error = %message, attempts, "Job failed permanently");
                        self.fail(job, attempts, message).await
                    }
                }
            }
        }
    }

    async fn run_handler(
        &self,
        job: &Job,
        request: AnalysisRequest,
        timeout: Duration,
    ) -> AnalysisOutcome {
        let Some(handler) = self.handlers.get(*job.analysis_type()) else {
            return AnalysisOutcome::TransientFailure(format!(
                "No handler registered for {} analysis",
                job.analysis_type()
            ));
        };

        debug!(handler = handler.identifier(), "Dispatching job");
        let dispatched = dispatch(handler, request, Some(timeout)).await;
        debug!(duration = ?dispatched.duration, "Handler returned");

        match dispatched.result {
            Ok(outcome) => outcome,
            Err(e @ HandlerError::Timeout(_)) => {
                warn!("Handler timed out");
                AnalysisOutcome::TransientFailure(e.to_string())
            }
            Err(e) => AnalysisOutcome::TransientFailure(e.to_string()),
        }
    }

    async fn fail(
        &self,
        job: &Job,
        attempts: i16,
        message: String,
    ) -> Result<JobResolution, (JobResolution, ReleaseJobError)> {
        let released = self
            .store
            .fail_job(*job.id(), attempts, &message, self.resolver.now())
            .await;
        release(
            JobResolution::Failed {
                attempts,
                error: message,
            },
            released,
        )
    }
}

fn release(
    resolution: JobResolution,
    released: Result<bool, ReflectionWorkerError>,
) -> Result<JobResolution, (JobResolution, ReleaseJobError)> {
    match released {
        Ok(true) => Ok(resolution),
        Ok(false) => Err((resolution, ReleaseJobError::NotProcessing)),
        Err(e) => Err((resolution, ReleaseJobError::Store(e))),
    }
}
