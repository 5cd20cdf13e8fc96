#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reflection_worker::mock::MockClock;
use reflection_worker::{
    AnalysisHandler, AnalysisHandlers, AnalysisOutcome, AnalysisRequest, AnalysisType, DbJob,
    EligibilitySource, Entry, HandlerError, Job, JobStatus, JobStore, NewJob, PeriodKey,
    PgJobStore, QueueConsumer, QueueProducer, ReflectionWorkerError, Result, TimezoneResolver,
    UserDirectory, UserTimezone, WorkerConfig,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use tokio::task::LocalSet;
use uuid::Uuid;

pub fn utc(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn long_text() -> String {
    "Walked along the river after work and finally called my sister back.".to_string()
}

/// Mutable twin of [`Job`] kept by [`FakeJobStore`].
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub analysis_type: AnalysisType,
    pub target_date: NaiveDate,
    pub week_start: Option<NaiveDate>,
    pub month_start: Option<NaiveDate>,
    pub entry_id: Option<Uuid>,
    pub status: JobStatus,
    pub attempts: i16,
    pub max_attempts: i16,
    pub next_retry_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
}

impl StoredJob {
    pub fn from_job(job: &Job) -> Self {
        StoredJob {
            id: *job.id(),
            user_id: *job.user_id(),
            analysis_type: *job.analysis_type(),
            target_date: *job.target_date(),
            week_start: *job.week_start(),
            month_start: *job.month_start(),
            entry_id: *job.entry_id(),
            status: *job.status(),
            attempts: *job.attempts(),
            max_attempts: *job.max_attempts(),
            next_retry_at: *job.next_retry_at(),
            error_message: job.error_message().clone(),
            processed_at: *job.processed_at(),
            locked_at: *job.locked_at(),
            locked_by: job.locked_by().clone(),
        }
    }

    pub fn to_job(&self) -> Job {
        let mut builder = Job::builder()
            .id(self.id)
            .user_id(self.user_id)
            .analysis_type(self.analysis_type)
            .target_date(self.target_date)
            .status(self.status)
            .attempts(self.attempts)
            .max_attempts(self.max_attempts)
            .next_retry_at(self.next_retry_at);
        if let Some(week_start) = self.week_start {
            builder = builder.week_start(week_start);
        }
        if let Some(month_start) = self.month_start {
            builder = builder.month_start(month_start);
        }
        if let Some(entry_id) = self.entry_id {
            builder = builder.entry_id(entry_id);
        }
        if let Some(error_message) = &self.error_message {
            builder = builder.error_message(error_message.clone());
        }
        if let Some(processed_at) = self.processed_at {
            builder = builder.processed_at(processed_at);
        }
        if let Some(locked_at) = self.locked_at {
            builder = builder.locked_at(locked_at);
        }
        if let Some(locked_by) = &self.locked_by {
            builder = builder.locked_by(locked_by.clone());
        }
        builder.build()
    }

    fn is_active_for(&self, key: &PeriodKey) -> bool {
        self.status.is_active()
            && self.user_id == key.user_id
            && self.analysis_type == key.analysis_type
            && self.target_date == key.period_start
    }
}

/// In-memory [`JobStore`] with the same conditional transitions as the
/// SQL implementation.
#[derive(Default)]
pub struct FakeJobStore {
    jobs: Mutex<Vec<StoredJob>>,
    stolen_claims: Mutex<HashSet<Uuid>>,
    fail_fetch: AtomicBool,
}

impl FakeJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, job: Job) -> Uuid {
        let stored = StoredJob::from_job(&job);
        let id = stored.id;
        self.jobs.lock().unwrap().push(stored);
        id
    }

    pub fn get(&self, id: Uuid) -> StoredJob {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == id)
            .cloned()
            .expect("job exists")
    }

    pub fn all(&self) -> Vec<StoredJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// The next claim of `id` behaves as if another invocation won the race.
    pub fn steal_next_claim(&self, id: Uuid) {
        self.stolen_claims.lock().unwrap().insert(id);
    }

    pub fn fail_fetches(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    fn update<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut StoredJob) -> bool,
    {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|job| job.id == id) {
            Some(job) => f(job),
            None => false,
        }
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn insert_job(&self, job: NewJob) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(|existing| existing.is_active_for(job.key())) {
            return Ok(None);
        }
        let job = job.into_job(Uuid::now_v7(), Utc::now());
        jobs.push(StoredJob::from_job(&job));
        Ok(Some(job))
    }

    async fn has_active_job(&self, key: &PeriodKey) -> Result<bool> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .any(|job| job.is_active_for(key)))
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ReflectionWorkerError::StoreUnavailable(
                "connection refused".into(),
            ));
        }
        let mut due: Vec<StoredJob> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.status == JobStatus::Pending && job.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|job| (job.next_retry_at, job.id));
        Ok(due
            .iter()
            .take(limit as usize)
            .map(StoredJob::to_job)
            .collect())
    }

    async fn claim_job(&self, job_id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let stolen = self.stolen_claims.lock().unwrap().remove(&job_id);
        Ok(self.update(job_id, |job| {
            if job.status != JobStatus::Pending {
                return false;
            }
            job.status = JobStatus::Processing;
            job.locked_at = Some(now);
            job.locked_by = Some(if stolen {
                "other_worker".to_string()
            } else {
                worker_id.to_string()
            });
            !stolen
        }))
    }

    async fn complete_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Completed;
            job.processed_at = Some(now);
            job.error_message = None;
            job.locked_at = None;
            job.locked_by = None;
            true
        }))
    }

    async fn skip_job(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Completed;
            job.processed_at = Some(now);
            job.error_message = Some(reason.to_string());
            job.locked_at = None;
            job.locked_by = None;
            true
        }))
    }

    async fn retry_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        next_retry_at: DateTime<Utc>,
        message: &str,
    ) -> Result<bool> {
        Ok(self.update(job_id, |job| {
            if job.status != JobStatus::Processing || job.attempts >= attempts {
                return false;
            }
            job.status = JobStatus::Pending;
            job.attempts = attempts;
            job.next_retry_at = next_retry_at;
            job.error_message = Some(message.to_string());
            job.locked_at = None;
            job.locked_by = None;
            true
        }))
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        attempts: i16,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Failed;
            job.attempts = attempts.min(job.max_attempts);
            job.error_message = Some(message.to_string());
            job.processed_at = Some(now);
            job.locked_at = None;
            job.locked_by = None;
            true
        }))
    }

    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64> {
        let mut released = 0;
        for job in self.jobs.lock().unwrap().iter_mut() {
            let stale = job.locked_at.is_none_or(|locked_at| locked_at < locked_before);
            if job.status == JobStatus::Processing && stale {
                job.status = JobStatus::Pending;
                job.locked_at = None;
                job.locked_by = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

struct StoredEntry {
    user_id: Uuid,
    entry: Entry,
    complete: bool,
}

/// In-memory application tables: users, entries and existing results.
#[derive(Default)]
pub struct FakeApp {
    users: Mutex<Vec<UserTimezone>>,
    entries: Mutex<Vec<StoredEntry>>,
    results: Mutex<HashSet<PeriodKey>>,
    failing_users: Mutex<HashSet<Uuid>>,
    failing_results: Mutex<HashSet<PeriodKey>>,
}

impl FakeApp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, timezone: &str) -> Uuid {
        let user_id = Uuid::now_v7();
        self.users.lock().unwrap().push(UserTimezone {
            user_id,
            timezone: timezone.to_string(),
        });
        user_id
    }

    pub fn add_entry(&self, user_id: Uuid, entry_date: NaiveDate, text: &str, complete: bool) -> Uuid {
        let id = Uuid::now_v7();
        self.entries.lock().unwrap().push(StoredEntry {
            user_id,
            entry: Entry {
                id,
                entry_date,
                text: Some(text.to_string()),
            },
            complete,
        });
        id
    }

    pub fn add_result(&self, key: PeriodKey) {
        self.results.lock().unwrap().insert(key);
    }

    /// Every entry lookup for `user_id` fails from now on.
    pub fn break_user(&self, user_id: Uuid) {
        self.failing_users.lock().unwrap().insert(user_id);
    }

    /// Result lookups for `key` fail from now on.
    pub fn break_result_lookup(&self, key: PeriodKey) {
        self.failing_results.lock().unwrap().insert(key);
    }
}

#[async_trait]
impl EligibilitySource for FakeApp {
    async fn has_successful_result(&self, key: &PeriodKey) -> Result<bool> {
        if self.failing_results.lock().unwrap().contains(key) {
            return Err(ReflectionWorkerError::StoreUnavailable(format!(
                "results for {key} unavailable"
            )));
        }
        Ok(self.results.lock().unwrap().contains(key))
    }

    async fn is_entry_complete(&self, entry_id: Uuid) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .any(|stored| stored.entry.id == entry_id && stored.complete))
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Entry>> {
        if self.failing_users.lock().unwrap().contains(&user_id) {
            return Err(ReflectionWorkerError::StoreUnavailable(format!(
                "entries of {user_id} unavailable"
            )));
        }
        let mut entries: Vec<Entry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|stored| {
                stored.user_id == user_id
                    && stored.entry.entry_date >= from
                    && stored.entry.entry_date <= to
            })
            .map(|stored| stored.entry.clone())
            .collect();
        entries.sort_by_key(|entry| (entry.entry_date, entry.id));
        Ok(entries)
    }
}

#[async_trait]
impl UserDirectory for FakeApp {
    async fn list_users_with_timezone(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<UserTimezone>> {
        let mut users = self.users.lock().unwrap().clone();
        users.sort_by_key(|user| user.user_id);
        Ok(users
            .into_iter()
            .filter(|user| after.is_none_or(|after| user.user_id > after))
            .take(limit as usize)
            .collect())
    }

    async fn timezones_for(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|user| user_ids.contains(&user.user_id))
            .map(|user| (user.user_id, user.timezone.clone()))
            .collect())
    }
}

/// Handler answering from a script, then with a fallback outcome.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<std::result::Result<AnalysisOutcome, HandlerError>>>,
    fallback: std::result::Result<AnalysisOutcome, HandlerError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedHandler {
    pub fn always(outcome: std::result::Result<AnalysisOutcome, HandlerError>) -> Arc<Self> {
        Arc::new(ScriptedHandler {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::always(Ok(AnalysisOutcome::Success(serde_json::json!({ "success": true }))))
    }

    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedHandler {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(AnalysisOutcome::Success(serde_json::Value::Null)),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisHandler for ScriptedHandler {
    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> std::result::Result<AnalysisOutcome, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn resolver(clock: &Arc<MockClock>) -> TimezoneResolver {
    TimezoneResolver::new(clock.clone())
}

pub fn producer(
    store: &Arc<FakeJobStore>,
    app: &Arc<FakeApp>,
    clock: &Arc<MockClock>,
    config: WorkerConfig,
) -> QueueProducer {
    QueueProducer::new(
        store.clone(),
        app.clone(),
        app.clone(),
        resolver(clock),
        config,
    )
}

pub fn consumer(
    store: &Arc<FakeJobStore>,
    app: &Arc<FakeApp>,
    handler: Arc<dyn AnalysisHandler>,
    clock: &Arc<MockClock>,
    config: WorkerConfig,
) -> QueueConsumer {
    let mut handlers = AnalysisHandlers::new();
    handlers.insert_all(handler);
    QueueConsumer::new(
        store.clone(),
        app.clone(),
        handlers,
        resolver(clock),
        config,
        format!("test_worker_{}", Uuid::now_v7().simple()),
    )
}

#[derive(FromRow, Debug)]
pub struct Migration {
    pub id: i32,
    pub ts: DateTime<Utc>,
    pub breaking: bool,
}

/// A throwaway database created on the server named by `DATABASE_URL`.
#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("drop database {} with (force)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub async fn migrate(&self) {
        reflection_worker_migrations::migrate(&self.test_pool, "public")
            .await
            .expect("Failed to migrate");
    }

    pub fn job_store(&self) -> PgJobStore {
        PgJobStore::new(self.test_pool.clone(), "public".to_string())
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        let rows: Vec<DbJob> =
            sqlx::query_as("select * from public.analysis_queue order by created_at, id")
                .fetch_all(&self.test_pool)
                .await
                .expect("Failed to get jobs");
        rows.into_iter()
            .map(|row| Job::try_from(row).expect("Invalid queue row"))
            .collect()
    }

    pub async fn get_job(&self, id: Uuid) -> Job {
        let row: DbJob = sqlx::query_as("select * from public.analysis_queue where id = $1")
            .bind(id)
            .fetch_one(&self.test_pool)
            .await
            .expect("Failed to get job");
        Job::try_from(row).expect("Invalid queue row")
    }

    pub async fn get_migrations(&self) -> Vec<Migration> {
        sqlx::query_as("select * from public.analysis_queue_migrations order by id")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get migrations")
    }
}

/// `None` when `DATABASE_URL` is unset, so the in-memory suites still run
/// on machines without PostgreSQL.
pub async fn create_test_database() -> Option<TestDatabase> {
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping PostgreSQL test");
        return None;
    };
    let pg_conn_options: PgConnectOptions = db_url
        .parse::<PgConnectOptions>()
        .expect("Failed to parse DATABASE_URL")
        .application_name("__test_reflection_worker");

    let source_pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let name = format!("__test_reflection_worker_{}", Uuid::now_v7().simple());
    sqlx::query(&format!("create database {name}"))
        .execute(&source_pool)
        .await
        .expect("Failed to create test database");

    let test_pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.database(&name))
        .await
        .expect("Failed to connect to test database");

    Some(TestDatabase {
        source_pool,
        test_pool,
        name,
    })
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()> + 'static,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let Some(test_db) = create_test_database().await else {
                return;
            };
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}
