// crates/server/src/jobs/runner.rs
//! Central job runner that owns every background worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use bulkpull_core::{AppConfig, ProviderRegistry, RateLimiter, RecordSink, RetryPolicy};
use bulkpull_db::{Database, DbError, DbResult, StoredJob};
use bulkpull_types::{JobId, JobStatus, ServerMessage};

use super::fetch_loop::FetchLoop;
use crate::metrics::{record_job_finished, record_job_released, record_job_started};
use crate::notifier::Notifier;

/// Knobs for the page loop and the admission gate.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_running: usize,
    pub page_size: u32,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub requests_per_second: f64,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_running: config.jobs.max_running,
            page_size: config.jobs.page_size,
            fetch_timeout: config.fetch_timeout(),
            retry: config.retry_policy(),
            requests_per_second: config.jobs.requests_per_second,
        }
    }
}

/// Spawns one worker per job and gates how many run at once.
///
/// Jobs past the gate wait in `pending`; the semaphore hands out slots in
/// the order workers asked for them. Each worker owns a cancellation token
/// registered under its job id until the worker exits.
pub struct JobRunner {
    pub(super) db: Database,
    pub(super) sink: Arc<dyn RecordSink>,
    pub(super) registry: Arc<ProviderRegistry>,
    pub(super) notifier: Arc<Notifier>,
    pub(super) limiter: Arc<RateLimiter>,
    pub(super) settings: RunnerSettings,
    pub(super) shutdown: CancellationToken,
    gate: Arc<Semaphore>,
    active: DashMap<JobId, CancellationToken>,
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new(
        db: Database,
        sink: Arc<dyn RecordSink>,
        registry: Arc<ProviderRegistry>,
        notifier: Arc<Notifier>,
        settings: RunnerSettings,
    ) -> Self {
        let limiter = if settings.requests_per_second > 0.0 {
            RateLimiter::per_second(settings.requests_per_second)
        } else {
            RateLimiter::unlimited()
        };
        Self {
            db,
            sink,
            registry,
            notifier,
            limiter: Arc::new(limiter),
            gate: Arc::new(Semaphore::new(settings.max_running.max(1))),
            settings,
            shutdown: CancellationToken::new(),
            active: DashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn the worker for `stored`. Returns immediately.
    ///
    /// A job whose cancel was already requested starts with a fired token,
    /// so it goes straight to `cancelled`. Enqueueing a job that already has
    /// a live worker is ignored.
    pub fn enqueue(self: &Arc<Self>, stored: StoredJob) {
        let job_id = stored.job.id.clone();
        let token = CancellationToken::new();
        if stored.cancel_requested {
            token.cancel();
        }

        match self.active.entry(job_id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %job_id, "job already has a worker");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let runner = Arc::clone(self);
        self.tracker.spawn(async move {
            runner.drive(stored, token).await;
            runner.active.remove(&job_id);
        });
    }

    /// Fire the cancel token of a live worker. `false` when none is running.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.active.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Admission-gate size.
    pub fn capacity(&self) -> usize {
        self.settings.max_running.max(1)
    }

    /// Gate slots not held by a running worker.
    pub fn free_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Re-enqueue every job left `pending` or `running` by a previous process.
    pub async fn recover(self: &Arc<Self>) -> DbResult<usize> {
        let jobs = self.db.resumable_jobs().await?;
        let count = jobs.len();
        for stored in jobs {
            info!(
                job_id = %stored.job.id,
                status = %stored.job.status,
                current_page = stored.job.progress.current_page,
                "re-enqueueing job"
            );
            self.enqueue(stored);
        }
        Ok(count)
    }

    /// Stop every worker without moving jobs to a terminal state, then wait.
    ///
    /// In-flight fetches and writes finish first; the jobs resume on the
    /// next [`recover`](Self::recover).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("job runner stopped");
    }

    async fn drive(&self, stored: StoredJob, token: CancellationToken) {
        let job_id = stored.job.id.clone();

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            _ = token.cancelled() => {
                self.cancel_before_start(&job_id, &stored.owner_id).await;
                return;
            }
            permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "admission gate closed");
                    return;
                }
            },
        };

        record_job_started();
        let outcome = FetchLoop::new(self, stored, token).run().await;
        drop(permit);
        record_job_released(outcome.map(|status| status.as_str()));
    }

    /// The token fired while the job was still waiting for a slot.
    async fn cancel_before_start(&self, job_id: &str, owner_id: &str) {
        match self.db.mark_cancelled(job_id, Utc::now()).await {
            Ok(stored) => {
                info!(job_id = %job_id, "job cancelled before start");
                record_job_finished(JobStatus::Cancelled.as_str());
                self.notifier
                    .publish(owner_id, &ServerMessage::for_job(stored.job));
            }
            Err(DbError::InvalidTransition { .. }) => {
                warn!(job_id = %job_id, "job already terminal, nothing to cancel");
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to record cancellation");
            }
        }
    }
}
