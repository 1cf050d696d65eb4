// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bulkpull_core::{AppConfig, EstimateService, ProviderRegistry, RecordSink};
use bulkpull_db::Database;

use crate::jobs::{JobController, JobRunner, RunnerSettings};
use crate::notifier::Notifier;

/// Push-channel timing, from the `push` config section.
#[derive(Debug, Clone, Copy)]
pub struct PushSettings {
    pub heartbeat: Duration,
    pub auth_timeout: Duration,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub db: Database,
    /// Per-owner fan-out hub behind `/ws`.
    pub notifier: Arc<Notifier>,
    /// Background workers; `main` drives recovery and shutdown through it.
    pub runner: Arc<JobRunner>,
    pub jobs: JobController,
    pub estimates: EstimateService,
    pub push: PushSettings,
}

impl AppState {
    /// Build the state with the database doubling as table storage.
    pub fn new(db: Database, registry: Arc<ProviderRegistry>, config: &AppConfig) -> Arc<Self> {
        let sink: Arc<dyn RecordSink> = Arc::new(db.clone());
        Self::with_sink(db, sink, registry, config)
    }

    /// Build the state with a separate table-storage sink.
    pub fn with_sink(
        db: Database,
        sink: Arc<dyn RecordSink>,
        registry: Arc<ProviderRegistry>,
        config: &AppConfig,
    ) -> Arc<Self> {
        let notifier = Arc::new(Notifier::new(config.push.channel_capacity));
        let runner = Arc::new(JobRunner::new(
            db.clone(),
            sink,
            Arc::clone(&registry),
            Arc::clone(&notifier),
            RunnerSettings::from_config(config),
        ));
        let jobs = JobController::new(db.clone(), Arc::clone(&runner), Arc::clone(&registry));
        let estimates = EstimateService::new(registry, config.estimate_model());

        Arc::new(Self {
            start_time: Instant::now(),
            db,
            notifier,
            runner,
            jobs,
            estimates,
            push: PushSettings {
                heartbeat: Duration::from_secs(config.push.heartbeat_secs.max(1)),
                auth_timeout: Duration::from_secs(config.push.auth_timeout_secs.max(1)),
            },
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
