//! Push subscription with reconnect and polling fallback.
//!
//! The subscriber prefers the push channel. While it is down it reconnects
//! with exponential backoff; once the grace window after losing (or never
//! getting) a connection has passed, it also polls `get` between attempts.
//! After the reconnect budget is spent, or after the server closes the
//! socket normally, it polls until the job is terminal.
//!
//! A live connection is not trusted blindly either: after
//! `reconcile_interval` without a job event the subscriber pings the server
//! and re-reads the job, so a lost terminal event cannot stall a watch.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use bulkpull_types::{normalize_id, Job};

use crate::api::JobApi;
use crate::error::ClientError;
use crate::handlers::{dispatch, EventHandler, JobEvent};
use crate::push::{PushConnection, PushEvent};
use crate::reconnect::ReconnectPolicy;
use crate::tracker::{Applied, JobTracker};

/// Push endpoint for a server base URL (`http://h:p` becomes `ws://h:p/ws`).
pub fn push_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/ws")
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub push_url: String,
    pub user_id: String,
    /// How long push may stay unavailable before polling starts.
    pub grace_window: Duration,
    pub poll_interval: Duration,
    /// Silence on an open connection after which it is considered dead.
    pub heartbeat_timeout: Duration,
    /// Bound on the handshake and on the wait for `auth_success`.
    pub auth_timeout: Duration,
    /// Quiet period on a live connection after which the job is re-read.
    pub reconcile_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SubscriberConfig {
    pub fn new(push_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            push_url: push_url.into(),
            user_id: normalize_id(&user_id.into()),
            grace_window: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(75),
            auth_timeout: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Polling,
    Closed,
}

enum PumpOutcome {
    Terminal(Job),
    ClosedByServer,
    Dropped(ClientError),
    Failed(ClientError),
}

/// Feeds job events into the tracker for the job currently of interest.
struct Tracking<'a, F> {
    current_id: &'a str,
    tracker: &'a mut JobTracker,
    on_update: &'a mut F,
}

impl<F: FnMut(&Job)> EventHandler for Tracking<'_, F> {
    fn on_job(&mut self, event: JobEvent, job: Job) {
        reduce(self.current_id, self.tracker, job, self.on_update);
        debug!(?event, job_id = self.current_id, "push event applied");
    }

    fn on_error(&mut self, message: String) {
        warn!(%message, "server error frame");
    }
}

/// Apply one snapshot; notify on change. Returns the terminal snapshot once
/// there is one.
fn reduce<F: FnMut(&Job)>(
    current_id: &str,
    tracker: &mut JobTracker,
    job: Job,
    on_update: &mut F,
) -> Option<Job> {
    if tracker.apply(current_id, job) == Applied::Updated {
        if let Some(current) = tracker.current() {
            on_update(current);
        }
    }
    tracker.terminal().cloned()
}

pub struct Subscriber<A> {
    api: A,
    config: SubscriberConfig,
    state: watch::Sender<ConnectionState>,
}

impl<A: JobApi> Subscriber<A> {
    pub fn new(api: A, config: SubscriberConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self { api, config, state }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    /// Follow `job_id` until it is terminal, calling `on_update` for every
    /// accepted snapshot. Returns the terminal snapshot.
    pub async fn watch_job<F>(&self, job_id: &str, mut on_update: F) -> Result<Job, ClientError>
    where
        F: FnMut(&Job) + Send,
    {
        let job_id = normalize_id(job_id);
        let mut tracker = JobTracker::new();

        let result = self.follow(&job_id, &mut tracker, &mut on_update).await;
        self.set_state(ConnectionState::Closed);
        result
    }

    async fn follow<F>(
        &self,
        job_id: &str,
        tracker: &mut JobTracker,
        on_update: &mut F,
    ) -> Result<Job, ClientError>
    where
        F: FnMut(&Job) + Send,
    {
        if let Some(done) = self.poll_once(job_id, tracker, on_update).await? {
            return Ok(done);
        }

        let policy = &self.config.reconnect;
        let mut grace_deadline = Instant::now() + self.config.grace_window;
        let mut attempt: u32 = 0;
        let mut push_enabled = true;

        loop {
            if push_enabled {
                self.set_state(if attempt == 0 {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Reconnecting { attempt }
                });

                match PushConnection::connect(
                    &self.config.push_url,
                    &self.config.user_id,
                    self.config.auth_timeout,
                )
                .await
                {
                    Ok(conn) => {
                        attempt = 0;
                        self.set_state(ConnectionState::Connected);
                        info!(job_id, "push connected");

                        // Events published while disconnected are gone.
                        if let Some(done) = self.poll_once(job_id, tracker, on_update).await? {
                            conn.close().await;
                            return Ok(done);
                        }

                        match self.pump(conn, job_id, tracker, on_update).await {
                            PumpOutcome::Terminal(done) => return Ok(done),
                            PumpOutcome::ClosedByServer => {
                                info!(job_id, "push closed normally, polling until the job finishes");
                                push_enabled = false;
                            }
                            PumpOutcome::Dropped(e) => {
                                warn!(job_id, error = %e, "push connection lost");
                                grace_deadline = Instant::now() + self.config.grace_window;
                            }
                            PumpOutcome::Failed(e) => return Err(e),
                        }
                    }
                    Err(e) => {
                        warn!(job_id, attempt = attempt + 1, error = %e, "push connect failed");
                    }
                }

                if push_enabled {
                    attempt += 1;
                    if !policy.allows(attempt) {
                        warn!(job_id, attempts = policy.max_attempts, "giving up on push");
                        push_enabled = false;
                    }
                }
            }

            let wait = if push_enabled {
                policy.delay_for(attempt)
            } else {
                self.config.poll_interval
            };

            if !push_enabled || Instant::now() >= grace_deadline {
                self.set_state(ConnectionState::Polling);
                if let Some(done) = self.poll_during(wait, job_id, tracker, on_update).await? {
                    return Ok(done);
                }
            } else {
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn pump<F>(
        &self,
        mut conn: PushConnection,
        job_id: &str,
        tracker: &mut JobTracker,
        on_update: &mut F,
    ) -> PumpOutcome
    where
        F: FnMut(&Job) + Send,
    {
        let quiet = self.config.reconcile_interval.max(Duration::from_millis(1));
        let mut reconcile = tokio::time::interval_at(Instant::now() + quiet, quiet);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = conn.next_event(self.config.heartbeat_timeout) => match event {
                    Ok(PushEvent::Message(message)) => {
                        if message.job().is_some() {
                            reconcile.reset();
                        }
                        let mut handler = Tracking {
                            current_id: job_id,
                            tracker: &mut *tracker,
                            on_update: &mut *on_update,
                        };
                        dispatch(&mut handler, message);

                        if let Some(done) = tracker.terminal() {
                            let done = done.clone();
                            conn.close().await;
                            return PumpOutcome::Terminal(done);
                        }
                    }
                    Ok(PushEvent::Closed { intentional: true }) => return PumpOutcome::ClosedByServer,
                    Ok(PushEvent::Closed { intentional: false }) => {
                        return PumpOutcome::Dropped(ClientError::ConnectionLost)
                    }
                    Err(e) => return PumpOutcome::Dropped(e),
                },
                _ = reconcile.tick() => {
                    debug!(job_id, ?quiet, "no job event, re-reading job");
                    if let Err(e) = conn.ping().await {
                        return PumpOutcome::Dropped(e);
                    }
                    match self.poll_once(job_id, tracker, on_update).await {
                        Ok(Some(done)) => {
                            conn.close().await;
                            return PumpOutcome::Terminal(done);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            conn.close().await;
                            return PumpOutcome::Failed(e);
                        }
                    }
                }
            }
        }
    }

    /// Poll every `poll_interval` for up to `window`.
    async fn poll_during<F>(
        &self,
        window: Duration,
        job_id: &str,
        tracker: &mut JobTracker,
        on_update: &mut F,
    ) -> Result<Option<Job>, ClientError>
    where
        F: FnMut(&Job) + Send,
    {
        let until = Instant::now() + window;
        loop {
            if let Some(done) = self.poll_once(job_id, tracker, on_update).await? {
                return Ok(Some(done));
            }
            let now = Instant::now();
            if now >= until {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(until - now)).await;
        }
    }

    async fn poll_once<F>(
        &self,
        job_id: &str,
        tracker: &mut JobTracker,
        on_update: &mut F,
    ) -> Result<Option<Job>, ClientError>
    where
        F: FnMut(&Job) + Send,
    {
        match self.api.get(job_id).await {
            Ok(job) => Ok(reduce(job_id, tracker, job, on_update)),
            Err(e) if e.is_transient() => {
                warn!(job_id, error = %e, "job poll failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_url_from_base() {
        assert_eq!(push_url("http://127.0.0.1:47890"), "ws://127.0.0.1:47890/ws");
        assert_eq!(push_url("https://jobs.example.com/"), "wss://jobs.example.com/ws");
    }

    #[test]
    fn test_config_normalizes_user_id() {
        let config = SubscriberConfig::new("ws://x/ws", " \"42\" ");
        assert_eq!(config.user_id, "42");
    }
}
