// crates/server/src/jobs/fetch_loop.rs
//! The per-job page loop.
//!
//! One worker owns one job: it is the only writer of that job's progress.
//! Cancellation and shutdown are looked at before every page and during
//! retry backoff, never while a fetch or a write is in flight.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bulkpull_core::{SearchPage, SearchProvider, SinkError, SourceRecord, UpstreamError};
use bulkpull_db::{DbError, DbResult, StoredJob};
use bulkpull_types::{DataSourceHandle, Job, JobStatus, SearchQuery, ServerMessage};

use super::runner::JobRunner;
use crate::metrics::{record_page_fetched, record_records_written, record_retry};

/// Why the loop stopped before finishing.
#[derive(Debug)]
enum Stop {
    Cancelled,
    /// Process is going down; the job stays resumable.
    Shutdown,
    Failed(String),
}

pub(super) struct FetchLoop<'a> {
    runner: &'a JobRunner,
    job: Job,
    owner_id: String,
    table_id: String,
    query: SearchQuery,
    source: DataSourceHandle,
    cancel: CancellationToken,
}

impl<'a> FetchLoop<'a> {
    pub(super) fn new(runner: &'a JobRunner, stored: StoredJob, cancel: CancellationToken) -> Self {
        Self {
            runner,
            job: stored.job,
            owner_id: stored.owner_id,
            table_id: stored.table_id,
            query: stored.query,
            source: stored.source,
            cancel,
        }
    }

    /// Drive the job to a terminal state. Returns the state reached, or
    /// `None` when the loop was interrupted or the store refused the move.
    pub(super) async fn run(mut self) -> Option<JobStatus> {
        if !self.claim().await {
            return None;
        }

        let Some(provider) = self.runner.registry.get(&self.source) else {
            let msg = format!("unknown data source: {}", self.source);
            return self.stop(Stop::Failed(msg)).await;
        };

        match self.pages(provider.as_ref()).await {
            Ok(()) => self.complete().await,
            Err(stop) => self.stop(stop).await,
        }
    }

    /// `pending -> running`, or pick up a job that was already running.
    async fn claim(&mut self) -> bool {
        match self.job.status {
            JobStatus::Pending => match self.runner.db.mark_running(&self.job.id, Utc::now()).await {
                Ok(stored) => {
                    self.job = stored.job;
                    info!(job_id = %self.job.id, source = %self.source, "job started");
                    self.publish(ServerMessage::JobProgress(self.job.clone()));
                    true
                }
                Err(e) => {
                    warn!(job_id = %self.job.id, error = %e, "could not claim job");
                    false
                }
            },
            JobStatus::Running => {
                info!(
                    job_id = %self.job.id,
                    next_page = self.job.progress.current_page + 1,
                    "resuming job"
                );
                true
            }
            status => {
                debug!(job_id = %self.job.id, %status, "job already terminal");
                false
            }
        }
    }

    /// Fetch, write and report pages until the last one is done.
    async fn pages(&mut self, provider: &dyn SearchProvider) -> Result<(), Stop> {
        loop {
            self.check_stop()?;

            let page = self.job.progress.current_page + 1;
            let fetched = self.fetch_with_retry(provider, page).await?;
            record_page_fetched();

            if self.job.progress.current_page == 0 {
                self.set_totals(fetched.total_records);
                if self.job.progress.total_estimated == 0 {
                    return Ok(());
                }
            }

            let remaining = self
                .job
                .progress
                .total_estimated
                .saturating_sub(self.job.progress.processed_records);
            let mut records = fetched.records;
            records.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));

            if records.is_empty() {
                // upstream ran dry before the estimate
                let progress = &mut self.job.progress;
                info!(
                    job_id = %self.job.id,
                    page,
                    processed = progress.processed_records,
                    estimated = progress.total_estimated,
                    "upstream returned no more records"
                );
                progress.total_estimated = progress.processed_records;
                progress.total_pages = progress.current_page;
                progress.refresh_percentage();
                return Ok(());
            }

            let written = self.write_with_retry(&records).await?;
            record_records_written(written);

            let progress = &mut self.job.progress;
            progress.current_page = page;
            progress.processed_records += records.len() as u64;
            progress.refresh_percentage();
            debug!(
                job_id = %self.job.id,
                page,
                processed = progress.processed_records,
                percentage = progress.percentage,
                "page done"
            );

            self.persist_progress().await;
            self.publish(ServerMessage::JobProgress(self.job.clone()));

            let progress = &mut self.job.progress;
            if progress.current_page >= progress.total_pages
                || progress.processed_records >= progress.total_estimated
            {
                // short pages or a max-records cap can end the run early
                progress.total_pages = progress.current_page;
                progress.total_estimated = progress.processed_records;
                progress.refresh_percentage();
                return Ok(());
            }
        }
    }

    fn set_totals(&mut self, reported: u64) {
        let page_size = u64::from(self.runner.settings.page_size.max(1));
        let total = self.query.cap_total(reported);
        let progress = &mut self.job.progress;
        progress.total_estimated = total;
        progress.total_pages = u32::try_from(total.div_ceil(page_size)).unwrap_or(u32::MAX);
        progress.refresh_percentage();
        info!(
            job_id = %self.job.id,
            total_records = total,
            total_pages = progress.total_pages,
            "job sized"
        );
    }

    fn check_stop(&self) -> Result<(), Stop> {
        if self.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        if self.runner.shutdown.is_cancelled() {
            return Err(Stop::Shutdown);
        }
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        provider: &dyn SearchProvider,
        page: u32,
    ) -> Result<SearchPage, Stop> {
        let settings = &self.runner.settings;
        let mut attempt = 1;
        loop {
            self.runner.limiter.acquire().await;
            let result = match tokio::time::timeout(
                settings.fetch_timeout,
                provider.fetch_page(&self.query, page, settings.page_size),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout(settings.fetch_timeout)),
            };

            let err = match result {
                Ok(fetched) => return Ok(fetched),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(Stop::Failed(format!("page {page}: {err}")));
            }
            if !settings.retry.should_retry(attempt) {
                return Err(Stop::Failed(format!(
                    "page {page} failed after {attempt} attempts: {err}"
                )));
            }

            let delay = settings.retry.delay_with_hint(attempt, err.retry_after());
            warn!(
                job_id = %self.job.id,
                page,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient upstream error, retrying"
            );
            record_retry("fetch");
            self.backoff(delay).await?;
            attempt += 1;
        }
    }

    /// Writes are keyed upserts, so repeating one is harmless.
    async fn write_with_retry(&self, records: &[SourceRecord]) -> Result<u64, Stop> {
        let retry = &self.runner.settings.retry;
        let mut attempt = 1;
        loop {
            let err = match self.runner.sink.write_records(&self.table_id, records).await {
                Ok(written) => return Ok(written),
                Err(err @ SinkError::TableNotFound(_)) => {
                    return Err(Stop::Failed(err.to_string()));
                }
                Err(err) => err,
            };

            if !retry.should_retry(attempt) {
                return Err(Stop::Failed(format!(
                    "write failed after {attempt} attempts: {err}"
                )));
            }

            let delay = retry.delay_for(attempt);
            warn!(
                job_id = %self.job.id,
                table_id = %self.table_id,
                attempt,
                error = %err,
                "storage write failed, retrying"
            );
            record_retry("write");
            self.backoff(delay).await?;
            attempt += 1;
        }
    }

    async fn backoff(&self, delay: Duration) -> Result<(), Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            _ = self.runner.shutdown.cancelled() => Err(Stop::Shutdown),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn persist_progress(&self) {
        match self
            .runner
            .db
            .record_progress(&self.job.id, &self.job.progress)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %self.job.id, "progress not saved, job no longer running"),
            Err(e) => error!(job_id = %self.job.id, error = %e, "failed to save progress"),
        }
    }

    async fn complete(&self) -> Option<JobStatus> {
        let result = self
            .runner
            .db
            .mark_completed(&self.job.id, &self.job.progress, Utc::now())
            .await;
        self.finish(result).await
    }

    async fn stop(&self, stop: Stop) -> Option<JobStatus> {
        let id = &self.job.id;
        let result = match stop {
            Stop::Shutdown => {
                info!(job_id = %id, page = self.job.progress.current_page, "job interrupted by shutdown");
                return None;
            }
            Stop::Cancelled => {
                info!(job_id = %id, processed = self.job.progress.processed_records, "job cancelled");
                self.runner.db.mark_cancelled(id, Utc::now()).await
            }
            Stop::Failed(message) => {
                error!(job_id = %id, error = %message, "job failed");
                self.runner.db.mark_failed(id, &message, Utc::now()).await
            }
        };
        self.finish(result).await
    }

    async fn finish(&self, result: DbResult<StoredJob>) -> Option<JobStatus> {
        match result {
            Ok(stored) => {
                let status = stored.job.status;
                if status == JobStatus::Completed {
                    info!(
                        job_id = %self.job.id,
                        records = stored.job.progress.processed_records,
                        "job completed"
                    );
                }
                self.publish(ServerMessage::for_job(stored.job));
                Some(status)
            }
            Err(DbError::InvalidTransition { job_id, to }) => {
                warn!(job_id = %job_id, %to, "terminal transition refused");
                None
            }
            Err(e) => {
                error!(job_id = %self.job.id, error = %e, "failed to record terminal state");
                None
            }
        }
    }

    fn publish(&self, message: ServerMessage) {
        let delivered = self.runner.notifier.publish(&self.owner_id, &message);
        debug!(job_id = %self.job.id, kind = message.kind(), delivered, "published");
    }
}
