//! Client-side job state reducer.
//!
//! Snapshots arrive from two producers (push events and polled `get`
//! results) and in no guaranteed order across reconnects. The tracker keeps
//! the last accepted snapshot and decides per incoming snapshot whether it
//! supersedes it. The id of the job of interest is passed on every call
//! rather than captured, so a caller that switches jobs never applies events
//! for the old one.

use bulkpull_types::{ids_match, Job, JobStatus};

/// Outcome of [`JobTracker::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Identical to the current snapshot (a replayed event).
    Unchanged,
    /// Snapshot for a different job.
    OtherJob,
    /// The tracked job already reached a terminal state.
    AfterTerminal,
    /// Older than what is already known.
    Stale,
}

#[derive(Debug, Default)]
pub struct JobTracker {
    snapshot: Option<Job>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, current_id: &str, incoming: Job) -> Applied {
        if !ids_match(current_id, &incoming.id) {
            return Applied::OtherJob;
        }

        if let Some(current) = self.snapshot.as_ref().filter(|j| ids_match(&j.id, current_id)) {
            if current.status.is_terminal() {
                return Applied::AfterTerminal;
            }
            if *current == incoming {
                return Applied::Unchanged;
            }
            if !incoming.status.is_terminal() && is_behind(&incoming, current) {
                return Applied::Stale;
            }
        }

        self.snapshot = Some(incoming);
        Applied::Updated
    }

    pub fn current(&self) -> Option<&Job> {
        self.snapshot.as_ref()
    }

    /// The snapshot, once it is terminal.
    pub fn terminal(&self) -> Option<&Job> {
        self.snapshot.as_ref().filter(|j| j.status.is_terminal())
    }
}

fn is_behind(incoming: &Job, current: &Job) -> bool {
    incoming.progress.processed_records < current.progress.processed_records
        || (incoming.status == JobStatus::Pending && current.status == JobStatus::Running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkpull_types::JobProgress;
    use chrono::Utc;

    fn snapshot(id: &str, status: JobStatus, processed: u64) -> Job {
        let mut job = Job::pending(id, Utc::now());
        job.status = status;
        job.progress = JobProgress {
            current_page: (processed / 100) as u32,
            total_pages: 10,
            processed_records: processed,
            total_estimated: 1000,
            percentage: JobProgress::percentage_of(processed, 1000),
        };
        job
    }

    #[test]
    fn test_ignores_other_jobs() {
        let mut tracker = JobTracker::new();
        assert_eq!(
            tracker.apply("job_a", snapshot("job_b", JobStatus::Running, 100)),
            Applied::OtherJob
        );
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_replay_does_not_double_count() {
        let mut tracker = JobTracker::new();
        let event = snapshot("job_a", JobStatus::Running, 300);
        assert_eq!(tracker.apply("job_a", event.clone()), Applied::Updated);
        assert_eq!(tracker.apply("job_a", event), Applied::Unchanged);
        assert_eq!(tracker.current().unwrap().progress.processed_records, 300);
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut tracker = JobTracker::new();
        tracker.apply("job_a", snapshot("job_a", JobStatus::Cancelled, 500));
        assert_eq!(
            tracker.apply("job_a", snapshot("job_a", JobStatus::Running, 600)),
            Applied::AfterTerminal
        );
        assert_eq!(tracker.terminal().unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_older_progress_is_stale() {
        let mut tracker = JobTracker::new();
        tracker.apply("job_a", snapshot("job_a", JobStatus::Running, 400));
        assert_eq!(
            tracker.apply("job_a", snapshot("job_a", JobStatus::Running, 200)),
            Applied::Stale
        );
        assert_eq!(
            tracker.apply("job_a", snapshot("job_a", JobStatus::Pending, 400)),
            Applied::Stale
        );
    }

    #[test]
    fn test_terminal_wins_over_progress() {
        let mut tracker = JobTracker::new();
        tracker.apply("job_a", snapshot("job_a", JobStatus::Running, 400));
        // A failure snapshot may carry fewer records if it raced a progress event.
        assert_eq!(
            tracker.apply("job_a", snapshot("job_a", JobStatus::Failed, 300)),
            Applied::Updated
        );
        assert!(tracker.terminal().is_some());
    }

    #[test]
    fn test_numeric_and_quoted_ids_match() {
        let mut tracker = JobTracker::new();
        assert_eq!(
            tracker.apply("\"42\"", snapshot("42", JobStatus::Running, 100)),
            Applied::Updated
        );
    }

    #[test]
    fn test_switching_jobs_starts_fresh() {
        let mut tracker = JobTracker::new();
        tracker.apply("job_a", snapshot("job_a", JobStatus::Completed, 1000));
        assert_eq!(
            tracker.apply("job_b", snapshot("job_b", JobStatus::Running, 100)),
            Applied::Updated
        );
        assert_eq!(tracker.current().unwrap().id, "job_b");
    }
}
