//! Typed dispatch of push frames.

use bulkpull_types::{CellUpdate, Job, ServerMessage, UploadProgress};

/// Which `job_*` event carried a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Progress,
    Complete,
    Failed,
    Cancelled,
}

/// Callbacks for server events. Every method defaults to a no-op so
/// implementors only handle the kinds they care about.
pub trait EventHandler {
    fn on_job(&mut self, _event: JobEvent, _job: Job) {}

    fn on_upload_progress(&mut self, _progress: UploadProgress) {}

    fn on_cell_update(&mut self, _update: CellUpdate) {}

    /// Server-reported error frame.
    fn on_error(&mut self, _message: String) {}
}

/// Route one frame to the matching handler method.
pub fn dispatch<H: EventHandler + ?Sized>(handler: &mut H, message: ServerMessage) {
    match message {
        ServerMessage::AuthSuccess | ServerMessage::Pong => {}
        ServerMessage::Error { message } => handler.on_error(message),
        ServerMessage::JobProgress(job) => handler.on_job(JobEvent::Progress, job),
        ServerMessage::JobComplete(job) => handler.on_job(JobEvent::Complete, job),
        ServerMessage::JobFailed(job) => handler.on_job(JobEvent::Failed, job),
        ServerMessage::JobCancelled(job) => handler.on_job(JobEvent::Cancelled, job),
        ServerMessage::UploadProgress(progress) => handler.on_upload_progress(progress),
        ServerMessage::CellUpdate(update) => handler.on_cell_update(update),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl EventHandler for Recorder {
        fn on_job(&mut self, event: JobEvent, job: Job) {
            self.seen.push(format!("{event:?}:{}", job.id));
        }

        fn on_cell_update(&mut self, update: CellUpdate) {
            self.seen.push(format!("cell:{}", update.row_id));
        }

        fn on_error(&mut self, message: String) {
            self.seen.push(format!("error:{message}"));
        }
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let mut recorder = Recorder::default();
        let frames = vec![
            ServerMessage::AuthSuccess,
            ServerMessage::JobProgress(Job::pending("job_1", Utc::now())),
            ServerMessage::CellUpdate(CellUpdate {
                table_id: "t".into(),
                row_id: "r7".into(),
                column_id: "c".into(),
                value: json!(1),
            }),
            ServerMessage::UploadProgress(UploadProgress {
                upload_id: "u1".into(),
                table_id: None,
                processed_rows: 1,
                total_rows: 2,
                status: "processing".into(),
            }),
            ServerMessage::Error {
                message: "auth timeout".into(),
            },
            ServerMessage::Pong,
        ];
        for frame in frames {
            dispatch(&mut recorder, frame);
        }

        assert_eq!(
            recorder.seen,
            vec!["Progress:job_1", "cell:r7", "error:auth timeout"]
        );
    }
}
