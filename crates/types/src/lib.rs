//! Wire types shared by the bulkpull server and its subscriber client.
//!
//! Everything here is plain data: job snapshots, the estimate shape, the
//! control-plane request/response bodies and the push-channel envelopes.

pub mod api;
pub mod ids;
pub mod job;
pub mod push;
pub mod query;

pub use api::{
    CancelResponse, EstimateRequest, JobList, JobSummary, PublishResponse, StartJobRequest,
    StartJobResponse,
};
pub use ids::{ids_match, normalize_id};
pub use job::{Estimate, Job, JobId, JobProgress, JobStatus, UnknownStatus};
pub use push::{CellUpdate, ClientMessage, ServerMessage, UploadProgress};
pub use query::{DataSourceHandle, SearchQuery};
