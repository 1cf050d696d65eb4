// crates/server/src/jobs/mod.rs
//! Background bulk-retrieval jobs.
//!
//! - [`JobController`]: the control-plane surface (start, cancel, get, list).
//! - [`JobRunner`]: owns the worker tasks, the admission gate and cancel tokens.
//! - `fetch_loop`: the per-job page loop each worker runs.

pub mod controller;
mod fetch_loop;
pub mod runner;

pub use controller::{ControlError, JobController};
pub use runner::{JobRunner, RunnerSettings};
