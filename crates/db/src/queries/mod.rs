// crates/db/src/queries/mod.rs
// Job store and table-storage queries.

pub(crate) mod row_types;
pub mod jobs;
pub mod tables;
