// crates/client/src/lib.rs
//! Subscriber client for bulkpull.
//!
//! [`Subscriber::watch_job`] follows one job until it reaches a terminal
//! state. Push events and poll results both feed the same [`JobTracker`], so
//! the caller sees one stream of snapshots whichever transport delivered them.

pub mod api;
pub mod error;
pub mod handlers;
pub mod push;
pub mod reconnect;
pub mod subscriber;
pub mod tracker;

pub use api::{HttpJobApi, JobApi};
pub use error::ClientError;
pub use handlers::{dispatch, EventHandler, JobEvent};
pub use push::{PushConnection, PushEvent};
pub use reconnect::ReconnectPolicy;
pub use subscriber::{push_url, ConnectionState, Subscriber, SubscriberConfig};
pub use tracker::{Applied, JobTracker};
