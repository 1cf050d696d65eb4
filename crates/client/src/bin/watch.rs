// crates/client/src/bin/watch.rs
//! `bulkpull-watch`: follow one job from the terminal.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use bulkpull_client::{push_url, ConnectionState, HttpJobApi, Subscriber, SubscriberConfig};
use bulkpull_observability::{init_tracing, TracingConfig};
use bulkpull_types::JobStatus;

#[derive(Debug, Parser)]
#[command(name = "bulkpull-watch", version, about = "Follow a bulkpull job until it finishes")]
struct Args {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:47890")]
    server: String,

    /// Owner id the job was started under.
    #[arg(long)]
    user: String,

    /// Seconds without push before falling back to polling.
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,

    job_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(&TracingConfig::from_env("warn", "bulkpull-watch"))?;

    let api = HttpJobApi::new(&args.server, &args.user)?;
    let mut config = SubscriberConfig::new(push_url(&args.server), &args.user);
    config.grace_window = Duration::from_secs(args.grace_secs);
    let subscriber = Subscriber::new(api, config);

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::with_template("  {spinner} [{bar:40}] {prefix} {msg}")?.progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut state = subscriber.state();
    let state_pb = pb.clone();
    let state_task = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let label = match *state.borrow() {
                ConnectionState::Connecting => "connecting",
                ConnectionState::Connected => "live",
                ConnectionState::Reconnecting { .. } => "reconnecting",
                ConnectionState::Polling => "polling",
                ConnectionState::Closed => "",
            };
            state_pb.set_prefix(label);
        }
    });

    let outcome = subscriber
        .watch_job(&args.job_id, |job| {
            let p = &job.progress;
            // Tenths of a percent.
            pb.set_position((p.percentage * 10.0).round() as u64);
            pb.set_message(format!(
                "{:.1}% {}/{} records, page {}/{}",
                p.percentage, p.processed_records, p.total_estimated, p.current_page, p.total_pages
            ));
        })
        .await;
    state_task.abort();

    let job = match outcome {
        Ok(job) => job,
        Err(e) => {
            pb.abandon();
            return Err(e.into());
        }
    };
    pb.finish_and_clear();

    let p = &job.progress;
    match job.status {
        JobStatus::Completed => {
            eprintln!("  \u{2713} {} completed: {} records", job.id, p.processed_records);
            Ok(())
        }
        JobStatus::Cancelled => {
            eprintln!("  \u{2717} {} cancelled after {} records", job.id, p.processed_records);
            Ok(())
        }
        status => {
            let reason = job.error.as_deref().unwrap_or("no error recorded");
            bail!("{} {}: {}", job.id, status.as_str(), reason)
        }
    }
}
