//! Deterministic upstream for tests.
//!
//! Serves `total_records` synthetic records (`rec-1`, `rec-2`, ...) page by
//! page, can inject scripted failures per page, and can pause before serving
//! a page until the test releases it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bulkpull_types::SearchQuery;
use serde_json::json;
use tokio::sync::Notify;

use crate::error::UpstreamError;
use crate::upstream::{SearchPage, SearchProvider, SourceRecord};

pub struct ScriptedProvider {
    total_records: u64,
    /// Records actually served, when the upstream under-delivers.
    available: Option<u64>,
    delay: Duration,
    failures: Mutex<HashMap<u32, VecDeque<UpstreamError>>>,
    requested: Mutex<Vec<u32>>,
    calls: AtomicU32,
    pause_at: Mutex<Option<u32>>,
    reached: Notify,
    release: Notify,
}

impl ScriptedProvider {
    pub fn new(total_records: u64) -> Self {
        Self {
            total_records,
            available: None,
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            pause_at: Mutex::new(None),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Report `total_records` but run dry after `available`.
    pub fn with_available(mut self, available: u64) -> Self {
        self.available = Some(available);
        self
    }

    /// Sleep this long inside every successful fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue errors returned by successive fetches of `page` before it succeeds.
    pub fn fail_page(&self, page: u32, errors: Vec<UpstreamError>) {
        let mut failures = lock(&self.failures);
        failures.entry(page).or_default().extend(errors);
    }

    /// Block the fetch of `page` until [`release`](Self::release) is called.
    pub fn pause_at(&self, page: u32) {
        *lock(&self.pause_at) = Some(page);
    }

    /// Resolves once a fetch is parked at the pause page.
    pub async fn wait_until_paused(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        *lock(&self.pause_at) = None;
        self.release.notify_one();
    }

    /// Every page requested, including failed attempts, in order.
    pub fn requested_pages(&self) -> Vec<u32> {
        lock(&self.requested).clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn page_records(&self, page: u32, per_page: u32) -> Vec<SourceRecord> {
        let served = self.available.unwrap_or(self.total_records).min(self.total_records);
        let start = u64::from(page.saturating_sub(1)) * u64::from(per_page);
        let end = (start + u64::from(per_page)).min(served);
        (start..end)
            .map(|i| {
                let id = format!("rec-{}", i + 1);
                let fields = match json!({"id": id, "index": i + 1}) {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                SourceRecord { id, fields }
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for ScriptedProvider {
    async fn fetch_page(
        &self,
        _query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requested).push(page);

        let paused = *lock(&self.pause_at) == Some(page);
        if paused {
            self.reached.notify_one();
            self.release.notified().await;
        }

        let scripted = lock(&self.failures).get_mut(&page).and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(SearchPage {
            records: self.page_records(page, per_page),
            total_records: self.total_records,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
