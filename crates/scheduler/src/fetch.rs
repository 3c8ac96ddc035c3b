//! Deduplicated record fetching
//!
//! A batch request splits its ids three ways:
//! - already cached: skipped
//! - covered by an in-flight fetch: awaits that fetch's shared future
//! - everything else: sent in one `fetch_many` call, registered as pending
//!   for each id until it resolves
//!
//! The shared future merges the reply into the [`RecordCache`] itself, so a
//! fetch started by a pass that has since been superseded still lands its
//! data for later passes.

use crate::transport::RecordTransport;
use ahash::AHashSet;
use futures::future::{join_all, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use veil_cache::{FetchFuture, PendingFetch, RecordCache};
use veil_core::{TransportError, VideoStateRecord, VisualState};

/// How a batch request was served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Distinct ids requested
    pub requested: usize,
    /// Ids already cached
    pub cached: usize,
    /// Ids that joined an in-flight fetch
    pub attached: usize,
    /// Ids sent to the transport
    pub sent: usize,
}

/// Record fetcher bound to one cache and transport
pub struct RecordFetcher {
    records: Arc<RecordCache>,
    transport: Arc<dyn RecordTransport>,
    next_fetch_id: AtomicU64,
}

impl RecordFetcher {
    pub fn new(records: Arc<RecordCache>, transport: Arc<dyn RecordTransport>) -> Self {
        Self {
            records,
            transport,
            next_fetch_id: AtomicU64::new(1),
        }
    }

    /// Cache the fetcher writes into
    pub fn records(&self) -> &Arc<RecordCache> {
        &self.records
    }

    /// Ensure every id in `ids` has been resolved into the cache
    ///
    /// Fails with the first transport error among the fetches awaited.
    pub async fn fetch_batch(&self, ids: &[String]) -> Result<FetchSummary, TransportError> {
        let mut summary = FetchSummary::default();
        let mut seen: AHashSet<&str> = AHashSet::new();
        let mut joined: AHashSet<u64> = AHashSet::new();
        let mut waiters: Vec<FetchFuture> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            summary.requested += 1;

            if self.records.has(id) {
                summary.cached += 1;
            } else if let Some(pending) = self.records.get_pending(id) {
                summary.attached += 1;
                if joined.insert(pending.fetch_id()) {
                    waiters.push(pending.future());
                }
            } else {
                missing.push(id.clone());
            }
        }

        if !missing.is_empty() {
            summary.sent = missing.len();
            let fetch_id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
            let future = self.start_fetch(fetch_id, missing.clone());
            for id in &missing {
                self.records.set_pending(id, PendingFetch::new(fetch_id, future.clone()));
            }
            debug!("Fetch #{} sending {} ids", fetch_id, missing.len());
            waiters.push(future);
        }

        for result in join_all(waiters).await {
            result?;
        }
        Ok(summary)
    }

    /// Persist a state remotely, then store the result locally
    pub async fn set_state(
        &self,
        id: &str,
        state: VisualState,
        title: Option<&str>,
    ) -> Result<Option<VideoStateRecord>, TransportError> {
        let record = self.transport.set_one(id, state, title).await?;
        self.records.apply_update(id, record.clone());
        debug!("Stored state {} for {}", state, id);
        Ok(record)
    }

    fn start_fetch(&self, fetch_id: u64, ids: Vec<String>) -> FetchFuture {
        let records = self.records.clone();
        let transport = self.transport.clone();

        async move {
            let outcome = match transport.fetch_many(&ids).await {
                Ok(mut fetched) => {
                    for id in &ids {
                        let record = fetched.remove(id).flatten();
                        records.merge_fetched(id, record);
                    }
                    // Extra entries the store chose to include
                    for (id, record) in fetched {
                        records.merge_fetched(&id, record);
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!("Fetch #{} for {} ids failed: {}", fetch_id, ids.len(), e);
                    Err(e)
                }
            };

            for id in &ids {
                records.delete_pending_if(id, fetch_id);
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for RecordFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFetcher")
            .field("records", &self.records)
            .field("next_fetch_id", &self.next_fetch_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
