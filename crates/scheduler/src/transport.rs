//! Remote record transport seam
//!
//! The remote store owns the authoritative records. Retry, backoff and
//! timeout policy live behind this trait; callers treat any resolved value
//! as authoritative at its own timestamp.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use veil_core::{Clock, TransportError, VideoStateRecord, VisualState};

/// Reply to a batch fetch: requested id -> record, or `None` if absent
pub type FetchedRecords = HashMap<String, Option<VideoStateRecord>>;

/// Access to the remote record store
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Fetch records for `ids`
    async fn fetch_many(&self, ids: &[String]) -> Result<FetchedRecords, TransportError>;

    /// Persist a state for one id; returns the stored record, or `None`
    /// when the store dropped it (state reset to normal)
    async fn set_one(
        &self,
        id: &str,
        state: VisualState,
        title: Option<&str>,
    ) -> Result<Option<VideoStateRecord>, TransportError>;
}

/// In-process record store
///
/// Used by the CLI simulator and tests. Setting a record to
/// [`VisualState::Normal`] deletes it.
pub struct MemoryTransport {
    clock: Arc<dyn Clock>,
    records: Mutex<AHashMap<String, VideoStateRecord>>,
    available: AtomicBool,
    fetch_calls: AtomicU64,
    fetched_ids: AtomicU64,
}

impl MemoryTransport {
    /// Create an empty store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(AHashMap::new()),
            available: AtomicBool::new(true),
            fetch_calls: AtomicU64::new(0),
            fetched_ids: AtomicU64::new(0),
        }
    }

    /// Create a store seeded with `records`
    pub fn with_records(clock: Arc<dyn Clock>, records: impl IntoIterator<Item = VideoStateRecord>) -> Self {
        let transport = Self::new(clock);
        for record in records {
            transport.insert(record);
        }
        transport
    }

    /// Store a record directly, bypassing timestamp stamping
    pub fn insert(&self, record: VideoStateRecord) {
        self.records.lock().insert(record.video_id.clone(), record);
    }

    /// Stored record for `id`
    pub fn record(&self, id: &str) -> Option<VideoStateRecord> {
        self.records.lock().get(id).cloned()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate an outage; every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `fetch_many` calls served
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Total ids requested across all `fetch_many` calls
    pub fn fetched_ids(&self) -> u64 {
        self.fetched_ids.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl RecordTransport for MemoryTransport {
    async fn fetch_many(&self, ids: &[String]) -> Result<FetchedRecords, TransportError> {
        self.check_available()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_ids.fetch_add(ids.len() as u64, Ordering::SeqCst);

        let records = self.records.lock();
        Ok(ids
            .iter()
            .map(|id| (id.clone(), records.get(id).cloned()))
            .collect())
    }

    async fn set_one(
        &self,
        id: &str,
        state: VisualState,
        title: Option<&str>,
    ) -> Result<Option<VideoStateRecord>, TransportError> {
        self.check_available()?;

        let mut records = self.records.lock();
        if state == VisualState::Normal {
            records.remove(id);
            return Ok(None);
        }

        let mut record = VideoStateRecord::new(id, state, self.clock.now_ms());
        record.title = title
            .map(str::to_string)
            .or_else(|| records.get(id).and_then(|r| r.title.clone()));
        records.insert(id.to_string(), record.clone());
        Ok(Some(record))
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("records", &self.len())
            .field("available", &self.available.load(Ordering::SeqCst))
            .field("fetch_calls", &self.fetch_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::ManualClock;

    #[tokio::test]
    async fn test_fetch_reports_absent_ids() {
        let clock = Arc::new(ManualClock::new(10));
        let transport = MemoryTransport::with_records(clock, [VideoStateRecord::new("a", VisualState::Hidden, 5)]);

        let fetched = transport
            .fetch_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched["a"].as_ref().unwrap().state, VisualState::Hidden);
        assert_eq!(fetched["b"], None);
        assert_eq!(transport.fetch_calls(), 1);
        assert_eq!(transport.fetched_ids(), 2);
    }

    #[tokio::test]
    async fn test_set_one_stamps_and_normal_deletes() {
        let clock = Arc::new(ManualClock::new(42));
        let transport = MemoryTransport::new(clock);

        let stored = transport
            .set_one("a", VisualState::Dimmed, Some("A title"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.updated_at, Some(42));
        assert_eq!(stored.title.as_deref(), Some("A title"));

        assert_eq!(transport.set_one("a", VisualState::Normal, None).await.unwrap(), None);
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let transport = MemoryTransport::new(Arc::new(ManualClock::new(0)));
        transport.set_available(false);

        let err = transport.fetch_many(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert_eq!(transport.fetch_calls(), 0);
    }
}
