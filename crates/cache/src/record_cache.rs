//! Bounded cache of remote video state records
//!
//! Three key-aligned maps back the cache:
//! - `records`: id -> current record, or `None` for a tombstone
//! - `timestamps`: id -> last known update time, used to arbitrate merges
//! - `access`: id -> last access stamp, used only for eviction order
//!
//! Writes go through [`RecordCache::apply_update`] (unconditional, local
//! writes) or [`RecordCache::merge_fetched`] (last-writer-wins, remote
//! data). A late remote response can never overwrite a newer write.

use ahash::AHashMap;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use veil_core::{Clock, TransportError, VideoStateRecord};

/// Timestamp used for fetched records that carry none
///
/// Older than any real timestamp, so such records only land when nothing
/// is on file and are superseded by the first dated write.
pub const UNKNOWN_TIMESTAMP: u64 = 0;

/// Future resolving when an in-flight remote fetch has been merged
pub type FetchFuture = Shared<BoxFuture<'static, Result<(), TransportError>>>;

/// Registry entry for an in-flight fetch
///
/// Every id in one batch shares the same entry; later requests for any of
/// those ids await `future` instead of issuing a second fetch.
#[derive(Clone)]
pub struct PendingFetch {
    fetch_id: u64,
    future: FetchFuture,
}

impl PendingFetch {
    /// Wrap a shared fetch future
    pub fn new(fetch_id: u64, future: FetchFuture) -> Self {
        Self { fetch_id, future }
    }

    /// Identifier of the batch this entry belongs to
    pub fn fetch_id(&self) -> u64 {
        self.fetch_id
    }

    /// Handle to await the fetch
    pub fn future(&self) -> FetchFuture {
        self.future.clone()
    }
}

impl fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFetch")
            .field("fetch_id", &self.fetch_id)
            .finish_non_exhaustive()
    }
}

/// Access order key: wall time first, then a monotonic sequence so equal
/// millisecond stamps still sort in touch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AccessStamp {
    at_ms: u64,
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    records: AHashMap<String, Option<VideoStateRecord>>,
    timestamps: AHashMap<String, u64>,
    access: AHashMap<String, AccessStamp>,
    access_seq: u64,
    /// Reentrancy guard for eviction
    evicting: bool,
}

impl CacheState {
    fn touch(&mut self, id: &str, now_ms: u64) {
        self.access_seq += 1;
        let stamp = AccessStamp {
            at_ms: now_ms,
            seq: self.access_seq,
        };
        match self.access.get_mut(id) {
            Some(existing) => *existing = stamp,
            None => {
                self.access.insert(id.to_string(), stamp);
            }
        }
    }

    fn write(&mut self, id: &str, record: Option<VideoStateRecord>, timestamp: u64, now_ms: u64) {
        self.records.insert(id.to_string(), record);
        self.timestamps.insert(id.to_string(), timestamp);
        self.touch(id, now_ms);
    }
}

/// Result of [`RecordCache::validate_consistency`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub record_count: usize,
    pub timestamp_count: usize,
    pub access_count: usize,
    /// Cached ids with no timestamp on file
    pub missing_timestamps: Vec<String>,
    /// Cached ids with no access entry
    pub missing_access: Vec<String>,
    /// Access entries with no cached record
    pub orphaned_access: Vec<String>,
    /// Timestamps with no cached record
    pub orphaned_timestamps: Vec<String>,
}

impl ConsistencyReport {
    /// Check if the three maps disagree in size
    pub fn size_mismatch(&self) -> bool {
        self.record_count != self.timestamp_count || self.record_count != self.access_count
    }

    /// Check if nothing needs repair
    pub fn is_consistent(&self) -> bool {
        !self.size_mismatch()
            && self.missing_timestamps.is_empty()
            && self.missing_access.is_empty()
            && self.orphaned_access.is_empty()
            && self.orphaned_timestamps.is_empty()
    }
}

/// Action taken by [`RecordCache::repair_consistency`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    RemovedOrphanedAccess(String),
    RemovedOrphanedTimestamp(String),
    BackfilledTimestamp(String),
    BackfilledAccess(String),
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairAction::RemovedOrphanedAccess(id) => write!(f, "removed orphaned access entry for {id}"),
            RepairAction::RemovedOrphanedTimestamp(id) => write!(f, "removed orphaned timestamp for {id}"),
            RepairAction::BackfilledTimestamp(id) => write!(f, "backfilled timestamp for {id}"),
            RepairAction::BackfilledAccess(id) => write!(f, "backfilled access entry for {id}"),
        }
    }
}

/// Bounded, last-writer-wins cache of remote records
pub struct RecordCache {
    capacity: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    pending: Mutex<AHashMap<String, PendingFetch>>,
    evictions: AtomicU64,
}

impl RecordCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            state: Mutex::new(CacheState::default()),
            pending: Mutex::new(AHashMap::new()),
            evictions: AtomicU64::new(0),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unconditional write
    ///
    /// `Some` stores the record (stamping "now" if it carries no timestamp);
    /// `None` leaves a tombstone with a fresh timestamp so a later,
    /// out-of-order merge is rejected.
    pub fn apply_update(&self, id: &str, record: Option<VideoStateRecord>) {
        let now = self.clock.now_ms();
        let (record, timestamp) = match record {
            Some(mut record) => {
                let timestamp = *record.updated_at.get_or_insert(now);
                (Some(record), timestamp)
            }
            None => (None, now),
        };

        let mut state = self.state.lock();
        state.write(id, record, timestamp, now);
        self.evict_if_needed(&mut state);
    }

    /// Conditional write for data arriving from the remote store
    ///
    /// Rejected (apart from refreshing access time) when a timestamp is on
    /// file and the incoming one is not strictly newer. Returns true if the
    /// record was stored.
    pub fn merge_fetched(&self, id: &str, record: Option<VideoStateRecord>) -> bool {
        let now = self.clock.now_ms();
        let incoming = record.as_ref().and_then(|r| r.updated_at);

        let mut state = self.state.lock();
        if let Some(&existing) = state.timestamps.get(id) {
            if !incoming.is_some_and(|ts| ts > existing) {
                if state.records.contains_key(id) {
                    state.touch(id, now);
                }
                debug!(
                    "Rejected stale record for {} (incoming {:?}, on file {})",
                    id, incoming, existing
                );
                return false;
            }
        }

        state.write(id, record, incoming.unwrap_or(UNKNOWN_TIMESTAMP), now);
        self.evict_if_needed(&mut state);
        true
    }

    /// Current record, or `None` for a miss or a tombstone
    ///
    /// Refreshes access time only for ids the cache holds, so misses never
    /// leave access entries behind.
    pub fn get(&self, id: &str) -> Option<VideoStateRecord> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let record = state.records.get(id)?.clone();
        state.touch(id, now);
        record
    }

    /// Check if the cache holds an entry (record or tombstone) for `id`
    pub fn has(&self, id: &str) -> bool {
        self.state.lock().records.contains_key(id)
    }

    /// Last known update timestamp for `id`
    pub fn timestamp(&self, id: &str) -> Option<u64> {
        self.state.lock().timestamps.get(id).copied()
    }

    /// Number of cached entries
    pub fn size(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of access-order entries (diagnostics)
    pub fn tracked_access_len(&self) -> usize {
        self.state.lock().access.len()
    }

    /// Total entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Drop every entry and reset the eviction guard
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::default();
    }

    /// Check for an in-flight fetch covering `id`
    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// In-flight fetch covering `id`
    pub fn get_pending(&self, id: &str) -> Option<PendingFetch> {
        self.pending.lock().get(id).cloned()
    }

    /// Register an in-flight fetch for `id`
    pub fn set_pending(&self, id: &str, fetch: PendingFetch) {
        self.pending.lock().insert(id.to_string(), fetch);
    }

    /// Forget the in-flight fetch for `id`
    pub fn delete_pending(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    /// Forget the in-flight fetch for `id` only if it belongs to `fetch_id`
    ///
    /// Used by a resolving fetch so it cannot drop a newer registration
    /// made after [`RecordCache::clear_pending`].
    pub fn delete_pending_if(&self, id: &str, fetch_id: u64) {
        let mut pending = self.pending.lock();
        if pending.get(id).is_some_and(|p| p.fetch_id == fetch_id) {
            pending.remove(id);
        }
    }

    /// Forget every in-flight fetch
    pub fn clear_pending(&self) {
        self.pending.lock().clear();
    }

    /// Number of ids with an in-flight fetch
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Inspect the three maps for disagreement
    pub fn validate_consistency(&self) -> ConsistencyReport {
        let state = self.state.lock();
        let mut report = ConsistencyReport {
            record_count: state.records.len(),
            timestamp_count: state.timestamps.len(),
            access_count: state.access.len(),
            ..Default::default()
        };

        for id in state.records.keys() {
            if !state.timestamps.contains_key(id) {
                report.missing_timestamps.push(id.clone());
            }
            if !state.access.contains_key(id) {
                report.missing_access.push(id.clone());
            }
        }
        for id in state.access.keys() {
            if !state.records.contains_key(id) {
                report.orphaned_access.push(id.clone());
            }
        }
        for id in state.timestamps.keys() {
            if !state.records.contains_key(id) {
                report.orphaned_timestamps.push(id.clone());
            }
        }

        report
    }

    /// Bring the three maps back into agreement
    ///
    /// Orphaned access/timestamp entries are removed; cached records missing
    /// a timestamp or access entry are backfilled with "now".
    pub fn repair_consistency(&self) -> Vec<RepairAction> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let mut actions = Vec::new();

        let orphaned_access: Vec<String> = state
            .access
            .keys()
            .filter(|id| !state.records.contains_key(*id))
            .cloned()
            .collect();
        for id in orphaned_access {
            state.access.remove(&id);
            actions.push(RepairAction::RemovedOrphanedAccess(id));
        }

        let orphaned_timestamps: Vec<String> = state
            .timestamps
            .keys()
            .filter(|id| !state.records.contains_key(*id))
            .cloned()
            .collect();
        for id in orphaned_timestamps {
            state.timestamps.remove(&id);
            actions.push(RepairAction::RemovedOrphanedTimestamp(id));
        }

        let ids: Vec<String> = state.records.keys().cloned().collect();
        for id in ids {
            if !state.timestamps.contains_key(&id) {
                let timestamp = state
                    .records
                    .get(&id)
                    .and_then(|r| r.as_ref())
                    .and_then(|r| r.updated_at)
                    .unwrap_or(now);
                state.timestamps.insert(id.clone(), timestamp);
                actions.push(RepairAction::BackfilledTimestamp(id.clone()));
            }
            if !state.access.contains_key(&id) {
                state.touch(&id, now);
                actions.push(RepairAction::BackfilledAccess(id));
            }
        }

        for action in &actions {
            warn!("Record cache repair: {}", action);
        }
        self.evict_if_needed(&mut state);
        actions
    }

    /// Evict the coldest entries until back under capacity
    fn evict_if_needed(&self, state: &mut CacheState) {
        if state.records.len() <= self.capacity || state.evicting {
            return;
        }
        state.evicting = true;

        let excess = state.records.len() - self.capacity;
        let mut candidates: Vec<(AccessStamp, String)> = state
            .access
            .iter()
            .filter(|(id, _)| state.records.contains_key(*id))
            .map(|(id, stamp)| (*stamp, id.clone()))
            .collect();
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, id) in candidates.into_iter().take(excess) {
            if state.records.remove(&id).is_some() {
                evicted += 1;
            }
            state.timestamps.remove(&id);
            state.access.remove(&id);
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!("Evicted {} of {} excess records", evicted, excess);

        if state.records.len() != state.timestamps.len() || state.records.len() != state.access.len() {
            error!(
                "Record cache maps out of sync after eviction (records={}, timestamps={}, access={})",
                state.records.len(),
                state.timestamps.len(),
                state.access.len()
            );
        }

        state.evicting = false;
    }
}

impl fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCache")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .field("pending", &self.pending_len())
            .finish()
    }
}
