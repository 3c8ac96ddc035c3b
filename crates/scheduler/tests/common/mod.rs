//! Shared fixtures for scheduler integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use veil_core::{ManualClock, NodeId, NodeTree, SharedTree, TransportError, VeilConfig, VideoStateRecord, VisualState};
use veil_scheduler::{FetchedRecords, HidingScheduler, MemoryTransport, RecordTransport};

/// Memory transport whose fetches can be held open
///
/// Each `gate_next` queues a gate; the next `fetch_many` call waits on it.
/// Calls with no queued gate resolve immediately.
pub struct GatedTransport {
    pub inner: MemoryTransport,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl GatedTransport {
    pub fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            gates: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hold the next fetch until the returned sender fires
    pub fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().push_back(rx);
        tx
    }

    /// Number of `fetch_many` calls started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids of every `fetch_many` call, in call order
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RecordTransport for GatedTransport {
    async fn fetch_many(&self, ids: &[String]) -> Result<FetchedRecords, TransportError> {
        self.requests.lock().push(ids.to_vec());
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.fetch_many(ids).await
    }

    async fn set_one(
        &self,
        id: &str,
        state: VisualState,
        title: Option<&str>,
    ) -> Result<Option<VideoStateRecord>, TransportError> {
        self.inner.set_one(id, state, title).await
    }
}

/// Scheduler over a fresh feed
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub tree: SharedTree,
    pub transport: Arc<GatedTransport>,
    pub scheduler: Arc<HidingScheduler>,
}

impl Harness {
    /// Feed with default config and the given store contents
    pub fn new(store: impl IntoIterator<Item = VideoStateRecord>) -> Self {
        Self::with_config(VeilConfig::default(), store)
    }

    pub fn with_config(config: VeilConfig, store: impl IntoIterator<Item = VideoStateRecord>) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let tree = NodeTree::new("ytd-app").into_shared();
        let transport = Arc::new(GatedTransport::new(MemoryTransport::with_records(clock.clone(), store)));
        let scheduler = Arc::new(HidingScheduler::new(
            &config,
            tree.clone(),
            transport.clone(),
            clock.clone(),
        ));
        Self {
            clock,
            tree,
            transport,
            scheduler,
        }
    }

    /// Append an item container with a watch link; returns (container, link)
    pub fn add_item(&self, video_id: &str) -> (NodeId, NodeId) {
        let mut tree = self.tree.lock();
        let root = tree.root();
        let container = tree.create_element("ytd-rich-item-renderer");
        tree.append_child(root, container);
        let link = tree.create_element("a");
        tree.set_attribute(link, "href", &format!("/watch?v={video_id}"));
        tree.append_child(container, link);
        (container, link)
    }

    /// State shown by `node`'s classes
    pub fn state_of(&self, node: NodeId) -> VisualState {
        self.scheduler.classes().state_of(&self.tree.lock(), node)
    }

    /// Class list of `node`
    pub fn classes_of(&self, node: NodeId) -> Vec<String> {
        self.tree.lock().classes(node).to_vec()
    }

    /// Yield until at least `n` fetches have started
    pub async fn wait_for_calls(&self, n: usize) {
        while self.transport.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    /// Yield until the scheduler has handed out token `n`
    pub async fn wait_for_token(&self, n: u64) {
        while self.scheduler.current_token() < n {
            tokio::task::yield_now().await;
        }
    }
}

pub fn record(id: &str, state: VisualState, updated_at: u64) -> VideoStateRecord {
    VideoStateRecord::new(id, state, updated_at)
}
