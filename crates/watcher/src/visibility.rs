//! Visible-item tracking
//!
//! Fed with raw intersection observations. A node is either in the visible
//! set or not; repeated reports of the same state are no-ops and are never
//! forwarded to subscribers. Each batch notifies subscribers at most once,
//! with the net transitions of that batch.

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use veil_core::NodeId;

/// One raw observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    pub node: NodeId,
    pub is_intersecting: bool,
    /// Visible fraction of the node, 0.0-1.0
    pub ratio: f64,
}

impl IntersectionEntry {
    pub fn new(node: NodeId, is_intersecting: bool, ratio: f64) -> Self {
        Self {
            node,
            is_intersecting,
            ratio,
        }
    }
}

/// Net transitions of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityChange {
    pub became_visible: Vec<NodeId>,
    pub became_hidden: Vec<NodeId>,
}

impl VisibilityChange {
    pub fn is_empty(&self) -> bool {
        self.became_visible.is_empty() && self.became_hidden.is_empty()
    }
}

/// Subscriber callback
pub type VisibilityCallback = Arc<dyn Fn(&VisibilityChange) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, VisibilityCallback)>,
}

/// Handle returned by [`VisibilityTracker::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Set of currently visible nodes plus change subscribers
pub struct VisibilityTracker {
    threshold: f64,
    visible: Mutex<AHashSet<NodeId>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl VisibilityTracker {
    /// Create a tracker; a node is visible while intersecting with
    /// `ratio >= threshold`
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            visible: Mutex::new(AHashSet::new()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Copy of the visible set
    pub fn snapshot(&self) -> AHashSet<NodeId> {
        self.visible.lock().clone()
    }

    pub fn is_visible(&self, node: NodeId) -> bool {
        self.visible.lock().contains(&node)
    }

    pub fn count(&self) -> usize {
        self.visible.lock().len()
    }

    /// Register a callback for batch notifications
    pub fn subscribe(&self, callback: VisibilityCallback) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.entries.push((id, callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    /// Set a node's membership; returns true if it changed
    ///
    /// Does not notify subscribers.
    pub fn mark(&self, node: NodeId, visible: bool) -> bool {
        let mut set = self.visible.lock();
        if visible {
            set.insert(node)
        } else {
            set.remove(&node)
        }
    }

    /// Drop a node without notification (node removed from the tree)
    pub fn forget(&self, node: NodeId) -> bool {
        self.visible.lock().remove(&node)
    }

    /// Drop the whole visible set without notification
    pub fn clear(&self) {
        self.visible.lock().clear();
    }

    /// Apply a batch of observations and notify subscribers once
    ///
    /// Returns the net change, or `None` if nothing transitioned. A node that
    /// flips and flips back within one batch is not reported.
    pub fn process_batch(&self, entries: &[IntersectionEntry]) -> Option<VisibilityChange> {
        let mut before: AHashMap<NodeId, bool> = AHashMap::new();
        let mut order = Vec::new();

        for entry in entries {
            let visible = entry.is_intersecting && entry.ratio >= self.threshold;
            let was = self.is_visible(entry.node);
            if !before.contains_key(&entry.node) {
                before.insert(entry.node, was);
                order.push(entry.node);
            }
            self.mark(entry.node, visible);
        }

        let mut change = VisibilityChange::default();
        {
            let set = self.visible.lock();
            for node in order {
                let was = before.get(&node).copied().unwrap_or(false);
                let now = set.contains(&node);
                match (was, now) {
                    (false, true) => change.became_visible.push(node),
                    (true, false) => change.became_hidden.push(node),
                    _ => {}
                }
            }
        }

        if change.is_empty() {
            return None;
        }

        debug!(
            "Visibility batch: {} visible, {} hidden",
            change.became_visible.len(),
            change.became_hidden.len()
        );
        self.notify(&change);
        Some(change)
    }

    fn notify(&self, change: &VisibilityChange) {
        // Callbacks run unlocked so they may query or subscribe
        let callbacks: Vec<VisibilityCallback> = self
            .subscribers
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                warn!("Visibility subscriber panicked; continuing with remaining subscribers");
            }
        }
    }
}

impl std::fmt::Debug for VisibilityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityTracker")
            .field("threshold", &self.threshold)
            .field("visible", &self.count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veil_core::NodeTree;

    fn nodes(n: usize) -> Vec<NodeId> {
        let mut tree = NodeTree::new("root");
        (0..n).map(|_| tree.create_element("div")).collect()
    }

    fn counting(tracker: &VisibilityTracker) -> (Arc<AtomicUsize>, Subscription) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let sub = tracker.subscribe(Arc::new(move |_: &VisibilityChange| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        (calls, sub)
    }

    #[test]
    fn test_below_threshold_for_unseen_node_is_silent() {
        let tracker = VisibilityTracker::new(0.1);
        let (calls, _sub) = counting(&tracker);
        let n = nodes(1);

        let change = tracker.process_batch(&[IntersectionEntry::new(n[0], true, 0.05)]);
        assert_eq!(change, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_batch_notifies_once_with_both_lists() {
        let tracker = VisibilityTracker::new(0.1);
        let n = nodes(3);
        tracker.mark(n[2], true);

        let (calls, _sub) = counting(&tracker);
        let change = tracker
            .process_batch(&[
                IntersectionEntry::new(n[0], true, 0.5),
                IntersectionEntry::new(n[1], true, 1.0),
                IntersectionEntry::new(n[2], false, 0.0),
            ])
            .unwrap();

        assert_eq!(change.became_visible, vec![n[0], n[1]]);
        assert_eq!(change.became_hidden, vec![n[2]]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_and_flip_back_are_not_reported() {
        let tracker = VisibilityTracker::new(0.1);
        let n = nodes(2);
        tracker.mark(n[0], true);

        let change = tracker.process_batch(&[
            IntersectionEntry::new(n[0], true, 0.9),
            IntersectionEntry::new(n[1], true, 0.9),
            IntersectionEntry::new(n[1], false, 0.0),
        ]);
        assert_eq!(change, None);
        assert!(tracker.is_visible(n[0]));
        assert!(!tracker.is_visible(n[1]));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let tracker = VisibilityTracker::new(0.1);
        let n = nodes(2);
        tracker.mark(n[0], true);

        let mut snapshot = tracker.snapshot();
        snapshot.insert(n[1]);
        assert_eq!(tracker.count(), 1);
        assert!(!tracker.is_visible(n[1]));
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let tracker = VisibilityTracker::new(0.1);
        let _bad = tracker.subscribe(Arc::new(|_: &VisibilityChange| panic!("subscriber failure")));
        let (calls, _sub) = counting(&tracker);
        let n = nodes(1);

        assert!(tracker.process_batch(&[IntersectionEntry::new(n[0], true, 1.0)]).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let tracker = VisibilityTracker::new(0.1);
        let (calls, sub) = counting(&tracker);
        sub.unsubscribe();
        assert_eq!(tracker.subscriber_count(), 0);

        let n = nodes(2);
        tracker.process_batch(&[IntersectionEntry::new(n[0], true, 1.0)]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(tracker.forget(n[0]));
        assert!(!tracker.forget(n[0]));
        tracker.mark(n[1], true);
        tracker.clear();
        assert_eq!(tracker.count(), 0);
    }
}
