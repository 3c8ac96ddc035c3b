//! Periodic cache maintenance
//!
//! Normal-path correctness never depends on this loop. It exists to catch
//! and self-heal bookkeeping drift:
//! - record cache map disagreement (validate, then repair)
//! - node-scoped query entries whose nodes have been freed

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};
use veil_cache::{QueryCache, RecordCache, RepairAction};
use veil_core::SharedTree;

/// Result of one maintenance round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Repairs applied to the record cache
    pub repairs: Vec<RepairAction>,
    /// Node-scoped query entries dropped for freed nodes
    pub pruned_nodes: usize,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty() && self.pruned_nodes == 0
    }
}

/// Periodic consistency sweeper
pub struct CacheMaintenance {
    records: Arc<RecordCache>,
    queries: Arc<QueryCache>,
    tree: SharedTree,

    /// Sweep interval (default: 60 seconds)
    interval: Duration,
}

impl CacheMaintenance {
    pub fn new(records: Arc<RecordCache>, queries: Arc<QueryCache>, tree: SharedTree, interval: Duration) -> Self {
        Self {
            records,
            queries,
            tree,
            interval,
        }
    }

    /// Run one round synchronously
    pub fn tick(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let consistency = self.records.validate_consistency();
        if !consistency.is_consistent() {
            // Each repair action is logged by the cache itself
            warn!("Record cache inconsistent: {:?}", consistency);
            report.repairs = self.records.repair_consistency();
        }

        report.pruned_nodes = self.queries.prune_dead(&self.tree.lock());
        if report.pruned_nodes > 0 {
            debug!("Pruned query entries for {} freed nodes", report.pruned_nodes);
        }
        report
    }

    /// Run maintenance rounds forever
    ///
    /// Spawn on the runtime at startup; abort the task to stop it.
    pub async fn run(self) {
        let mut timer = interval(self.interval);

        info!("Starting cache maintenance (interval: {:?})", self.interval);

        loop {
            timer.tick().await;

            let report = self.tick();
            if report.is_clean() {
                debug!("Cache maintenance: nothing to do");
            } else {
                info!(
                    "Cache maintenance: {} repairs, {} pruned query entries",
                    report.repairs.len(),
                    report.pruned_nodes
                );
            }
        }
    }
}

impl std::fmt::Debug for CacheMaintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMaintenance")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::config::QueryCacheConfig;
    use veil_core::{ManualClock, NodeTree, VideoStateRecord, VisualState};

    fn setup() -> (CacheMaintenance, Arc<RecordCache>, Arc<QueryCache>, SharedTree) {
        let clock = Arc::new(ManualClock::new(1_000));
        let records = Arc::new(RecordCache::new(8, clock.clone()));
        let queries = Arc::new(QueryCache::new(&QueryCacheConfig::default(), clock));
        let tree = NodeTree::new("ytd-app").into_shared();
        let maintenance = CacheMaintenance::new(
            records.clone(),
            queries.clone(),
            tree.clone(),
            Duration::from_millis(10),
        );
        (maintenance, records, queries, tree)
    }

    #[test]
    fn test_tick_prunes_dead_query_entries() {
        let (maintenance, records, queries, tree) = setup();
        records.apply_update("a", Some(VideoStateRecord::new("a", VisualState::Hidden, 5)));

        {
            let mut tree = tree.lock();
            let root = tree.root();
            let item = tree.create_element("ytd-rich-item-renderer");
            tree.append_child(root, item);
            queries.first_descendant(&tree, item, "a");
            tree.remove(item);
        }

        let report = maintenance.tick();
        assert!(report.repairs.is_empty());
        assert_eq!(report.pruned_nodes, 1);
        assert!(maintenance.tick().is_clean());
    }

    #[tokio::test]
    async fn test_run_loop_sweeps_until_aborted() {
        let (maintenance, _records, queries, tree) = setup();
        {
            let mut tree = tree.lock();
            let root = tree.root();
            let item = tree.create_element("div");
            tree.append_child(root, item);
            queries.closest_match(&tree, item, "div");
            tree.remove(item);
        }
        assert_eq!(queries.node_entries(), 1);

        let handle = tokio::spawn(maintenance.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(queries.node_entries(), 0);
    }
}
