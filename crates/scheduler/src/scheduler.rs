//! Recomputation passes
//!
//! A pass re-derives the visual state of feed items from cached records:
//!
//! 1. Take a new iteration token. With individual mode off, strip every
//!    state class and stop.
//! 2. Pick candidates: every item on the first pass (or with lazy
//!    processing off), otherwise only items under visible nodes.
//! 3. Stop if there are none.
//! 4. Resolve their records through the fetcher (may suspend).
//! 5. If another pass took a token meanwhile, stop without touching the
//!    tree. Fetched records stay cached for the newer pass.
//! 6. Write the class state onto each eligible container.
//! 7. After the first applied pass, switch to visibility-restricted passes.
//!
//! Passes are never queued: a newer pass races an older one and the older
//! one discards its result.

use crate::fetch::RecordFetcher;
use crate::locate::{CandidateSet, ItemLocator};
use crate::maintenance::CacheMaintenance;
use crate::presenter::ClassNames;
use crate::transport::RecordTransport;
use ahash::AHashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use veil_cache::{QueryCache, RecordCache, SelectorHealthMonitor};
use veil_core::{Clock, NodeId, SharedTree, TransportError, VeilConfig, VisualState};
use veil_watcher::{IntersectionEntry, MutationRouter, RouteOutcome, VisibilityTracker};

/// What one pass did to the tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Distinct ids considered
    pub candidates: usize,
    /// Containers written
    pub containers: usize,
    /// Containers whose class list actually changed
    pub changed: usize,
    pub normal: usize,
    pub dimmed: usize,
    pub hidden: usize,
    /// Containers skipped because they were not visible
    pub skipped_invisible: usize,
    /// Sources with no container found
    pub missing_container: usize,
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Individual mode is off; state classes were stripped from `stripped` nodes
    Reset { stripped: usize },
    /// No candidates
    Empty,
    /// Results were written to the tree
    Applied(ApplyReport),
    /// A newer pass started before this one's fetch resolved
    Stale { token: u64, current: u64 },
    /// The fetch failed; the tree was left untouched
    Aborted(TransportError),
}

impl PassOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PassOutcome::Applied(_))
    }
}

/// Pass orchestration over a shared tree and the caches
pub struct HidingScheduler {
    tree: SharedTree,
    records: Arc<RecordCache>,
    queries: Arc<QueryCache>,
    health: Arc<SelectorHealthMonitor>,
    visibility: Arc<VisibilityTracker>,
    fetcher: RecordFetcher,
    locator: ItemLocator,
    classes: ClassNames,
    router: MutationRouter,
    maintenance_interval: Duration,

    token: AtomicU64,
    initial_load: AtomicBool,
    individual_mode: AtomicBool,
    lazy_processing: AtomicBool,
}

impl HidingScheduler {
    /// Build the scheduler and the caches it owns
    pub fn new(config: &VeilConfig, tree: SharedTree, transport: Arc<dyn RecordTransport>, clock: Arc<dyn Clock>) -> Self {
        let records = Arc::new(RecordCache::new(config.records.capacity, clock.clone()));
        let queries = Arc::new(QueryCache::new(&config.queries, clock.clone()));
        let health = Arc::new(SelectorHealthMonitor::new(config.health.clone(), clock));
        let visibility = Arc::new(VisibilityTracker::new(config.visibility.threshold));

        Self {
            tree,
            fetcher: RecordFetcher::new(records.clone(), transport),
            records,
            queries,
            health,
            visibility,
            locator: ItemLocator::new(&config.scheduler),
            classes: ClassNames::from_config(&config.classes),
            router: MutationRouter::new(&config.scheduler.id_attribute),
            maintenance_interval: Duration::from_secs(config.scheduler.maintenance_interval_secs),
            token: AtomicU64::new(0),
            initial_load: AtomicBool::new(true),
            individual_mode: AtomicBool::new(config.scheduler.individual_mode),
            lazy_processing: AtomicBool::new(config.scheduler.lazy_processing),
        }
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    pub fn records(&self) -> &Arc<RecordCache> {
        &self.records
    }

    pub fn queries(&self) -> &Arc<QueryCache> {
        &self.queries
    }

    pub fn health(&self) -> &Arc<SelectorHealthMonitor> {
        &self.health
    }

    pub fn visibility(&self) -> &Arc<VisibilityTracker> {
        &self.visibility
    }

    pub fn classes(&self) -> &ClassNames {
        &self.classes
    }

    /// Latest token handed out
    pub fn current_token(&self) -> u64 {
        self.token.load(Ordering::SeqCst)
    }

    /// True until the first pass has been applied
    pub fn is_initial_load(&self) -> bool {
        self.initial_load.load(Ordering::SeqCst)
    }

    pub fn set_individual_mode(&self, enabled: bool) {
        self.individual_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn set_lazy_processing(&self, enabled: bool) {
        self.lazy_processing.store(enabled, Ordering::SeqCst);
    }

    /// Run one recomputation pass
    pub async fn run_pass(&self) -> PassOutcome {
        let token = self.token.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.individual_mode.load(Ordering::SeqCst) {
            let stripped = self.classes.strip_all(&mut self.tree.lock());
            debug!("Pass {}: individual mode off, stripped {} nodes", token, stripped);
            return PassOutcome::Reset { stripped };
        }

        let full_scan = self.full_scan();
        let candidates = {
            let tree = self.tree.lock();
            if full_scan {
                self.locator.collect_all(&tree, &self.queries)
            } else {
                self.locator
                    .collect_visible(&tree, &self.queries, &self.visibility.snapshot())
            }
        };

        if candidates.is_empty() {
            debug!("Pass {}: no candidates (full scan: {})", token, full_scan);
            return PassOutcome::Empty;
        }

        if let Err(e) = self.fetcher.fetch_batch(candidates.ids()).await {
            warn!("Pass {} aborted: {}", token, e);
            return PassOutcome::Aborted(e);
        }

        let current = self.current_token();
        if current != token {
            debug!("Pass {} is stale (current token {}), discarding", token, current);
            return PassOutcome::Stale { token, current };
        }

        let report = self.apply(&candidates, full_scan);
        if self.initial_load.swap(false, Ordering::SeqCst) {
            info!("Initial load complete: {} items processed", report.candidates);
        }
        debug!(
            "Pass {} applied: {} containers ({} changed)",
            token, report.containers, report.changed
        );
        PassOutcome::Applied(report)
    }

    /// Persist a state remotely, then recompute
    pub async fn set_state(
        &self,
        id: &str,
        state: VisualState,
        title: Option<&str>,
    ) -> Result<PassOutcome, TransportError> {
        self.fetcher.set_state(id, state, title).await?;
        Ok(self.run_pass().await)
    }

    /// Reset per-page state
    ///
    /// Supersedes in-flight passes, drops the visible set and the tree-wide
    /// query cache, and makes the next pass a full scan.
    pub fn on_navigation(&self) {
        let token = self.token.fetch_add(1, Ordering::SeqCst) + 1;
        self.visibility.clear();
        self.queries.clear_all();
        self.initial_load.store(true, Ordering::SeqCst);
        info!("Navigation: reset scheduler state (token {})", token);
    }

    /// Drain the tree's mutation log and route it
    pub fn handle_mutations(&self) -> RouteOutcome {
        let mut tree = self.tree.lock();
        let batch = tree.take_mutations();
        if batch.is_empty() {
            return RouteOutcome::default();
        }
        self.router.route(&batch, &tree, &self.queries, &self.visibility)
    }

    /// Feed an intersection batch; returns true if a pass should run
    pub fn handle_intersections(&self, entries: &[IntersectionEntry]) -> bool {
        self.visibility
            .process_batch(entries)
            .is_some_and(|change| !change.became_visible.is_empty())
    }

    /// Periodic consistency sweeps over this scheduler's caches
    pub fn maintenance(&self) -> CacheMaintenance {
        CacheMaintenance::new(
            self.records.clone(),
            self.queries.clone(),
            self.tree.clone(),
            self.maintenance_interval,
        )
    }

    fn full_scan(&self) -> bool {
        self.initial_load.load(Ordering::SeqCst) || !self.lazy_processing.load(Ordering::SeqCst)
    }

    fn apply(&self, candidates: &CandidateSet, full_scan: bool) -> ApplyReport {
        let visible = self.visibility.snapshot();
        let mut tree = self.tree.lock();
        let mut report = ApplyReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let mut written: AHashSet<NodeId> = AHashSet::new();

        for id in candidates.ids() {
            if !self.records.has(id) {
                continue;
            }
            let state = self.records.get(id).map(|record| record.state).unwrap_or_default();

            for &source in candidates.sources(id) {
                if !tree.is_alive(source) {
                    continue;
                }
                let Some(container) = self
                    .locator
                    .container_for(&tree, &self.queries, &self.health, source)
                else {
                    report.missing_container += 1;
                    continue;
                };
                if !written.insert(container) {
                    continue;
                }
                if !(full_scan || visible.contains(&container) || visible.contains(&source)) {
                    report.skipped_invisible += 1;
                    continue;
                }

                if self.classes.apply_state(&mut tree, container, state) {
                    report.changed += 1;
                }
                report.containers += 1;
                match state {
                    VisualState::Normal => report.normal += 1,
                    VisualState::Dimmed => report.dimmed += 1,
                    VisualState::Hidden => report.hidden += 1,
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for HidingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidingScheduler")
            .field("token", &self.current_token())
            .field("initial_load", &self.is_initial_load())
            .field("individual_mode", &self.individual_mode.load(Ordering::SeqCst))
            .field("lazy_processing", &self.lazy_processing.load(Ordering::SeqCst))
            .field("records", &self.records)
            .field("queries", &self.queries)
            .finish_non_exhaustive()
    }
}
