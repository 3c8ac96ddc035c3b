//! Run recomputation passes over a feed fixture
//!
//! Loads a feed and a record store from JSON, drives the scheduler through
//! an initial full scan and a number of visibility-restricted passes, and
//! reports the resulting item states alongside cache and selector health.

use crate::fixture;
use crate::util;
use anyhow::{anyhow, bail, Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use veil_cache::{QueryStats, SelectorHealth};
use veil_core::{NodeId, SystemClock, VisualState};
use veil_scheduler::locate::CONTAINER_CHAIN_KEY;
use veil_scheduler::{HidingScheduler, ItemLocator, MaintenanceReport, MemoryTransport, PassOutcome};
use veil_watcher::IntersectionEntry;

/// A state write requested on the command line (`ID=STATE`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub id: String,
    pub state: VisualState,
}

impl FromStr for StateChange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((id, state)) = s.split_once('=') else {
            bail!("Expected ID=STATE, got '{}'", s);
        };
        let id = id.trim();
        if id.is_empty() {
            bail!("Missing video id in '{}'", s);
        }
        let state = state
            .trim()
            .to_ascii_lowercase()
            .parse::<VisualState>()
            .map_err(|_| anyhow!("Unknown state '{}' (expected normal, dimmed, or hidden)", state.trim()))?;
        Ok(Self {
            id: id.to_string(),
            state,
        })
    }
}

/// Inputs for one simulation
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub feed: PathBuf,
    pub store: Option<PathBuf>,
    pub config: Option<PathBuf>,
    /// Video ids whose containers are on screen after the first pass
    pub visible: Vec<String>,
    /// Total passes, including the initial full scan
    pub passes: usize,
    /// State writes issued after the passes
    pub set: Vec<StateChange>,
}

/// Final state of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemState {
    pub id: String,
    pub container_tag: String,
    pub state: VisualState,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub outcomes: Vec<PassOutcome>,
    pub items: Vec<ItemState>,
    /// Ids with no container in the feed
    pub orphans: Vec<String>,
    pub cached_records: usize,
    /// Tree changes left unrouted at the end
    pub pending_mutations: usize,
    pub fetch_calls: u64,
    pub fetched_ids: u64,
    pub queries: QueryStats,
    pub container_health: Option<SelectorHealth>,
    pub maintenance: MaintenanceReport,
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    let report = execute(&args).await?;
    print_report(&args, &report);
    Ok(())
}

/// Run the simulation and collect its results
pub async fn execute(args: &SimulateArgs) -> Result<SimulationReport> {
    // 1. Load inputs
    let config = util::load_config(args.config.as_deref())?;
    let feed = fixture::load_feed(&args.feed)?;
    let store = match &args.store {
        Some(path) => fixture::load_store(path)?,
        None => Vec::new(),
    };
    info!("Loaded feed ({} nodes) and {} stored records", feed.tree.len(), store.len());

    // 2. Wire the scheduler
    let clock = Arc::new(SystemClock);
    let transport = Arc::new(MemoryTransport::with_records(clock.clone(), store));
    let tree = feed.tree.into_shared();
    let scheduler = HidingScheduler::new(&config, tree.clone(), transport.clone(), clock);
    let locator = ItemLocator::new(&config.scheduler);

    // 3. Initial full scan
    let mut outcomes = Vec::with_capacity(args.passes.max(1) + args.set.len());
    outcomes.push(run_pass(&scheduler).await);

    // 4. Bring the requested items on screen
    let mut entries: Vec<IntersectionEntry> = feed
        .visible
        .iter()
        .map(|&node| IntersectionEntry::new(node, true, 1.0))
        .collect();
    {
        let tree = tree.lock();
        let candidates = locator.collect_all(&tree, scheduler.queries());
        for id in &args.visible {
            let sources = candidates.sources(id);
            if sources.is_empty() {
                debug!("Visible id {} is not in the feed", id);
            }
            for &source in sources {
                let node = locator
                    .container_for(&tree, scheduler.queries(), scheduler.health(), source)
                    .unwrap_or(source);
                entries.push(IntersectionEntry::new(node, true, 1.0));
            }
        }
    }
    scheduler.handle_intersections(&entries);

    // 5. Visibility-restricted passes
    for _ in 1..args.passes {
        outcomes.push(run_pass(&scheduler).await);
    }

    // 6. State writes
    for change in &args.set {
        let outcome = scheduler
            .set_state(&change.id, change.state, None)
            .await
            .with_context(|| format!("Failed to set {} to {}", change.id, change.state))?;
        scheduler.handle_mutations();
        outcomes.push(outcome);
    }

    // 7. One maintenance round
    let maintenance = scheduler.maintenance().tick();

    // 8. Snapshot health before the report lookups below add to it
    let container_health = scheduler.health().health(CONTAINER_CHAIN_KEY);
    let pending_mutations = tree.lock().pending_mutations();
    let queries = scheduler.queries().stats();

    // 9. Read back container states
    let mut items = Vec::new();
    let mut orphans = Vec::new();
    {
        let tree = tree.lock();
        let candidates = locator.collect_all(&tree, scheduler.queries());
        let mut seen: Vec<NodeId> = Vec::new();
        for id in candidates.ids() {
            let mut found = false;
            for &source in candidates.sources(id) {
                let Some(container) =
                    locator.container_for(&tree, scheduler.queries(), scheduler.health(), source)
                else {
                    continue;
                };
                found = true;
                if seen.contains(&container) {
                    continue;
                }
                seen.push(container);
                items.push(ItemState {
                    id: id.clone(),
                    container_tag: tree.tag(container).unwrap_or_default().to_string(),
                    state: scheduler.classes().state_of(&tree, container),
                });
            }
            if !found {
                orphans.push(id.clone());
            }
        }
    }
    items.sort_by(|a, b| a.id.cmp(&b.id));
    orphans.sort();

    Ok(SimulationReport {
        outcomes,
        items,
        orphans,
        cached_records: scheduler.records().size(),
        pending_mutations,
        fetch_calls: transport.fetch_calls(),
        fetched_ids: transport.fetched_ids(),
        queries,
        container_health,
        maintenance,
    })
}

/// Run a pass, then route the class writes it made
async fn run_pass(scheduler: &HidingScheduler) -> PassOutcome {
    let outcome = scheduler.run_pass().await;
    scheduler.handle_mutations();
    outcome
}

fn describe(outcome: &PassOutcome) -> String {
    match outcome {
        PassOutcome::Reset { stripped } => format!("reset ({} nodes stripped)", stripped),
        PassOutcome::Empty => "no candidates".to_string(),
        PassOutcome::Applied(report) => format!(
            "applied {} containers ({} changed): {} normal, {} dimmed, {} hidden",
            report.containers, report.changed, report.normal, report.dimmed, report.hidden
        ),
        PassOutcome::Stale { token, current } => format!("stale (token {}, current {})", token, current),
        PassOutcome::Aborted(e) => format!("aborted: {}", e),
    }
}

fn print_report(args: &SimulateArgs, report: &SimulationReport) {
    println!("{}", "Simulation".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Feed:          {}", args.feed.display().to_string().cyan());
    if let Some(store) = &args.store {
        println!("Store:         {}", store.display().to_string().cyan());
    }
    println!();

    println!("Passes:");
    for (i, outcome) in report.outcomes.iter().enumerate() {
        let line = describe(outcome);
        let line = if outcome.is_applied() {
            line.green().to_string()
        } else {
            line.yellow().to_string()
        };
        println!("  {:>2}. {}", i + 1, line);
    }
    println!();

    println!("Items:");
    if report.items.is_empty() {
        println!("  {}", "(none found)".dimmed());
    }
    for item in &report.items {
        let state = match item.state {
            VisualState::Normal => item.state.as_str().to_string(),
            VisualState::Dimmed => item.state.as_str().yellow().to_string(),
            VisualState::Hidden => item.state.as_str().red().to_string(),
        };
        println!("  {:<14} {:<8} {}", item.id.yellow(), state, item.container_tag.dimmed());
    }
    for id in &report.orphans {
        println!("  {:<14} {}", id.yellow(), "no container".dimmed());
    }
    println!();

    println!("Record cache:  {} records", report.cached_records);
    println!(
        "Transport:     {} fetches ({} ids)",
        report.fetch_calls, report.fetched_ids
    );
    println!(
        "Query cache:   {} hits, {} misses ({} hit rate)",
        report.queries.hits,
        report.queries.misses,
        util::format_percent(report.queries.hit_rate())
    );

    print!("Containers:    ");
    match &report.container_health {
        Some(health) => {
            let verdict = if health.is_healthy {
                "healthy".green().to_string()
            } else {
                "unhealthy".red().to_string()
            };
            println!(
                "{} ({} of {} lookups, {} via fallback)",
                verdict, health.successes, health.queries, health.fallback_hits
            );
            if let Some(selector) = &health.last_selector {
                println!("  Last:        {}", selector.dimmed());
            }
        }
        None => println!("{}", "no lookups".dimmed()),
    }

    if !report.maintenance.is_clean() {
        println!(
            "Maintenance:   {} repairs, {} pruned entries",
            report.maintenance.repairs.len(),
            report.maintenance.pruned_nodes
        );
    }
}
