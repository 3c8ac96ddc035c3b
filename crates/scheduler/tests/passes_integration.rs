//! Integration tests for recomputation passes
//!
//! Exercises the scheduler end to end over a shared tree, with a gated
//! transport to force overlapping passes.

mod common;

use common::{record, Harness};
use veil_core::{TransportError, VisualState};
use veil_scheduler::PassOutcome;
use veil_watcher::IntersectionEntry;

#[tokio::test]
async fn test_first_pass_scans_everything_then_goes_lazy() {
    let h = Harness::new([
        record("aaa", VisualState::Hidden, 100),
        record("bbb", VisualState::Dimmed, 100),
        record("ddd", VisualState::Hidden, 100),
    ]);
    let (a, _) = h.add_item("aaa");
    let (b, _) = h.add_item("bbb");
    let (c, _) = h.add_item("ccc");
    assert!(h.scheduler.is_initial_load());

    let PassOutcome::Applied(report) = h.scheduler.run_pass().await else {
        panic!("first pass should apply");
    };
    assert_eq!(report.candidates, 3);
    assert_eq!((report.hidden, report.dimmed, report.normal), (1, 1, 1));
    assert_eq!(h.state_of(a), VisualState::Hidden);
    assert_eq!(h.state_of(b), VisualState::Dimmed);
    assert_eq!(h.state_of(c), VisualState::Normal);
    assert!(!h.scheduler.is_initial_load());

    // New item off screen: lazy passes ignore it
    let (d, _) = h.add_item("ddd");
    assert!(h.scheduler.handle_mutations().needs_pass);
    assert_eq!(h.scheduler.run_pass().await, PassOutcome::Empty);
    assert_eq!(h.state_of(d), VisualState::Normal);

    // Once it scrolls in, it is processed
    assert!(h.scheduler.handle_intersections(&[IntersectionEntry::new(d, true, 0.8)]));
    let PassOutcome::Applied(report) = h.scheduler.run_pass().await else {
        panic!("visible pass should apply");
    };
    assert_eq!(report.candidates, 1);
    assert_eq!(h.state_of(d), VisualState::Hidden);
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_older_pass_resolving_late_leaves_tree_alone() {
    let h = Harness::new([
        record("aaa", VisualState::Hidden, 100),
        record("bbb", VisualState::Hidden, 100),
    ]);
    h.add_item("x0");
    assert!(h.scheduler.run_pass().await.is_applied());

    let (a, _) = h.add_item("aaa");
    let (b, _) = h.add_item("bbb");
    h.scheduler.handle_mutations();

    // Pass A: only "aaa" is on screen; its fetch is held open
    h.scheduler.handle_intersections(&[IntersectionEntry::new(a, true, 1.0)]);
    let gate_a = h.transport.gate_next();
    let scheduler = h.scheduler.clone();
    let pass_a = tokio::spawn(async move { scheduler.run_pass().await });
    h.wait_for_calls(2).await;

    // Pass B starts before A resolves; "bbb" is now the only visible item
    h.scheduler.handle_intersections(&[
        IntersectionEntry::new(a, false, 0.0),
        IntersectionEntry::new(b, true, 1.0),
    ]);
    let gate_b = h.transport.gate_next();
    let scheduler = h.scheduler.clone();
    let pass_b = tokio::spawn(async move { scheduler.run_pass().await });
    h.wait_for_calls(3).await;

    gate_a.send(()).unwrap();
    assert_eq!(pass_a.await.unwrap(), PassOutcome::Stale { token: 2, current: 3 });
    assert!(h.classes_of(a).is_empty());
    // The superseded fetch still populated the cache
    assert_eq!(h.scheduler.records().get("aaa").unwrap().state, VisualState::Hidden);

    gate_b.send(()).unwrap();
    assert!(pass_b.await.unwrap().is_applied());
    assert_eq!(h.state_of(b), VisualState::Hidden);
    assert!(h.classes_of(a).is_empty());
    assert_eq!(
        h.transport.requests()[1..],
        [vec!["aaa".to_string()], vec!["bbb".to_string()]]
    );
}

#[tokio::test]
async fn test_overlapping_passes_share_one_fetch() {
    let h = Harness::new([record("aaa", VisualState::Dimmed, 100)]);
    let (a, _) = h.add_item("aaa");

    let gate = h.transport.gate_next();
    let scheduler = h.scheduler.clone();
    let first = tokio::spawn(async move { scheduler.run_pass().await });
    h.wait_for_calls(1).await;

    let scheduler = h.scheduler.clone();
    let second = tokio::spawn(async move { scheduler.run_pass().await });
    h.wait_for_token(2).await;
    assert_eq!(h.scheduler.records().pending_len(), 1);

    gate.send(()).unwrap();
    assert_eq!(first.await.unwrap(), PassOutcome::Stale { token: 1, current: 2 });
    assert!(second.await.unwrap().is_applied());

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.state_of(a), VisualState::Dimmed);
    assert_eq!(h.scheduler.records().pending_len(), 0);
}

#[tokio::test]
async fn test_fetch_failure_aborts_without_mutation() {
    let h = Harness::new([record("aaa", VisualState::Hidden, 100)]);
    let (a, _) = h.add_item("aaa");
    h.transport.inner.set_available(false);

    let outcome = h.scheduler.run_pass().await;
    assert!(matches!(outcome, PassOutcome::Aborted(TransportError::Unavailable(_))));
    assert!(h.classes_of(a).is_empty());
    assert!(h.scheduler.is_initial_load());
    assert_eq!(h.scheduler.records().pending_len(), 0);

    h.transport.inner.set_available(true);
    assert!(h.scheduler.run_pass().await.is_applied());
    assert_eq!(h.state_of(a), VisualState::Hidden);
}

#[tokio::test]
async fn test_individual_mode_off_strips_classes() {
    let h = Harness::new([
        record("aaa", VisualState::Hidden, 100),
        record("bbb", VisualState::Dimmed, 100),
    ]);
    let (a, _) = h.add_item("aaa");
    let (b, _) = h.add_item("bbb");
    assert!(h.scheduler.run_pass().await.is_applied());

    h.scheduler.set_individual_mode(false);
    assert_eq!(h.scheduler.run_pass().await, PassOutcome::Reset { stripped: 2 });
    assert_eq!(h.state_of(a), VisualState::Normal);
    assert_eq!(h.state_of(b), VisualState::Normal);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_lazy_processing_off_always_scans() {
    let mut config = veil_core::VeilConfig::default();
    config.scheduler.lazy_processing = false;
    let h = Harness::with_config(config, [record("bbb", VisualState::Hidden, 100)]);
    h.add_item("aaa");
    assert!(h.scheduler.run_pass().await.is_applied());

    let (b, _) = h.add_item("bbb");
    h.scheduler.handle_mutations();
    assert!(h.scheduler.run_pass().await.is_applied());
    assert_eq!(h.state_of(b), VisualState::Hidden);
}

#[tokio::test]
async fn test_navigation_supersedes_and_rearms_full_scan() {
    let h = Harness::new([
        record("aaa", VisualState::Hidden, 100),
        record("bbb", VisualState::Hidden, 100),
    ]);
    h.add_item("x0");
    assert!(h.scheduler.run_pass().await.is_applied());

    let (a, _) = h.add_item("aaa");
    let (b, _) = h.add_item("bbb");
    h.scheduler.handle_mutations();
    h.scheduler.handle_intersections(&[IntersectionEntry::new(a, true, 1.0)]);

    let gate = h.transport.gate_next();
    let scheduler = h.scheduler.clone();
    let pass = tokio::spawn(async move { scheduler.run_pass().await });
    h.wait_for_calls(2).await;

    h.scheduler.on_navigation();
    assert!(h.scheduler.is_initial_load());
    assert_eq!(h.scheduler.visibility().count(), 0);

    gate.send(()).unwrap();
    assert!(matches!(pass.await.unwrap(), PassOutcome::Stale { .. }));
    assert!(h.classes_of(a).is_empty());

    // Full scan again, regardless of visibility
    let PassOutcome::Applied(report) = h.scheduler.run_pass().await else {
        panic!("post-navigation pass should apply");
    };
    assert_eq!(report.candidates, 3);
    assert_eq!(h.state_of(a), VisualState::Hidden);
    assert_eq!(h.state_of(b), VisualState::Hidden);
}

#[tokio::test]
async fn test_set_state_persists_then_applies() {
    let h = Harness::new([]);
    let (a, _) = h.add_item("aaa");
    assert!(h.scheduler.run_pass().await.is_applied());
    assert_eq!(h.state_of(a), VisualState::Normal);

    h.scheduler.handle_intersections(&[IntersectionEntry::new(a, true, 1.0)]);
    h.clock.advance(500);
    let outcome = h
        .scheduler
        .set_state("aaa", VisualState::Dimmed, Some("Some video"))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(h.state_of(a), VisualState::Dimmed);

    let stored = h.transport.inner.record("aaa").unwrap();
    assert_eq!(stored.updated_at, Some(1_500));
    assert_eq!(stored.title.as_deref(), Some("Some video"));

    h.scheduler.set_state("aaa", VisualState::Normal, None).await.unwrap();
    assert_eq!(h.state_of(a), VisualState::Normal);
}

#[tokio::test]
async fn test_removed_items_are_invalidated_and_pruned() {
    let h = Harness::new([record("aaa", VisualState::Hidden, 100)]);
    let (a, _) = h.add_item("aaa");
    assert!(h.scheduler.run_pass().await.is_applied());
    assert!(h.scheduler.queries().node_entries() > 0);

    h.scheduler.handle_mutations();
    h.tree.lock().remove(a);
    let outcome = h.scheduler.handle_mutations();
    assert!(outcome.needs_pass);
    assert_eq!(outcome.removed, 1);
    assert_eq!(h.scheduler.queries().node_entries(), 0);

    assert_eq!(h.scheduler.run_pass().await, PassOutcome::Empty);
    assert!(h.scheduler.maintenance().tick().is_clean());
}

#[tokio::test]
async fn test_visible_container_filled_in_later_is_processed() {
    let h = Harness::new([record("aaa", VisualState::Hidden, 100)]);
    h.add_item("x0");
    assert!(h.scheduler.run_pass().await.is_applied());

    // An empty container scrolls in before its contents load
    let container = {
        let mut tree = h.tree.lock();
        let root = tree.root();
        let container = tree.create_element("ytd-rich-item-renderer");
        tree.append_child(root, container);
        container
    };
    h.scheduler.handle_mutations();
    h.scheduler.handle_intersections(&[IntersectionEntry::new(container, true, 1.0)]);
    assert_eq!(h.scheduler.run_pass().await, PassOutcome::Empty);

    {
        let mut tree = h.tree.lock();
        let link = tree.create_element("a");
        tree.set_attribute(link, "href", "/watch?v=aaa");
        tree.append_child(container, link);
    }
    assert!(h.scheduler.handle_mutations().needs_pass);

    let PassOutcome::Applied(report) = h.scheduler.run_pass().await else {
        panic!("pass after the link arrives should apply");
    };
    assert_eq!(report.candidates, 1);
    assert_eq!(h.state_of(container), VisualState::Hidden);
}
