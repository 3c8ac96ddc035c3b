//! Cache performance benchmarks for veil-cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use veil_cache::{QueryCache, RecordCache};
use veil_core::config::QueryCacheConfig;
use veil_core::{ManualClock, NodeTree, VideoStateRecord, VisualState};

fn feed(items: usize) -> NodeTree {
    let mut tree = NodeTree::new("ytd-app");
    let grid = tree.create_element("ytd-rich-grid-renderer");
    tree.append_child(tree.root(), grid);
    for i in 0..items {
        let item = tree.create_element("ytd-rich-item-renderer");
        tree.append_child(grid, item);
        let link = tree.create_element("a");
        tree.set_attribute(link, "href", &format!("/watch?v=vid{i:06}"));
        tree.append_child(item, link);
    }
    tree
}

fn bench_record_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_cache");

    for capacity in [100usize, 1000] {
        group.bench_with_input(BenchmarkId::new("apply_update_with_eviction", capacity), &capacity, |b, &capacity| {
            let clock = Arc::new(ManualClock::new(1));
            let cache = RecordCache::new(capacity, clock.clone());
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                clock.advance(1);
                let id = format!("vid{}", i % (capacity as u64 * 2));
                cache.apply_update(&id, Some(VideoStateRecord::new(id.clone(), VisualState::Dimmed, i)));
            });
        });
    }

    group.bench_function("get_hot_set", |b| {
        let clock = Arc::new(ManualClock::new(1));
        let cache = RecordCache::new(1000, clock);
        for i in 0..1000 {
            let id = format!("vid{i}");
            cache.apply_update(&id, Some(VideoStateRecord::new(id.clone(), VisualState::Hidden, 1)));
        }
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        b.iter(|| {
            let id = format!("vid{}", rng.gen_range(0..1000));
            black_box(cache.get(&id))
        });
    });

    group.finish();
}

fn bench_query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache");
    let tree = feed(500);

    group.bench_function("tree_query_hit", |b| {
        let clock = Arc::new(ManualClock::new(1));
        let cache = QueryCache::new(&QueryCacheConfig::default(), clock);
        cache.tree_query(&tree, "ytd-rich-item-renderer", None);
        b.iter(|| black_box(cache.tree_query(&tree, "ytd-rich-item-renderer", None)));
    });

    group.bench_function("tree_query_miss", |b| {
        let clock = Arc::new(ManualClock::new(1));
        let cache = QueryCache::new(&QueryCacheConfig::default(), clock.clone());
        b.iter(|| {
            // Every call lands past the default TTL
            clock.advance(2_000);
            black_box(cache.tree_query(&tree, r#"a[href*="watch?v="]"#, None))
        });
    });

    group.bench_function("closest_match_cached", |b| {
        let clock = Arc::new(ManualClock::new(1));
        let cache = QueryCache::new(&QueryCacheConfig::default(), clock);
        let links = tree.query_document(&veil_core::Selector::parse("a").unwrap());
        b.iter(|| {
            for &link in &links {
                black_box(cache.closest_match(&tree, link, "ytd-rich-item-renderer"));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_record_cache, bench_query_cache);
criterion_main!(benches);
