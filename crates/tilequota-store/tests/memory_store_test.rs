//! Integration tests for the in-memory quota store.

mod helpers;

use std::collections::BTreeSet;

use tilequota_core::error::ErrorKind;
use tilequota_core::types::{Quota, QuotaDelta};
use tilequota_entity::policy::{Lfu, Lru};
use tilequota_entity::stats::PageStatsPayload;
use tilequota_entity::tileset::TileSet;
use tilequota_store::QuotaStore;

use helpers::{GRIDSET, MemoryContext, PNG, page, tile_set};

fn layers(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn minutes(m: i64) -> i64 {
    m * 60_000
}

#[tokio::test]
async fn test_frequency_blending_scenario() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.store.start_up().await.unwrap();

    let p = page("roads", 0, 0, 0);
    ctx.store
        .add_to_quota_and_tile_counts(
            &tile_set("roads"),
            QuotaDelta::from(4096i64),
            vec![PageStatsPayload::tiles(p.clone(), 1)],
        )
        .await
        .unwrap();

    let first = ctx
        .store
        .add_hits_and_set_access_time(vec![PageStatsPayload::hits(p.clone(), 100, minutes(10))])
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].frequency_of_use_per_minute(), 100.0);
    assert_eq!(first[0].last_access_time_minutes, 10);

    ctx.clock.advance_minutes(2);
    let second = ctx
        .store
        .add_hits_and_set_access_time(vec![PageStatsPayload::hits(p.clone(), 10, minutes(12))])
        .await
        .unwrap();
    let stats = &second[0];
    assert_eq!(stats.frequency_of_use_per_minute(), 52.5);
    assert_eq!(stats.last_access_time_minutes, 12);
    assert_eq!(stats.num_hits, 110);
    assert_eq!(stats.fill_factor, 1.0);

    let stored = ctx.store.get_page_stats(&p).await.unwrap().unwrap();
    assert_eq!(&stored, stats);
}

#[tokio::test]
async fn test_quota_updates_are_reversible() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.store.start_up().await.unwrap();
    let roads = tile_set("roads");

    ctx.store
        .add_to_quota_and_tile_counts(&roads, QuotaDelta::from(1000i64), Vec::new())
        .await
        .unwrap();
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 1000);
    assert_eq!(
        ctx.store.get_used_quota_by_tile_set_id(&roads.id()).await.unwrap().bytes(),
        1000
    );

    ctx.store
        .add_to_quota_and_tile_counts(&roads, QuotaDelta::from(-1000i64), Vec::new())
        .await
        .unwrap();
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap(), Quota::ZERO);
    assert_eq!(ctx.store.get_used_quota_by_layer_name("roads").await.unwrap(), Quota::ZERO);
}

#[tokio::test]
async fn test_negative_counters_clamp_and_heal_on_start_up() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.catalog.add_simple_layer("rivers");
    ctx.store.start_up().await.unwrap();

    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("roads"), QuotaDelta::from(100i64), Vec::new())
        .await
        .unwrap();
    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("rivers"), QuotaDelta::from(50i64), Vec::new())
        .await
        .unwrap();
    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("roads"), QuotaDelta::from(-500i64), Vec::new())
        .await
        .unwrap();

    assert_eq!(ctx.store.get_used_quota_by_layer_name("roads").await.unwrap(), Quota::ZERO);
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 50);

    ctx.store.start_up().await.unwrap();
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 50);
}

#[tokio::test]
async fn test_global_equals_sum_of_tile_sets_after_clamp() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.catalog.add_simple_layer("rivers");
    ctx.store.start_up().await.unwrap();

    for (layer, bytes) in [("roads", 10i64), ("rivers", 100), ("roads", -20)] {
        ctx.store
            .add_to_quota_and_tile_counts(&tile_set(layer), QuotaDelta::from(bytes), Vec::new())
            .await
            .unwrap();
    }

    let roads = ctx.store.get_used_quota_by_layer_name("roads").await.unwrap();
    let rivers = ctx.store.get_used_quota_by_layer_name("rivers").await.unwrap();
    assert_eq!(roads, Quota::ZERO);
    assert_eq!(rivers.bytes(), 100);
    assert_eq!(
        ctx.store.get_globally_used_quota().await.unwrap(),
        roads.add(rivers)
    );
}

#[tokio::test]
async fn test_unknown_tile_set_is_created_on_update() {
    let ctx = MemoryContext::new();
    let ad_hoc = TileSet::new("adhoc", GRIDSET, PNG, Some("style=dark".into()));

    let err = ctx.store.get_tile_set_by_id(&ad_hoc.id()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(
        ctx.store.get_used_quota_by_tile_set_id(&ad_hoc.id()).await.unwrap(),
        Quota::ZERO
    );

    ctx.store
        .add_to_quota_and_tile_counts(&ad_hoc, QuotaDelta::from(10i64), Vec::new())
        .await
        .unwrap();
    assert_eq!(ctx.store.get_tile_set_by_id(&ad_hoc.id()).await.unwrap(), ad_hoc);
    assert!(ctx.store.get_tile_sets().await.unwrap().contains(&ad_hoc));
}

#[tokio::test]
async fn test_hits_for_untracked_tile_sets_are_skipped() {
    let ctx = MemoryContext::new();
    let p = page("nowhere", 0, 0, 0);

    let stats = ctx
        .store
        .add_hits_and_set_access_time(vec![PageStatsPayload::hits(p.clone(), 5, 0)])
        .await
        .unwrap();
    assert!(stats.is_empty());
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());
}

#[tokio::test]
async fn test_late_hits_do_not_resurrect_truncated_pages() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.store.start_up().await.unwrap();
    let p = page("roads", 0, 0, 0);

    ctx.store
        .add_to_quota_and_tile_counts(
            &tile_set("roads"),
            QuotaDelta::from(4096i64),
            vec![PageStatsPayload::tiles(p.clone(), 1)],
        )
        .await
        .unwrap();
    assert!(ctx.store.set_truncated(&p).await.unwrap().is_some());

    let stats = ctx
        .store
        .add_hits_and_set_access_time(vec![PageStatsPayload::hits(p.clone(), 3, 0)])
        .await
        .unwrap();
    assert!(stats.is_empty());
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());

    let never_stored = page("roads", 8, 8, 3);
    ctx.store
        .add_hits_and_set_access_time(vec![PageStatsPayload::hits(never_stored.clone(), 1, 0)])
        .await
        .unwrap();
    assert!(ctx.store.get_page_stats(&never_stored).await.unwrap().is_none());
}

#[tokio::test]
async fn test_page_is_dropped_when_its_last_tile_goes() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.store.start_up().await.unwrap();
    let roads = tile_set("roads");
    let p = page("roads", 3, 3, 3);

    ctx.store
        .add_to_quota_and_tile_counts(
            &roads,
            QuotaDelta::from(200i64),
            vec![PageStatsPayload::tiles(p.clone(), 2)],
        )
        .await
        .unwrap();
    let stats = ctx.store.get_page_stats(&p).await.unwrap().unwrap();
    assert_eq!(stats.tile_count, 2);
    assert_eq!(stats.fill_factor, 2.0 / 64.0);

    ctx.store
        .add_to_quota_and_tile_counts(
            &roads,
            QuotaDelta::from(-200i64),
            vec![PageStatsPayload::tiles(p.clone(), -2)],
        )
        .await
        .unwrap();
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());

    // A removal for a page that was never stored does not create it.
    ctx.store
        .add_to_quota_and_tile_counts(&roads, QuotaDelta::ZERO, vec![PageStatsPayload::tiles(p.clone(), -1)])
        .await
        .unwrap();
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());
}

#[tokio::test]
async fn test_candidates_follow_policy_and_skip_empty_pages() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.store.start_up().await.unwrap();
    let roads = tile_set("roads");

    let a = page("roads", 0, 0, 3);
    let b = page("roads", 8, 0, 3);
    let c = page("roads", 0, 8, 3);
    let empty = page("roads", 8, 8, 3);
    ctx.store
        .add_to_quota_and_tile_counts(
            &roads,
            QuotaDelta::from(300i64),
            vec![
                PageStatsPayload::tiles(a.clone(), 1),
                PageStatsPayload::tiles(b.clone(), 1),
                PageStatsPayload::tiles(c.clone(), 1),
            ],
        )
        .await
        .unwrap();

    for (p, hits, minute) in [(&a, 1000, 1000), (&b, 10, 100), (&c, 100, 500), (&empty, 1, 11)] {
        ctx.clock.set_millis(minutes(minute));
        ctx.store
            .add_hits_and_set_access_time(vec![PageStatsPayload::hits(p.clone(), hits, minutes(minute))])
            .await
            .unwrap();
    }

    let lfu = ctx.store.find_page_to_expire(&Lfu, &layers(&["roads"])).await.unwrap().unwrap();
    assert_eq!(lfu.page, b);
    assert_eq!(
        ctx.store.get_least_frequently_used_page(&layers(&["roads"])).await.unwrap().unwrap().page,
        b
    );

    let lru = ctx.store.get_least_recently_used_page(&layers(&["roads"])).await.unwrap().unwrap();
    assert_eq!(lru.page, b);
    assert_eq!(lru.last_access_time_minutes, 100);

    assert!(ctx.store.find_page_to_expire(&Lru, &layers(&["rivers"])).await.unwrap().is_none());

    let removed = ctx.store.set_truncated(&b).await.unwrap().unwrap();
    assert_eq!(removed.num_hits, 10);
    let next = ctx.store.find_page_to_expire(&Lfu, &layers(&["roads"])).await.unwrap().unwrap();
    assert_eq!(next.page, c);
    assert!(ctx.store.set_truncated(&b).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_layer_cascades_and_is_idempotent() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.catalog.add_simple_layer("rivers");
    ctx.store.start_up().await.unwrap();
    let p = page("roads", 0, 0, 0);

    ctx.store
        .add_to_quota_and_tile_counts(
            &tile_set("roads"),
            QuotaDelta::from(1000i64),
            vec![PageStatsPayload::tiles(p.clone(), 1)],
        )
        .await
        .unwrap();
    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("rivers"), QuotaDelta::from(500i64), Vec::new())
        .await
        .unwrap();

    let freed = ctx.store.delete_layer("roads").await.unwrap();
    assert_eq!(freed.bytes(), 1000);
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 500);
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());
    assert_eq!(
        ctx.store.get_tile_sets().await.unwrap(),
        BTreeSet::from([tile_set("rivers")])
    );

    assert_eq!(ctx.store.delete_layer("roads").await.unwrap(), Quota::ZERO);
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 500);
}

#[tokio::test]
async fn test_delete_gridset_and_parameters() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_layer(
        "multi",
        &[GRIDSET, "EPSG:900913"],
        &[PNG],
        &["a", "b"],
        helpers::default_coverages(),
    );
    ctx.store.start_up().await.unwrap();

    let tile_sets = ctx.store.get_tile_sets().await.unwrap();
    assert_eq!(tile_sets.len(), 4);
    for ts in &tile_sets {
        ctx.store
            .add_to_quota_and_tile_counts(ts, QuotaDelta::from(100i64), Vec::new())
            .await
            .unwrap();
    }

    let freed = ctx.store.delete_gridset("multi", "EPSG:900913").await.unwrap();
    assert_eq!(freed.bytes(), 200);
    let freed = ctx.store.delete_parameters("multi", "a").await.unwrap();
    assert_eq!(freed.bytes(), 100);

    let remaining = ctx.store.get_tile_sets().await.unwrap();
    assert_eq!(
        remaining,
        BTreeSet::from([TileSet::new("multi", GRIDSET, PNG, Some("b".into()))])
    );
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 100);
}

#[tokio::test]
async fn test_start_up_reconciles_with_catalog() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.catalog.add_simple_layer("rivers");
    ctx.store.start_up().await.unwrap();

    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("roads"), QuotaDelta::from(1000i64), Vec::new())
        .await
        .unwrap();
    ctx.store
        .add_to_quota_and_tile_counts(&tile_set("rivers"), QuotaDelta::from(500i64), Vec::new())
        .await
        .unwrap();
    let unconfigured = TileSet::new("roads", "EPSG:3857", PNG, None);
    ctx.store
        .add_to_quota_and_tile_counts(&unconfigured, QuotaDelta::from(300i64), Vec::new())
        .await
        .unwrap();
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 1800);

    ctx.catalog.remove_layer("rivers");
    ctx.store.start_up().await.unwrap();
    let after_first = ctx.store.get_tile_sets().await.unwrap();
    assert_eq!(after_first, BTreeSet::from([tile_set("roads")]));
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 1000);

    ctx.store.start_up().await.unwrap();
    assert_eq!(ctx.store.get_tile_sets().await.unwrap(), after_first);
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 1000);
}

#[tokio::test]
async fn test_create_layer_registers_tile_sets() {
    let ctx = MemoryContext::new();
    ctx.store.start_up().await.unwrap();
    ctx.catalog.add_layer("late", &[GRIDSET], &[PNG, "image/jpeg"], &[], helpers::default_coverages());

    ctx.store.create_layer("late").await.unwrap();
    assert_eq!(ctx.store.get_tile_sets().await.unwrap().len(), 2);
    assert_eq!(ctx.store.get_used_quota_by_layer_name("late").await.unwrap(), Quota::ZERO);
}

#[tokio::test]
async fn test_rename_layer_moves_counters_and_pages() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    ctx.catalog.add_simple_layer("rivers");
    ctx.store.start_up().await.unwrap();
    let p = page("roads", 0, 0, 0);

    ctx.store
        .add_to_quota_and_tile_counts(
            &tile_set("roads"),
            QuotaDelta::from(700i64),
            vec![PageStatsPayload::tiles(p.clone(), 1)],
        )
        .await
        .unwrap();

    let err = ctx.store.rename_layer("roads", "rivers").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    ctx.store.rename_layer("roads", "streets").await.unwrap();
    assert_eq!(ctx.store.get_used_quota_by_layer_name("roads").await.unwrap(), Quota::ZERO);
    assert_eq!(ctx.store.get_used_quota_by_layer_name("streets").await.unwrap().bytes(), 700);
    assert_eq!(ctx.store.get_globally_used_quota().await.unwrap().bytes(), 700);

    let moved = page("streets", 0, 0, 0);
    assert!(ctx.store.get_page_stats(&p).await.unwrap().is_none());
    let stats = ctx.store.get_page_stats(&moved).await.unwrap().unwrap();
    assert_eq!(stats.page, moved);
    assert_eq!(stats.tile_count, 1);
}

#[tokio::test]
async fn test_page_tile_range_for_truncation() {
    let ctx = MemoryContext::new();
    ctx.catalog.add_simple_layer("roads");
    let range = ctx
        .store
        .get_tiles_for_page(&page("roads", 9, 2, 3))
        .await
        .unwrap();
    assert_eq!(range.layer_name, "roads");
    assert_eq!((range.bounds.min_x, range.bounds.min_y), (8, 0));
    assert_eq!((range.bounds.max_x, range.bounds.max_y), (15, 7));
    assert_eq!(range.tile_count(), 64);
}
