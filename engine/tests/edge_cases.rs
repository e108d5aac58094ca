//! Edge case tests for listsync-engine
//!
//! These tests cover boundary conditions, unusual inputs and the mapping
//! properties every position set must satisfy.

use listsync_engine::{
    diff, map_changes, ChangeEvent, ChangeKind, ChangeSetMapper, Entity, EntityPayload, Filter,
    Query, SortKey, Store, StoreSnapshot, WriteBatch, WriteOp,
};
use proptest::prelude::*;
use serde_json::json;

fn channel(id: &str, version: u64) -> Entity {
    Entity::from_payload(
        "channels",
        EntityPayload::new(id, json!({"name": id, "version": version})),
        1000,
    )
}

fn upsert(id: &str, attrs: serde_json::Value) -> WriteOp {
    WriteOp::Upsert {
        collection: "channels".into(),
        payload: EntityPayload::new(id, attrs),
    }
}

// ============================================================================
// Mapping Edge Cases
// ============================================================================

#[test]
fn example_scenario_insert_front_remove_middle() {
    let previous: Vec<_> = ["A", "B", "C"].iter().map(|id| channel(id, 1)).collect();
    let current: Vec<_> = ["D", "A", "C"].iter().map(|id| channel(id, 1)).collect();

    let changes = diff(&previous, &current);
    let set = map_changes(previous.len(), current.len(), &changes).unwrap();

    assert_eq!(set.insert.iter().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(set.remove.iter().copied().collect::<Vec<_>>(), vec![1]);
    assert!(set.update.is_empty());
    assert!(set.moves.is_empty());
}

#[test]
fn clearing_a_list() {
    let previous: Vec<_> = (0..5).map(|i| channel(&format!("c{i}"), 1)).collect();
    let changes = diff(&previous, &[]);
    let set = map_changes(5, 0, &changes).unwrap();
    assert_eq!(set.remove.len(), 5);
    assert!(set.insert.is_empty());
}

#[test]
fn replacing_the_only_item_needs_reload() {
    let changes = diff(&[channel("a", 1)], &[channel("b", 1)]);
    assert_eq!(changes.len(), 2);
    assert_eq!(map_changes(1, 1, &changes), None);
}

#[test]
fn reversed_list_is_all_moves() {
    let previous: Vec<_> = (0..4).map(|i| channel(&format!("c{i}"), 1)).collect();
    let mut current = previous.clone();
    current.reverse();

    let changes = diff(&previous, &current);
    assert!(changes.iter().all(|c| c.kind == ChangeKind::Move));
    let set = map_changes(4, 4, &changes).unwrap();
    assert_eq!(set.moves.len(), 3);
}

#[test]
fn mapper_on_empty_snapshots() {
    let mapper = ChangeSetMapper::new(0, 0);
    assert!(mapper.map(&[]).unwrap().is_empty());
    assert_eq!(mapper.map(&[ChangeEvent::update(channel("a", 1), 0)]), None);
}

// ============================================================================
// Store Edge Cases
// ============================================================================

#[test]
fn unicode_ids_and_attributes() {
    let mut store = Store::new();
    let names = ["日本語テスト", "Привет мир", "🎉🚀💯", "Hello\nWorld\tTab"];

    let batch: WriteBatch = names.iter().map(|n| upsert(n, json!({"name": n}))).collect();
    store.apply(batch, 1000).unwrap();

    for name in names {
        let entity = store.get("channels", name).unwrap();
        assert_eq!(entity.attributes["name"], json!(name));
    }
}

#[test]
fn empty_batch_still_commits() {
    let mut store = Store::new();
    let summary = store.apply(WriteBatch::new(), 1000).unwrap();
    assert_eq!(summary.revision, 1);
    assert!(summary.collections.is_empty());
}

#[test]
fn upsert_then_remove_in_one_batch() {
    let mut store = Store::new();
    let batch = WriteBatch::new()
        .with(upsert("a", json!({})))
        .with(WriteOp::Remove {
            collection: "channels".into(),
            id: "a".into(),
        });
    store.apply(batch, 1000).unwrap();
    assert!(store.get("channels", "a").is_none());
}

#[test]
fn fetch_unknown_collection_is_empty() {
    let store = Store::new();
    let query = Query::new("messages").filter(Filter::eq("cid", "c1"));
    assert!(store.fetch(&query.linked_fetch()).is_empty());
}

#[test]
fn snapshot_roundtrip_preserves_fetch_order() {
    let query = Query::new("channels").sort_by(SortKey::desc("rank"));
    let key = query.key();
    let mut store = Store::new();
    let mut batch = WriteBatch::new();
    for (id, rank) in [("a", 1), ("b", 3), ("c", 2)] {
        batch.push(upsert(id, json!({"rank": rank})));
        batch.push(WriteOp::Link {
            collection: "channels".into(),
            id: id.into(),
            key: key.clone(),
        });
    }
    store.apply(batch, 1000).unwrap();

    let json = store.export_state().to_json().unwrap();
    let restored = Store::from_snapshot(StoreSnapshot::from_json(&json).unwrap()).unwrap();

    let ids = |s: &Store| -> Vec<String> {
        s.fetch(&query.linked_fetch()).into_iter().map(|e| e.id).collect()
    };
    assert_eq!(ids(&restored), vec!["b", "c", "a"]);
    assert_eq!(ids(&restored), ids(&store));
}

// ============================================================================
// Properties
// ============================================================================

/// A snapshot drawn from a small id pool, each id with a content version.
fn arb_snapshot() -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec((0u8..12, 0u64..3), 0..10).prop_map(|entries| {
        let mut seen = std::collections::HashSet::new();
        entries
            .into_iter()
            .filter(|(id, _)| seen.insert(*id))
            .map(|(id, version)| channel(&format!("c{id}"), version))
            .collect()
    })
}

fn arb_change() -> impl Strategy<Value = ChangeEvent> {
    (0u8..4, 0usize..8, 0usize..8).prop_map(|(kind, index, to)| {
        let item = channel("x", 0);
        match kind {
            0 => ChangeEvent::insert(item, index),
            1 => ChangeEvent::remove(item, index),
            2 => ChangeEvent::update(item, index),
            _ => ChangeEvent::moved(item, index, to),
        }
    })
}

proptest! {
    #[test]
    fn prop_mapped_sets_are_disjoint(
        previous_len in 0usize..8,
        current_len in 0usize..8,
        changes in prop::collection::vec(arb_change(), 0..8),
    ) {
        if let Some(set) = map_changes(previous_len, current_len, &changes) {
            prop_assert!(set.insert.is_disjoint(&set.remove));
            prop_assert!(set.insert.is_disjoint(&set.update));
            prop_assert!(set.remove.is_disjoint(&set.update));
            prop_assert!(set.moves.iter().all(|m| !set.insert.contains(&m.to)));
        }
    }

    #[test]
    fn prop_diff_maps_consistently(previous in arb_snapshot(), current in arb_snapshot()) {
        let changes = diff(&previous, &current);
        if let Some(set) = map_changes(previous.len(), current.len(), &changes) {
            prop_assert!(set.is_disjoint());
            prop_assert_eq!(
                previous.len() - set.remove.len() + set.insert.len(),
                current.len()
            );
        }
    }

    #[test]
    fn prop_move_from_outside_previous_is_rejected(
        previous_len in 0usize..8,
        current_len in 1usize..8,
        overshoot in 0usize..4,
        to in 0usize..8,
        mut changes in prop::collection::vec(arb_change(), 0..6),
    ) {
        let from = previous_len + overshoot;
        changes.push(ChangeEvent::moved(channel("m", 0), from, to % current_len));
        prop_assert_eq!(map_changes(previous_len, current_len, &changes), None);
    }
}
