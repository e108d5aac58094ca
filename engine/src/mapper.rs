//! Mapping change batches onto list positions.
//!
//! Positional change notifications coalesced between two observation ticks
//! can overlap or point at stale indices. Rather than guess, the mapper
//! refuses such batches and the caller reloads the list.
//!
//! # Algorithm
//!
//! 1. Partition the batch by change kind
//! 2. Validate every move against both snapshot bounds
//! 3. Collect insert, remove and update indices
//! 4. Reject any index shared by two of those sets
//! 5. Return the assembled [`PositionSet`]

use crate::{ChangeEvent, ChangeKind, Move, PositionSet};
use std::collections::BTreeSet;

/// Turns a batch of [`ChangeEvent`]s into a [`PositionSet`] for a list that
/// held `previous_len` items before the batch and `current_len` after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSetMapper {
    previous_len: usize,
    current_len: usize,
}

impl ChangeSetMapper {
    pub fn new(previous_len: usize, current_len: usize) -> Self {
        Self {
            previous_len,
            current_len,
        }
    }

    /// Map a change batch, or `None` when it cannot be expressed as
    /// incremental positions and the list must be reloaded.
    pub fn map(&self, changes: &[ChangeEvent]) -> Option<PositionSet> {
        let mut inserts = Vec::new();
        let mut removes = Vec::new();
        let mut updates = Vec::new();
        let mut moves = Vec::new();
        for change in changes {
            match change.kind {
                ChangeKind::Insert => inserts.push(change),
                ChangeKind::Remove => removes.push(change),
                ChangeKind::Update => updates.push(change),
                ChangeKind::Move => moves.push(change),
            }
        }

        let mut set = PositionSet::default();
        let mut sources = BTreeSet::new();
        let mut targets = BTreeSet::new();

        for change in moves {
            let from = change.index;
            let to = change.new_index?;
            if from >= self.previous_len || to >= self.current_len {
                return None;
            }
            // Two moves from one slot, or into one slot, conflict.
            if !sources.insert(from) || !targets.insert(to) {
                return None;
            }
            set.moves.insert(Move { from, to });
        }

        for change in inserts {
            if change.index >= self.current_len || !set.insert.insert(change.index) {
                return None;
            }
        }
        for change in removes {
            if change.index >= self.previous_len || !set.remove.insert(change.index) {
                return None;
            }
        }
        for change in updates {
            if change.index >= self.previous_len {
                return None;
            }
            set.update.insert(change.index);
        }

        if !set.is_disjoint() {
            return None;
        }
        // A moved slot cannot also be removed or reloaded, and a move target
        // cannot also receive an insert.
        if sources
            .iter()
            .any(|from| set.remove.contains(from) || set.update.contains(from))
        {
            return None;
        }
        if targets.iter().any(|to| set.insert.contains(to)) {
            return None;
        }

        Some(set)
    }
}

/// Convenience wrapper around [`ChangeSetMapper::map`].
pub fn map_changes(
    previous_len: usize,
    current_len: usize,
    changes: &[ChangeEvent],
) -> Option<PositionSet> {
    ChangeSetMapper::new(previous_len, current_len).map(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entity;
    use serde_json::json;

    fn item(id: &str) -> Entity {
        Entity::new_local(id, "channels", json!({}), 0)
    }

    #[test]
    fn insert_and_remove() {
        // [A, B, C] -> [D, A, C]
        let changes = vec![
            ChangeEvent::insert(item("D"), 0),
            ChangeEvent::remove(item("B"), 1),
        ];
        let set = map_changes(3, 3, &changes).unwrap();

        assert_eq!(set.insert, BTreeSet::from([0]));
        assert_eq!(set.remove, BTreeSet::from([1]));
        assert!(set.update.is_empty());
        assert!(set.moves.is_empty());
    }

    #[test]
    fn empty_batch_maps_to_empty_set() {
        let set = map_changes(2, 2, &[]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn reset_batch_is_full_insert() {
        let changes: Vec<_> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, id)| ChangeEvent::insert(item(id), i))
            .collect();
        let set = map_changes(0, 3, &changes).unwrap();
        assert_eq!(set.insert, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn move_from_outside_previous_snapshot() {
        let changes = vec![ChangeEvent::moved(item("A"), 3, 0)];
        assert_eq!(map_changes(3, 3, &changes), None);
    }

    #[test]
    fn move_to_outside_current_snapshot() {
        let changes = vec![ChangeEvent::moved(item("A"), 0, 2)];
        assert_eq!(map_changes(3, 2, &changes), None);
    }

    #[test]
    fn move_without_target() {
        let mut change = ChangeEvent::moved(item("A"), 0, 1);
        change.new_index = None;
        assert_eq!(map_changes(2, 2, &[change]), None);
    }

    #[test]
    fn conflicting_moves() {
        let same_source = vec![
            ChangeEvent::moved(item("A"), 0, 1),
            ChangeEvent::moved(item("A"), 0, 2),
        ];
        assert_eq!(map_changes(3, 3, &same_source), None);

        let same_target = vec![
            ChangeEvent::moved(item("A"), 0, 2),
            ChangeEvent::moved(item("B"), 1, 2),
        ];
        assert_eq!(map_changes(3, 3, &same_target), None);
    }

    #[test]
    fn removal_out_of_bounds() {
        let changes = vec![ChangeEvent::remove(item("X"), 5)];
        assert_eq!(map_changes(3, 2, &changes), None);
    }

    #[test]
    fn overlapping_insert_and_remove() {
        let changes = vec![
            ChangeEvent::remove(item("A"), 0),
            ChangeEvent::insert(item("B"), 0),
        ];
        assert_eq!(map_changes(1, 1, &changes), None);
    }

    #[test]
    fn move_and_update_at_same_index() {
        let changes = vec![
            ChangeEvent::moved(item("A"), 0, 2),
            ChangeEvent::update(item("A"), 0),
        ];
        assert_eq!(map_changes(3, 3, &changes), None);
    }

    #[test]
    fn move_target_collides_with_insert() {
        let changes = vec![
            ChangeEvent::moved(item("A"), 0, 1),
            ChangeEvent::insert(item("B"), 1),
        ];
        assert_eq!(map_changes(2, 3, &changes), None);
    }

    #[test]
    fn repeated_update_is_coalesced() {
        let changes = vec![
            ChangeEvent::update(item("A"), 1),
            ChangeEvent::update(item("A"), 1),
        ];
        let set = map_changes(2, 2, &changes).unwrap();
        assert_eq!(set.update, BTreeSet::from([1]));
    }

    #[test]
    fn moves_and_updates_elsewhere() {
        // [A, B, C] -> [C, A, B] with B updated
        let changes = vec![
            ChangeEvent::moved(item("C"), 2, 0),
            ChangeEvent::update(item("B"), 1),
        ];
        let set = map_changes(3, 3, &changes).unwrap();
        assert_eq!(set.moves, BTreeSet::from([Move { from: 2, to: 0 }]));
        assert_eq!(set.update, BTreeSet::from([1]));
    }
}
