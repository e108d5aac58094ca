//! Change events emitted by observers and the position sets derived from them.

use crate::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of a single mutation in an observed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Remove,
    Update,
    Move,
}

/// One mutation of an observed list.
///
/// Index spaces follow the usual batch-update convention: `insert` indices
/// are positions in the new snapshot, `remove` and `update` indices are
/// positions in the previous snapshot, and a `move` goes from a previous
/// position (`index`) to a new one (`new_index`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub item: Entity,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_index: Option<usize>,
}

impl ChangeEvent {
    pub fn insert(item: Entity, index: usize) -> Self {
        Self {
            kind: ChangeKind::Insert,
            item,
            index,
            new_index: None,
        }
    }

    pub fn remove(item: Entity, index: usize) -> Self {
        Self {
            kind: ChangeKind::Remove,
            item,
            index,
            new_index: None,
        }
    }

    pub fn update(item: Entity, index: usize) -> Self {
        Self {
            kind: ChangeKind::Update,
            item,
            index,
            new_index: None,
        }
    }

    pub fn moved(item: Entity, from: usize, to: usize) -> Self {
        Self {
            kind: ChangeKind::Move,
            item,
            index: from,
            new_index: Some(to),
        }
    }
}

/// A move between a previous and a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Positions a list view applies in one batch.
///
/// `insert`, `remove` and `update` are pairwise disjoint, and no move target
/// is also an insert position. Only [`crate::ChangeSetMapper`] builds these.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSet {
    pub insert: BTreeSet<usize>,
    pub remove: BTreeSet<usize>,
    pub update: BTreeSet<usize>,
    pub moves: BTreeSet<Move>,
}

impl PositionSet {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty()
            && self.remove.is_empty()
            && self.update.is_empty()
            && self.moves.is_empty()
    }

    /// Total number of position changes.
    pub fn len(&self) -> usize {
        self.insert.len() + self.remove.len() + self.update.len() + self.moves.len()
    }

    /// Whether insert, remove and update share no index.
    pub fn is_disjoint(&self) -> bool {
        self.insert.is_disjoint(&self.remove)
            && self.insert.is_disjoint(&self.update)
            && self.remove.is_disjoint(&self.update)
    }
}
