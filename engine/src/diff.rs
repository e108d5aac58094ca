//! Diffing two ordered snapshots of an observed list.
//!
//! # Algorithm
//!
//! 1. Items whose id disappeared are removed at their previous position
//! 2. Surviving items are walked in their new order; the longest run whose
//!    previous positions increase stays in place, every other survivor moves
//! 3. A stable survivor with changed content is updated in place
//! 4. A moving survivor with changed content is removed and reinserted, so a
//!    slot is never both moved and reloaded
//! 5. New ids are inserted at their new position

use crate::{ChangeEvent, Entity};
use std::collections::HashMap;

/// Compute the change batch that turns `previous` into `current`.
///
/// Events come out ordered removes, then moves and updates, then inserts.
pub fn diff(previous: &[Entity], current: &[Entity]) -> Vec<ChangeEvent> {
    let old_positions: HashMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();
    let new_positions: HashMap<&str, usize> = current
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();

    let mut removes = Vec::new();
    let mut in_place = Vec::new();
    let mut inserts = Vec::new();

    for (old, item) in previous.iter().enumerate() {
        if !new_positions.contains_key(item.id.as_str()) {
            removes.push(ChangeEvent::remove(item.clone(), old));
        }
    }

    // (new position, old position) of every survivor, in new order.
    let survivors: Vec<(usize, usize)> = current
        .iter()
        .enumerate()
        .filter_map(|(new, e)| old_positions.get(e.id.as_str()).map(|&old| (new, old)))
        .collect();
    let old_sequence: Vec<usize> = survivors.iter().map(|&(_, old)| old).collect();
    let stable = longest_increasing_run(&old_sequence);

    for (pos, &(new, old)) in survivors.iter().enumerate() {
        let item = &current[new];
        let changed = previous[old].content_differs(item);
        match (stable[pos], changed) {
            (true, false) => {}
            (true, true) => in_place.push(ChangeEvent::update(item.clone(), old)),
            (false, false) => in_place.push(ChangeEvent::moved(item.clone(), old, new)),
            (false, true) => {
                removes.push(ChangeEvent::remove(previous[old].clone(), old));
                inserts.push(ChangeEvent::insert(item.clone(), new));
            }
        }
    }

    for (new, item) in current.iter().enumerate() {
        if !old_positions.contains_key(item.id.as_str()) {
            inserts.push(ChangeEvent::insert(item.clone(), new));
        }
    }
    inserts.sort_by_key(|e| e.index);
    removes.sort_by_key(|e| e.index);

    removes.extend(in_place);
    removes.extend(inserts);
    removes
}

/// Mark the members of one longest strictly increasing subsequence.
fn longest_increasing_run(sequence: &[usize]) -> Vec<bool> {
    // tails[k] is the index into `sequence` of the smallest tail of an
    // increasing run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut predecessor: Vec<Option<usize>> = vec![None; sequence.len()];

    for (i, &value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&t| sequence[t] < value);
        if slot > 0 {
            predecessor[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut marks = vec![false; sequence.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        marks[i] = true;
        cursor = predecessor[i];
    }
    marks
}
