//! # Closures and Retained Sizes
//!
//! Per group of an index-backed tree:
//!
//! - **closure**: the members plus everything reachable from them by
//!   following outgoing pointers, each object counted once
//! - **retained**: the part of the closure that is reachable from the GC
//!   roots now, but no longer once the members are removed
//!
//! ```text
//! root ──▶ a ──▶ M ──▶ x          closure(M)  = {M, x, y}
//!          │          └──▶ y      alive(¬M)   = {a, b, y}
//!          └──▶ b ─────────▲      retained(M) = {M, x}
//! ```
//!
//! Garbage the members point into is part of the closure but never retained.
//! A snapshot without any roots counts every object as reachable.
//!
//! The tree must be fully built before closures are computed. Nodes are
//! annotated in place; a cancelled computation leaves the tree partially
//! annotated.

use crate::bits::BitSet;
use crate::domain::{ClassificationError, ObjectIndex};
use crate::grouping::{ClassificationTree, GroupingNode, IndexCollection, TreeKind};
use crate::heap::HeapSnapshot;
use crate::stream::{Outcome, TaskContext};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureSizes {
    pub closure_objects: u64,
    pub closure_bytes: u64,
    pub retained_objects: u64,
    pub retained_bytes: u64,
}

/// Objects a retained size may count: those reachable from the roots, or all
/// objects when the snapshot has no roots.
#[must_use]
pub fn live_objects(snapshot: &HeapSnapshot) -> BitSet {
    if snapshot.root_indices().next().is_some() {
        return snapshot.reachable_from_roots();
    }
    let mut live = BitSet::new(snapshot.len());
    for index in (0..snapshot.len()).filter_map(|i| ObjectIndex::try_from(i).ok()) {
        live.insert(index);
    }
    live
}

/// Closure and retained sizes of `members` in `snapshot`.
///
/// `live` is [`live_objects`] of the same snapshot.
#[must_use]
pub fn closure_sizes(snapshot: &HeapSnapshot, live: &BitSet, members: &IndexCollection) -> ClosureSizes {
    let len = snapshot.len();
    let mut member_set = BitSet::new(len);
    for index in members.iter() {
        member_set.insert(index);
    }

    // Everything reachable from the members
    let mut closure = member_set.clone();
    let mut stack: Vec<ObjectIndex> = members.iter().collect();
    while let Some(index) = stack.pop() {
        for &next in snapshot.points_to(index) {
            if closure.insert(next) {
                stack.push(next);
            }
        }
    }

    // Everything still reachable from the roots with the members removed
    let mut alive = BitSet::new(len);
    let mut stack: Vec<ObjectIndex> = snapshot
        .root_indices()
        .filter(|&root| !member_set.contains(root) && alive.insert(root))
        .collect();
    while let Some(index) = stack.pop() {
        for &next in snapshot.points_to(index) {
            if !member_set.contains(next) && alive.insert(next) {
                stack.push(next);
            }
        }
    }

    let mut sizes = ClosureSizes::default();
    for index in closure.iter() {
        let bytes = snapshot.object(index).info.size;
        sizes.closure_objects += 1;
        sizes.closure_bytes += bytes;
        if live.contains(index) && !alive.contains(index) {
            sizes.retained_objects += 1;
            sizes.retained_bytes += bytes;
        }
    }
    sizes
}

/// Annotate every node of `tree` with its closure sizes.
///
/// Progress is reported as the number of nodes done.
///
/// # Errors
///
/// `NoMemberIndices` for counts-only trees or nodes without members.
pub fn compute_closures(
    tree: &mut ClassificationTree,
    snapshot: &HeapSnapshot,
    task: &TaskContext,
) -> Result<Outcome<()>, ClassificationError> {
    if tree.kind() == TreeKind::Map {
        return Err(ClassificationError::NoMemberIndices);
    }
    let live = live_objects(snapshot);
    let mut done = 0u64;
    let completed = annotate(tree.root_mut(), snapshot, &live, task, &mut done)?;
    debug!("Closures computed for {done} groups");
    Ok(if completed { Outcome::Completed(()) } else { Outcome::Cancelled })
}

fn annotate(
    node: &mut GroupingNode,
    snapshot: &HeapSnapshot,
    live: &BitSet,
    task: &TaskContext,
    done: &mut u64,
) -> Result<bool, ClassificationError> {
    if task.is_cancelled() {
        return Ok(false);
    }
    let members = node.members.as_ref().ok_or(ClassificationError::NoMemberIndices)?;
    node.closure = Some(closure_sizes(snapshot, live, members));
    *done += 1;
    task.report(*done);
    for child in node.children.values_mut() {
        if !annotate(child, snapshot, live, task, done)? {
            return Ok(false);
        }
    }
    Ok(true)
}
