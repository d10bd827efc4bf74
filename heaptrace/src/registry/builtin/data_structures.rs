//! Data structure roles of snapshot objects.
//!
//! A *head* is an instance of a known container type (`java.util.HashMap`,
//! `java.util.ArrayList`, ...). A *part* is an object the container is built
//! from: a nested type of a container package (`java.util.HashMap$Node`) or a
//! reference array. Walking from a head through parts:
//!
//! ```text
//! HashMap ──▶ Node[] ──▶ HashMap$Node ──▶ HashMap$Node
//!  head       internal     internal         │
//!                │            │             ▼
//!                ▼            ▼          value (leaf)
//!             key (leaf)   key (leaf)
//! ```
//!
//! Internal objects are parts that point onwards; leaves are everything else
//! directly referenced from the structure (data objects, nested heads and
//! pointer-free parts).

use crate::bits::BitSet;
use crate::domain::ObjectIndex;
use crate::heap::HeapSnapshot;
use crate::symbols::descriptor::is_primitive_array;
use std::collections::HashSet;

const CONTAINER_PACKAGES: [&str; 2] = ["java.util.", "java.util.concurrent."];

const HEAD_TYPES: [&str; 20] = [
    "java.util.ArrayList",
    "java.util.LinkedList",
    "java.util.Vector",
    "java.util.Stack",
    "java.util.ArrayDeque",
    "java.util.PriorityQueue",
    "java.util.HashMap",
    "java.util.LinkedHashMap",
    "java.util.TreeMap",
    "java.util.Hashtable",
    "java.util.IdentityHashMap",
    "java.util.WeakHashMap",
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
    "java.util.concurrent.ConcurrentHashMap",
    "java.util.concurrent.ConcurrentLinkedQueue",
    "java.util.concurrent.CopyOnWriteArrayList",
    "java.util.concurrent.LinkedBlockingQueue",
    "java.util.concurrent.ArrayBlockingQueue",
];

fn type_name(snapshot: &HeapSnapshot, index: ObjectIndex) -> (&str, &str) {
    let info = &snapshot.object(index).info;
    snapshot
        .symbols()
        .type_info(info.type_id)
        .map_or(("", ""), |ty| (ty.external_name(), ty.internal_name()))
}

#[must_use]
pub fn is_head(snapshot: &HeapSnapshot, index: ObjectIndex) -> bool {
    let (external, _) = type_name(snapshot, index);
    HEAD_TYPES.contains(&external)
}

#[must_use]
pub fn is_part(snapshot: &HeapSnapshot, index: ObjectIndex) -> bool {
    let (external, internal) = type_name(snapshot, index);
    if snapshot.object(index).info.is_array() {
        return !is_primitive_array(internal);
    }
    external.contains('$') && CONTAINER_PACKAGES.iter().any(|package| external.starts_with(package))
}

/// Memoised "reached from a head through parts" decisions, sized to one
/// snapshot and owned by one filter instance.
#[derive(Debug, Clone, Default)]
pub struct StructureMemo {
    known: BitSet,
    member: BitSet,
}

impl StructureMemo {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { known: BitSet::new(len), member: BitSet::new(len) }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.known.capacity()
    }

    /// Whether `index` is a head, or a part reachable from a head through parts.
    pub fn in_structure(&mut self, snapshot: &HeapSnapshot, index: ObjectIndex) -> bool {
        if self.known.contains(index) {
            return self.member.contains(index);
        }
        if is_head(snapshot, index) {
            self.record(index, true);
            return true;
        }
        if !is_part(snapshot, index) {
            self.record(index, false);
            return false;
        }

        // Upward search through parts towards a head
        let mut visited = vec![index];
        let mut seen = HashSet::from([index]);
        let mut cursor = 0;
        let mut found = false;
        while cursor < visited.len() && !found {
            let current = visited[cursor];
            cursor += 1;
            for &parent in snapshot.pointed_from(current) {
                if self.known.contains(parent) {
                    if self.member.contains(parent) {
                        found = true;
                        break;
                    }
                    continue;
                }
                if is_head(snapshot, parent) {
                    self.record(parent, true);
                    found = true;
                    break;
                }
                if is_part(snapshot, parent) && seen.insert(parent) {
                    visited.push(parent);
                }
            }
        }

        if found {
            self.record(index, true);
        } else {
            // Nothing above any visited part leads to a head
            for node in visited {
                self.record(node, false);
            }
        }
        found
    }

    /// Part of a structure that points onwards.
    pub fn is_internal(&mut self, snapshot: &HeapSnapshot, index: ObjectIndex) -> bool {
        !is_head(snapshot, index)
            && is_part(snapshot, index)
            && !snapshot.points_to(index).is_empty()
            && self.in_structure(snapshot, index)
    }

    /// Referenced from a structure without being internal to it.
    pub fn is_leaf(&mut self, snapshot: &HeapSnapshot, index: ObjectIndex) -> bool {
        if self.is_internal(snapshot, index) {
            return false;
        }
        snapshot.pointed_from(index).iter().any(|&parent| {
            (is_head(snapshot, parent) || is_part(snapshot, parent))
                && self.in_structure(snapshot, parent)
        })
    }

    fn record(&mut self, index: ObjectIndex, member: bool) {
        self.known.insert(index);
        if member {
            self.member.insert(index);
        }
    }
}
