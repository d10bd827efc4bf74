//! GC boundary records handed to listeners.

use crate::domain::{Address, GcId};
use heaptrace_common::GcKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::object::ObjectInfo;

/// Identity of one collection as announced by `gc_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcInfo {
    pub id: GcId,
    pub kind: GcKind,
    pub cause: String,
    pub concurrent: bool,
}

impl fmt::Display for GcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            GcKind::Minor => "minor",
            GcKind::Major => "major",
        };
        write!(f, "{} ({kind}, {})", self.id, self.cause)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    Start,
    End,
}

/// Point in trace time a snapshot was frozen at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcBoundary {
    pub info: GcInfo,
    pub phase: GcPhase,
    pub failed: bool,
}

/// One object relocated by a move, move-region or keep-alive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovedObject {
    pub from: Address,
    pub to: Address,
}

/// Object reclaimed at the end of a collection.
///
/// Captured before the memory is reused, since nothing else remembers it.
#[derive(Debug, Clone)]
pub struct DiedObject {
    /// Address the object had before the collection
    pub address: Address,
    pub info: Arc<ObjectInfo>,
    pub age: u16,
}

/// Old address -> new address for every object moved by one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    entries: BTreeMap<Address, Address>,
}

impl RemapTable {
    pub fn insert(&mut self, from: Address, to: Address) {
        self.entries.insert(from, to);
    }

    /// New address of the object that lived at `from`, if it moved.
    #[must_use]
    pub fn get(&self, from: Address) -> Option<Address> {
        self.entries.get(&from).copied()
    }

    /// `from` if the object did not move
    #[must_use]
    pub fn resolve(&self, from: Address) -> Address {
        self.get(from).unwrap_or(from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.entries.iter().map(|(from, to)| (*from, *to))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a collection changed, reported once at `gc_end`.
#[derive(Debug, Clone)]
pub struct GcOutcome {
    pub info: GcInfo,
    /// Explicitly failed, or still interrupted when it ended
    pub failed: bool,
    pub remap: RemapTable,
    pub died: Vec<DiedObject>,
}
