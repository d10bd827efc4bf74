//! Object populations: anything an [`super::ObjectStream`] can traverse.

use crate::domain::{Address, ObjectIndex, ThreadId};
use crate::heap::{DetailedHeap, HeapSnapshot, ObjectInfo, SpaceRef};
use crate::symbols::Symbols;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::ObjectContext;

/// Which kind of population a classifier or filter may run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCollection {
    /// Runs everywhere
    All,
    /// Random-access snapshot with pointer and root indices
    IndexBacked,
    /// Counts-only population without pointer information
    Streaming,
}

impl SourceCollection {
    /// Whether a unit declaring `self` may run on a `population` source.
    #[must_use]
    pub fn admits(self, population: SourceCollection) -> bool {
        self == SourceCollection::All || population == SourceCollection::All || self == population
    }
}

impl fmt::Display for SourceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceCollection::All => write!(f, "all"),
            SourceCollection::IndexBacked => write!(f, "index-backed"),
            SourceCollection::Streaming => write!(f, "streaming"),
        }
    }
}

/// Uniform random access to the objects of a population.
///
/// Positions run from `0` to `len() - 1`; for snapshot-backed populations the
/// context also carries the object's snapshot index.
pub trait ObjectPopulation: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn context(&self, position: usize) -> ObjectContext<'_>;

    fn symbols(&self) -> &Symbols;

    fn source_collection(&self) -> SourceCollection;

    /// Snapshot backing the population, if any
    fn snapshot(&self) -> Option<&HeapSnapshot> {
        None
    }
}

fn snapshot_context(snapshot: &HeapSnapshot, index: ObjectIndex) -> ObjectContext<'_> {
    let object = snapshot.object(index);
    ObjectContext {
        index: Some(index),
        address: object.address,
        info: &object.info,
        age: object.age,
        space: object.space,
        count: 1,
        thread_name: snapshot.thread_name(object.info.thread),
        symbols: snapshot.symbols(),
        snapshot: Some(snapshot),
    }
}

impl ObjectPopulation for HeapSnapshot {
    fn len(&self) -> usize {
        HeapSnapshot::len(self)
    }

    fn context(&self, position: usize) -> ObjectContext<'_> {
        #[allow(clippy::cast_possible_truncation)]
        snapshot_context(self, position as ObjectIndex)
    }

    fn symbols(&self) -> &Symbols {
        HeapSnapshot::symbols(self)
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::IndexBacked
    }

    fn snapshot(&self) -> Option<&HeapSnapshot> {
        Some(self)
    }
}

/// Selected objects of a snapshot, by index.
#[derive(Debug, Clone)]
pub struct SnapshotSubset<'s> {
    snapshot: &'s HeapSnapshot,
    indices: Vec<ObjectIndex>,
}

impl<'s> SnapshotSubset<'s> {
    #[must_use]
    pub fn new(snapshot: &'s HeapSnapshot, mut indices: Vec<ObjectIndex>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self { snapshot, indices }
    }

    #[must_use]
    pub fn indices(&self) -> &[ObjectIndex] {
        &self.indices
    }
}

impl ObjectPopulation for SnapshotSubset<'_> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn context(&self, position: usize) -> ObjectContext<'_> {
        snapshot_context(self.snapshot, self.indices[position])
    }

    fn symbols(&self) -> &Symbols {
        self.snapshot.symbols()
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::IndexBacked
    }

    fn snapshot(&self) -> Option<&HeapSnapshot> {
        Some(self.snapshot)
    }
}

/// One entry of a counts-only population.
#[derive(Debug, Clone)]
pub struct DetachedObject {
    /// `Address::NULL` when no longer meaningful (e.g. reclaimed objects)
    pub address: Address,
    pub info: Arc<ObjectInfo>,
    pub age: u16,
    pub space: Option<SpaceRef>,
    pub count: u64,
}

/// Population without pointer information.
///
/// Built from the live heap while the trace is still being replayed, or
/// from an age collection of objects that no longer exist.
#[derive(Debug, Clone)]
pub struct DetachedPopulation {
    symbols: Arc<Symbols>,
    threads: HashMap<ThreadId, String>,
    objects: Vec<DetachedObject>,
}

impl DetachedPopulation {
    #[must_use]
    pub fn new(symbols: Arc<Symbols>, objects: Vec<DetachedObject>) -> Self {
        Self { symbols, threads: HashMap::new(), objects }
    }

    #[must_use]
    pub fn with_threads(mut self, threads: HashMap<ThreadId, String>) -> Self {
        self.threads = threads;
        self
    }

    /// Counts-only view of the absorbed objects of the live heap.
    #[must_use]
    pub fn from_heap(heap: &DetailedHeap) -> Self {
        let spaces = heap.space_index();
        let mut threads = HashMap::new();
        let objects = heap
            .objects()
            .map(|(address, object)| {
                let thread = object.info.thread;
                if let Some(name) = heap.thread_name(thread) {
                    threads.entry(thread).or_insert_with(|| name.to_string());
                }
                DetachedObject {
                    address,
                    info: Arc::clone(&object.info),
                    age: object.age,
                    space: spaces.lookup(address),
                    count: 1,
                }
            })
            .collect();
        Self { symbols: Arc::clone(heap.symbols()), threads, objects }
    }

    /// Total number of objects, counting multiplicities
    #[must_use]
    pub fn object_count(&self) -> u64 {
        self.objects.iter().map(|o| o.count).sum()
    }
}

impl ObjectPopulation for DetachedPopulation {
    fn len(&self) -> usize {
        self.objects.len()
    }

    fn context(&self, position: usize) -> ObjectContext<'_> {
        let object = &self.objects[position];
        ObjectContext {
            index: None,
            address: object.address,
            info: &object.info,
            age: object.age,
            space: object.space,
            count: object.count,
            thread_name: self.threads.get(&object.info.thread).map(String::as_str),
            symbols: &self.symbols,
            snapshot: None,
        }
    }

    fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::Streaming
    }
}
