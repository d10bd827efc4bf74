//! Frozen, index-backed heap snapshots.
//!
//! A [`HeapSnapshot`] is the immutable view handed to classification at a GC
//! boundary. Objects are sorted by address and addressed by a dense
//! [`ObjectIndex`], which makes the snapshot safe to partition across workers
//! without locking.
//!
//! ## Layout
//!
//! ```text
//! objects   [ obj0 | obj1 | obj2 | ... ]      sorted by address
//! pointers  [ [2]  | []   | [0,1]| ... ]      forward edges, by index
//! reverse   built on first pointed_from() call
//! roots     index -> [RootKind]
//! ```

use crate::bits::BitSet;
use crate::domain::{Address, ObjectIndex, ThreadId};
use crate::symbols::Symbols;
use heaptrace_common::RootKind;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use super::gc::GcBoundary;
use super::object::ObjectInfo;
use super::space::SpaceRef;

/// One object as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotObject {
    pub address: Address,
    pub info: Arc<ObjectInfo>,
    pub age: u16,
    pub space: Option<SpaceRef>,
}

#[derive(Debug)]
pub struct HeapSnapshot {
    symbols: Arc<Symbols>,
    boundary: Option<GcBoundary>,
    objects: Vec<SnapshotObject>,
    pointers: Vec<Vec<ObjectIndex>>,
    reverse: OnceLock<Vec<Vec<ObjectIndex>>>,
    roots: BTreeMap<ObjectIndex, Vec<RootKind>>,
    threads: HashMap<ThreadId, String>,
    spaces: Vec<SpaceRef>,
    dangling_pointers: u64,
}

impl HeapSnapshot {
    #[must_use]
    pub fn builder(symbols: Arc<Symbols>) -> SnapshotBuilder {
        SnapshotBuilder {
            symbols,
            boundary: None,
            objects: BTreeMap::new(),
            roots: Vec::new(),
            threads: HashMap::new(),
            spaces: Vec::new(),
        }
    }

    #[must_use]
    pub fn symbols(&self) -> &Arc<Symbols> {
        &self.symbols
    }

    #[must_use]
    pub fn boundary(&self) -> Option<&GcBoundary> {
        self.boundary.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn object(&self, index: ObjectIndex) -> &SnapshotObject {
        &self.objects[index as usize]
    }

    pub fn objects(&self) -> impl Iterator<Item = &SnapshotObject> {
        self.objects.iter()
    }

    #[must_use]
    pub fn index_of(&self, address: Address) -> Option<ObjectIndex> {
        let position = self.objects.binary_search_by_key(&address, |o| o.address).ok()?;
        ObjectIndex::try_from(position).ok()
    }

    /// Objects referenced by `index`
    #[must_use]
    pub fn points_to(&self, index: ObjectIndex) -> &[ObjectIndex] {
        &self.pointers[index as usize]
    }

    /// Objects referencing `index`; the reverse index is built on first use.
    #[must_use]
    pub fn pointed_from(&self, index: ObjectIndex) -> &[ObjectIndex] {
        let reverse = self.reverse.get_or_init(|| {
            let mut reverse = vec![Vec::new(); self.objects.len()];
            for (from, targets) in self.pointers.iter().enumerate() {
                for &to in targets {
                    #[allow(clippy::cast_possible_truncation)]
                    reverse[to as usize].push(from as ObjectIndex);
                }
            }
            reverse
        });
        &reverse[index as usize]
    }

    /// Root records pointing at `index`
    #[must_use]
    pub fn roots_of(&self, index: ObjectIndex) -> &[RootKind] {
        self.roots.get(&index).map_or(&[], Vec::as_slice)
    }

    pub fn root_indices(&self) -> impl Iterator<Item = ObjectIndex> + '_ {
        self.roots.keys().copied()
    }

    #[must_use]
    pub fn thread_name(&self, thread: ThreadId) -> Option<&str> {
        self.threads.get(&thread).map(String::as_str)
    }

    /// Spaces that existed when the snapshot was taken, empty or not
    #[must_use]
    pub fn spaces(&self) -> &[SpaceRef] {
        &self.spaces
    }

    /// Pointers and roots whose target was not part of the snapshot
    #[must_use]
    pub fn dangling_pointers(&self) -> u64 {
        self.dangling_pointers
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.info.size).sum()
    }

    /// Every object reachable from a GC root.
    #[must_use]
    pub fn reachable_from_roots(&self) -> BitSet {
        let mut reached = BitSet::new(self.len());
        let mut stack: Vec<ObjectIndex> =
            self.root_indices().filter(|&root| reached.insert(root)).collect();
        while let Some(index) = stack.pop() {
            for &next in self.points_to(index) {
                if reached.insert(next) {
                    stack.push(next);
                }
            }
        }
        reached
    }

    /// Bytes of all objects reachable from GC roots.
    #[must_use]
    pub fn reachable_bytes(&self) -> u64 {
        self.reachable_from_roots().iter().map(|i| self.object(i).info.size).sum()
    }
}

/// Incremental construction of a [`HeapSnapshot`].
///
/// Used by the live heap when freezing, and directly by tools and tests that
/// need a snapshot without replaying a trace.
#[derive(Debug)]
pub struct SnapshotBuilder {
    symbols: Arc<Symbols>,
    boundary: Option<GcBoundary>,
    objects: BTreeMap<Address, (SnapshotObject, Vec<Address>)>,
    roots: Vec<(Address, RootKind)>,
    threads: HashMap<ThreadId, String>,
    spaces: Vec<SpaceRef>,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn boundary(mut self, boundary: Option<GcBoundary>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn object(
        &mut self,
        address: Address,
        info: Arc<ObjectInfo>,
        age: u16,
        space: Option<SpaceRef>,
    ) -> &mut Self {
        self.objects.insert(address, (SnapshotObject { address, info, age, space }, Vec::new()));
        self
    }

    /// Add outgoing pointers of the object at `from`. Unknown sources are ignored.
    pub fn pointers(&mut self, from: Address, to: &[Address]) -> &mut Self {
        if let Some((_, pointers)) = self.objects.get_mut(&from) {
            pointers.extend(to.iter().copied().filter(|a| !a.is_null()));
        }
        self
    }

    pub fn root(&mut self, address: Address, kind: RootKind) -> &mut Self {
        self.roots.push((address, kind));
        self
    }

    pub fn thread(&mut self, id: ThreadId, name: impl Into<String>) -> &mut Self {
        self.threads.insert(id, name.into());
        self
    }

    pub fn space(&mut self, space: SpaceRef) -> &mut Self {
        self.spaces.push(space);
        self
    }

    #[must_use]
    pub fn finish(self) -> HeapSnapshot {
        let mut objects = Vec::with_capacity(self.objects.len());
        let mut raw_pointers = Vec::with_capacity(self.objects.len());
        for (_, (object, pointers)) in self.objects {
            objects.push(object);
            raw_pointers.push(pointers);
        }

        let mut snapshot = HeapSnapshot {
            symbols: self.symbols,
            boundary: self.boundary,
            objects,
            pointers: Vec::new(),
            reverse: OnceLock::new(),
            roots: BTreeMap::new(),
            threads: self.threads,
            spaces: self.spaces,
            dangling_pointers: 0,
        };

        let mut dangling = 0;
        let pointers = raw_pointers
            .into_iter()
            .map(|targets| {
                targets
                    .into_iter()
                    .filter_map(|address| {
                        let index = snapshot.index_of(address);
                        if index.is_none() {
                            dangling += 1;
                        }
                        index
                    })
                    .collect()
            })
            .collect();

        let mut roots: BTreeMap<ObjectIndex, Vec<RootKind>> = BTreeMap::new();
        for (address, kind) in self.roots {
            match snapshot.index_of(address) {
                Some(index) => roots.entry(index).or_default().push(kind),
                None => dangling += 1,
            }
        }

        if dangling > 0 {
            debug!("Snapshot dropped {dangling} pointers to objects outside the heap");
        }
        snapshot.pointers = pointers;
        snapshot.roots = roots;
        snapshot.dangling_pointers = dangling;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TypeId;
    use crate::symbols::AllocationSite;
    use heaptrace_common::Allocator;

    fn info(size: u64) -> Arc<ObjectInfo> {
        Arc::new(ObjectInfo {
            type_id: TypeId(0),
            site: Arc::new(AllocationSite::unknown()),
            size,
            array_length: None,
            allocator: Allocator::Interpreter,
            thread: ThreadId(1),
        })
    }

    fn chain_snapshot() -> HeapSnapshot {
        // root -> 0x10 -> 0x20, 0x30 unreachable -> 0x20
        let mut builder = HeapSnapshot::builder(Arc::new(Symbols::new()));
        builder.object(Address(0x30), info(30), 0, None);
        builder.object(Address(0x10), info(10), 0, None);
        builder.object(Address(0x20), info(20), 0, None);
        builder.pointers(Address(0x10), &[Address(0x20), Address::NULL, Address(0x99)]);
        builder.pointers(Address(0x30), &[Address(0x20)]);
        builder.root(Address(0x10), RootKind::JniGlobal { weak: false });
        builder.finish()
    }

    #[test]
    fn test_objects_sorted_by_address() {
        let snapshot = chain_snapshot();
        assert_eq!(snapshot.index_of(Address(0x10)), Some(0));
        assert_eq!(snapshot.index_of(Address(0x30)), Some(2));
        assert_eq!(snapshot.index_of(Address(0x40)), None);
    }

    #[test]
    fn test_pointer_resolution_and_reverse_index() {
        let snapshot = chain_snapshot();
        assert_eq!(snapshot.points_to(0), &[1]);
        assert_eq!(snapshot.pointed_from(1), &[0, 2]);
        assert_eq!(snapshot.dangling_pointers(), 1);
    }

    #[test]
    fn test_reachability_from_roots() {
        let snapshot = chain_snapshot();
        let reached = snapshot.reachable_from_roots();
        assert!(reached.contains(0));
        assert!(reached.contains(1));
        assert!(!reached.contains(2));
        assert_eq!(snapshot.reachable_bytes(), 30);
        assert_eq!(snapshot.total_bytes(), 60);
    }
}
