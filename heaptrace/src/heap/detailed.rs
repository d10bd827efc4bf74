//! # Live Heap
//!
//! [`DetailedHeap`] is the mutable heap the trace is replayed into. It owns
//! the spaces, the global object map and one [`ThreadLocalHeap`] per mutator
//! thread.
//!
//! ## Object Visibility
//!
//! ```text
//!  obj_alloc ──▶ ThreadLocalHeap.pending ──absorb──▶ objects ──freeze──▶ HeapSnapshot
//!                                           ▲
//!                        cleanup / gc_start / gc_end
//! ```
//!
//! ## Collections
//!
//! Between `gc_start` and `gc_end`, moved objects are parked in the active
//! [`GcState`] keyed by their new address, remembering where they came from.
//! At `gc_end`, objects left behind in reclaimed spaces die, moved objects are
//! installed at their new address, and every pointer and root is rewritten
//! through the resulting [`RemapTable`].

use crate::domain::{Address, GcId, SiteId, SpaceId, ThreadId, TraceError, TypeId};
use crate::symbols::Symbols;
use heaptrace_common::{AllocPath, Allocator, RootKind, SpaceKind, SpaceMode};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::gc::{DiedObject, GcBoundary, GcInfo, GcOutcome, MovedObject, RemapTable};
use super::object::{HeapObject, ObjectInfo, ObjectInfoCache};
use super::snapshot::HeapSnapshot;
use super::space::{Space, SpaceIndex};
use super::thread_local::{Lab, ThreadLocalHeap};

// ============================================================================
// EVENT PAYLOADS
// ============================================================================

/// One object allocation as reported by the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjAllocation {
    pub thread: ThreadId,
    pub path: AllocPath,
    pub allocator: Allocator,
    /// Absent for fast-path allocations, which bump the thread's TLAB
    pub address: Option<Address>,
    pub site: SiteId,
    /// Runtime type overriding the site's static type
    pub deviant_type: Option<TypeId>,
    pub array_length: Option<u32>,
    pub size: u64,
}

#[derive(Debug, Clone)]
struct ThreadRecord {
    name: String,
    alive: bool,
}

/// Bookkeeping of the collection in progress.
#[derive(Debug)]
struct GcState {
    info: GcInfo,
    interrupted: bool,
    collected: BTreeSet<SpaceId>,
    failed_spaces: BTreeSet<SpaceId>,
    /// new address -> (address before this GC, object)
    moved: BTreeMap<Address, (Address, HeapObject)>,
    /// Pointers reported during this GC, already in post-GC addresses
    fresh_pointers: HashMap<Address, Vec<Address>>,
    roots: HashMap<Address, Vec<RootKind>>,
}

impl GcState {
    fn new(info: GcInfo) -> Self {
        Self {
            info,
            interrupted: false,
            collected: BTreeSet::new(),
            failed_spaces: BTreeSet::new(),
            moved: BTreeMap::new(),
            fresh_pointers: HashMap::new(),
            roots: HashMap::new(),
        }
    }

    fn check_id(&self, id: GcId) -> Result<(), TraceError> {
        if self.info.id == id {
            Ok(())
        } else {
            Err(TraceError::GcMismatch { expected: self.info.id, found: id })
        }
    }
}

/// End of the range `start..start + size`.
fn check_range(start: Address, size: u64) -> Result<Address, TraceError> {
    start.checked_offset(size).ok_or(TraceError::AddressOverflow { start, size })
}

// ============================================================================
// DETAILED HEAP
// ============================================================================

#[derive(Debug)]
pub struct DetailedHeap {
    symbols: Arc<Symbols>,
    spaces: BTreeMap<SpaceId, Space>,
    /// Address-sorted view of `spaces`, rebuilt lazily after any space event
    space_lookup: Option<SpaceIndex>,
    objects: BTreeMap<Address, HeapObject>,
    thread_heaps: HashMap<ThreadId, ThreadLocalHeap>,
    threads: HashMap<ThreadId, ThreadRecord>,
    roots: HashMap<Address, Vec<RootKind>>,
    gc: Option<GcState>,
    last_gc: Option<GcInfo>,
    infos: ObjectInfoCache,
}

impl DetailedHeap {
    #[must_use]
    pub fn new(symbols: Arc<Symbols>) -> Self {
        Self {
            symbols,
            spaces: BTreeMap::new(),
            space_lookup: None,
            objects: BTreeMap::new(),
            thread_heaps: HashMap::new(),
            threads: HashMap::new(),
            roots: HashMap::new(),
            gc: None,
            last_gc: None,
            infos: ObjectInfoCache::new(),
        }
    }

    #[must_use]
    pub fn symbols(&self) -> &Arc<Symbols> {
        &self.symbols
    }

    // ------------------------------------------------------------------------
    // Spaces
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `AddressOverflow` if the range runs past the end of the address space.
    pub fn space_create(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        check_range(start, size)?;
        if self.spaces.insert(id, Space::new(id, start, size)).is_some() {
            debug!("{id} re-created at {start}");
        }
        self.space_lookup = None;
        Ok(())
    }

    /// # Errors
    ///
    /// `UnknownSpace` if the space was never created, `AddressOverflow` for
    /// a range past the end of the address space.
    pub fn space_redefine(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        check_range(start, size)?;
        let space = self.space_mut(id)?;
        space.start = start;
        space.size = size;
        Ok(())
    }

    /// # Errors
    ///
    /// `UnknownSpace` if the space was never created.
    pub fn space_alloc(&mut self, id: SpaceId, mode: SpaceMode, kind: SpaceKind) -> Result<(), TraceError> {
        let space = self.space_mut(id)?;
        space.mode = Some(mode);
        space.kind = Some(kind);
        Ok(())
    }

    /// # Errors
    ///
    /// `UnknownSpace` if the space was never created.
    pub fn space_release(&mut self, id: SpaceId) -> Result<(), TraceError> {
        let space = self.space_mut(id)?;
        space.mode = None;
        space.kind = None;
        Ok(())
    }

    /// Remove `count` consecutive spaces starting at `first`, along with any
    /// objects still inside them.
    ///
    /// # Errors
    ///
    /// `UnknownSpace` if any space of the run does not exist; nothing is
    /// removed in that case.
    pub fn space_destroy(&mut self, first: SpaceId, count: u32) -> Result<(), TraceError> {
        let ids: Vec<SpaceId> = (first.0..first.0.saturating_add(count)).map(SpaceId).collect();
        if let Some(missing) = ids.iter().find(|id| !self.spaces.contains_key(id)) {
            return Err(TraceError::UnknownSpace(*missing));
        }
        self.space_lookup = None;
        for id in ids {
            if let Some(space) = self.spaces.remove(&id) {
                let doomed: Vec<Address> =
                    self.objects.range(space.start..space.end()).map(|(a, _)| *a).collect();
                if !doomed.is_empty() {
                    debug!("Destroying {id} drops {} objects", doomed.len());
                }
                for address in doomed {
                    self.objects.remove(&address);
                    self.roots.remove(&address);
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    fn space_mut(&mut self, id: SpaceId) -> Result<&mut Space, TraceError> {
        self.space_lookup = None;
        self.spaces.get_mut(&id).ok_or(TraceError::UnknownSpace(id))
    }

    fn check_address(&mut self, address: Address) -> Result<(), TraceError> {
        self.space_lookup
            .get_or_insert_with(|| SpaceIndex::new(&self.spaces))
            .lookup(address)
            .map(|_| ())
            .ok_or(TraceError::AddressOutsideSpaces(address))
    }

    // ------------------------------------------------------------------------
    // Threads and LABs
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `ThreadAlreadyAlive` if the thread is alive already.
    pub fn thread_alive(&mut self, id: ThreadId, name: impl Into<String>) -> Result<(), TraceError> {
        if self.threads.get(&id).is_some_and(|t| t.alive) {
            return Err(TraceError::ThreadAlreadyAlive(id));
        }
        self.threads.insert(id, ThreadRecord { name: name.into(), alive: true });
        Ok(())
    }

    pub fn thread_death(&mut self, id: ThreadId) {
        match self.threads.get_mut(&id) {
            Some(record) => record.alive = false,
            None => warn!("Death of unknown thread {id}"),
        }
    }

    #[must_use]
    pub fn thread_name(&self, id: ThreadId) -> Option<&str> {
        self.threads.get(&id).map(|t| t.name.as_str())
    }

    /// # Errors
    ///
    /// `AddressOutsideSpaces` if the buffer does not start inside a space,
    /// `AddressOverflow` if it runs past the end of the address space.
    pub fn tlab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        check_range(start, size)?;
        self.check_address(start)?;
        self.thread_heap(thread).set_tlab(Lab::new(start, size));
        Ok(())
    }

    /// Validate a promotion buffer.
    ///
    /// Only checked, never kept: promoted objects arrive as explicit moves,
    /// so nothing is ever bump-allocated from a PLAB.
    ///
    /// # Errors
    ///
    /// As [`DetailedHeap::tlab_alloc`].
    pub fn plab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        check_range(start, size)?;
        self.check_address(start)?;
        debug!("PLAB of {size} bytes at {start} for {thread}");
        Ok(())
    }

    fn thread_heap(&mut self, thread: ThreadId) -> &mut ThreadLocalHeap {
        self.thread_heaps.entry(thread).or_insert_with(|| ThreadLocalHeap::new(thread))
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Record one allocation and return the address the object ends up at.
    ///
    /// An allocation at an address that already holds a tentative object
    /// replaces it: slow-path events correct earlier fast-path guesses.
    ///
    /// # Errors
    ///
    /// `UnknownSite`/`UnknownType` for symbols missing from the tables,
    /// `MissingAddress` for a normal or slow allocation without an address,
    /// `AddressOutsideSpaces`, `NoLab` and `LabOverflow` as placement fails.
    pub fn obj_alloc(&mut self, alloc: &ObjAllocation) -> Result<Address, TraceError> {
        let site = self.symbols.site(alloc.site).ok_or(TraceError::UnknownSite(alloc.site))?;
        let (type_id, site) = match alloc.deviant_type {
            Some(real) => {
                if self.symbols.type_info(real).is_none() {
                    return Err(TraceError::UnknownType(real));
                }
                (real, self.infos.deviant_site(site, real))
            }
            None => (site.allocated_type(), Arc::clone(site)),
        };
        let info = self.infos.intern(ObjectInfo {
            type_id,
            site,
            size: alloc.size,
            array_length: alloc.array_length,
            allocator: alloc.allocator,
            thread: alloc.thread,
        });
        let object = HeapObject::new(info);

        match (alloc.path, alloc.address) {
            (_, Some(address)) => {
                self.check_address(address)?;
                if self.objects.remove(&address).is_some() {
                    debug!("Allocation at {address} replaces an absorbed object");
                }
                if self.thread_heap(alloc.thread).record(address, object).is_some() {
                    debug!("Slow path corrected tentative object at {address}");
                }
                Ok(address)
            }
            (AllocPath::Fast, None) => self.thread_heap(alloc.thread).alloc_fast(object),
            (_, None) => Err(TraceError::MissingAddress(alloc.thread)),
        }
    }

    /// Fold every thread's pending allocations into the global heap.
    pub fn absorb_thread_heaps(&mut self) {
        for heap in self.thread_heaps.values_mut() {
            self.objects.append(&mut heap.take_pending());
        }
    }

    // ------------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// `NestedGc` if a collection is already in progress.
    pub fn gc_start(&mut self, info: GcInfo) -> Result<(), TraceError> {
        if let Some(active) = &self.gc {
            return Err(TraceError::NestedGc { active: active.info.id, started: info.id });
        }
        self.absorb_thread_heaps();
        for heap in self.thread_heaps.values_mut() {
            heap.retire_labs();
        }
        debug!("{info} started");
        self.gc = Some(GcState::new(info));
        Ok(())
    }

    /// Mark `space` as reclaimed by collection `id`.
    ///
    /// # Errors
    ///
    /// `NoActiveGc`, `GcMismatch` or `UnknownSpace`.
    pub fn gc_info(&mut self, space: SpaceId, id: GcId) -> Result<(), TraceError> {
        if !self.spaces.contains_key(&space) {
            return Err(TraceError::UnknownSpace(space));
        }
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc("gc_info"))?;
        gc.check_id(id)?;
        gc.collected.insert(space);
        Ok(())
    }

    /// Mark `space` as failed: its unmoved objects survive the collection.
    ///
    /// # Errors
    ///
    /// `NoActiveGc` or `UnknownSpace`.
    pub fn gc_failed(&mut self, space: SpaceId) -> Result<(), TraceError> {
        if !self.spaces.contains_key(&space) {
            return Err(TraceError::UnknownSpace(space));
        }
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc("gc_failed"))?;
        gc.failed_spaces.insert(space);
        Ok(())
    }

    /// # Errors
    ///
    /// `NoActiveGc` or `GcMismatch`.
    pub fn gc_interrupt(&mut self, id: GcId) -> Result<(), TraceError> {
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc("gc_interrupt"))?;
        gc.check_id(id)?;
        gc.interrupted = true;
        Ok(())
    }

    /// # Errors
    ///
    /// `NoActiveGc` or `GcMismatch`.
    pub fn gc_continue(&mut self, id: GcId) -> Result<(), TraceError> {
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc("gc_continue"))?;
        gc.check_id(id)?;
        if !gc.interrupted {
            warn!("{id} continued without being interrupted");
        }
        gc.interrupted = false;
        Ok(())
    }

    #[must_use]
    pub fn active_gc(&self) -> Option<&GcInfo> {
        self.gc.as_ref().map(|gc| &gc.info)
    }

    #[must_use]
    pub fn last_gc(&self) -> Option<&GcInfo> {
        self.last_gc.as_ref()
    }

    /// Move one object.
    ///
    /// # Errors
    ///
    /// `NoActiveGc`, `UnknownObject` if nothing lives at `from`, and
    /// `UnknownSpace`/`AddressOutsideSpaces` for a bad destination.
    pub fn gc_move(
        &mut self,
        from: Address,
        to: Address,
        space: Option<SpaceId>,
    ) -> Result<MovedObject, TraceError> {
        if let Some(space) = space {
            if !self.spaces.contains_key(&space) {
                return Err(TraceError::UnknownSpace(space));
            }
        }
        self.check_address(to)?;
        self.relocate(from, to, "gc_move")?;
        Ok(MovedObject { from, to })
    }

    /// Move `count` adjacent objects starting at `from` to the same layout at
    /// `to`. Reports one move per object.
    ///
    /// # Errors
    ///
    /// As [`DetailedHeap::gc_move`], for the first object that cannot be moved.
    pub fn gc_move_region(
        &mut self,
        from: Address,
        to: Address,
        count: u32,
    ) -> Result<Vec<MovedObject>, TraceError> {
        let mut moves = Vec::with_capacity(count as usize);
        let (mut source, mut target) = (from, to);
        for _ in 0..count {
            self.check_address(target)?;
            let size = self.relocate(source, target, "gc_move_region")?;
            moves.push(MovedObject { from: source, to: target });
            source = check_range(source, size)?;
            target = check_range(target, size)?;
        }
        Ok(moves)
    }

    /// Object survives in place.
    ///
    /// # Errors
    ///
    /// `NoActiveGc` or `UnknownObject`.
    pub fn gc_keep_alive(&mut self, address: Address) -> Result<MovedObject, TraceError> {
        self.relocate(address, address, "gc_keep_alive")?;
        Ok(MovedObject { from: address, to: address })
    }

    /// Park the object currently at `from` at `to`; returns its size.
    fn relocate(&mut self, from: Address, to: Address, event: &'static str) -> Result<u64, TraceError> {
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc(event))?;
        let (origin, object) = match self.objects.remove(&from) {
            Some(object) => (from, object),
            None => gc
                .moved
                .remove(&from)
                .ok_or(TraceError::UnknownObject { address: from, event })?,
        };
        if let Some(pointers) = gc.fresh_pointers.remove(&from) {
            gc.fresh_pointers.insert(to, pointers);
        }
        let size = object.info.size;
        if gc.moved.insert(to, (origin, object)).is_some() {
            debug!("Two objects moved to {to}; keeping the later one");
        }
        Ok(size)
    }

    /// Replace the outgoing pointers of the object at `address`.
    ///
    /// # Errors
    ///
    /// `UnknownObject` if no object, absorbed or pending, lives there.
    pub fn set_pointers(&mut self, address: Address, pointers: &[Address]) -> Result<(), TraceError> {
        let pointers: Vec<Address> = pointers.iter().copied().filter(|p| !p.is_null()).collect();
        if let Some(gc) = self.gc.as_mut() {
            if gc.moved.contains_key(&address) || self.objects.contains_key(&address) {
                gc.fresh_pointers.insert(address, pointers);
                return Ok(());
            }
        } else if let Some(object) = self.objects.get_mut(&address) {
            object.pointers = pointers;
            return Ok(());
        }
        for heap in self.thread_heaps.values_mut() {
            if let Some(object) = heap.pending_mut(address) {
                object.pointers = pointers;
                return Ok(());
            }
        }
        Err(TraceError::UnknownObject { address, event: "gc_ptr" })
    }

    /// Record a GC root pointing at `address`.
    ///
    /// Roots are reported afresh by every collection; the first root of a
    /// collection replaces the previous root set at `gc_end`.
    ///
    /// # Errors
    ///
    /// `NoActiveGc`.
    pub fn add_root(&mut self, address: Address, root: RootKind) -> Result<(), TraceError> {
        let gc = self.gc.as_mut().ok_or(TraceError::NoActiveGc("gc_root"))?;
        gc.roots.entry(address).or_default().push(root);
        Ok(())
    }

    /// Finish collection `id`.
    ///
    /// # Errors
    ///
    /// `NoActiveGc`, or `GcMismatch` (the collection stays active).
    pub fn gc_end(&mut self, id: GcId, failed: bool) -> Result<GcOutcome, TraceError> {
        let state = self.gc.take().ok_or(TraceError::NoActiveGc("gc_end"))?;
        if let Err(e) = state.check_id(id) {
            self.gc = Some(state);
            return Err(e);
        }
        if state.interrupted {
            warn!("{} ended while interrupted; marking it failed", state.info.id);
        }
        let failed = failed || state.interrupted;
        self.absorb_thread_heaps();
        Ok(self.finish_gc(state, failed))
    }

    /// Close an in-progress collection as failed. Used when the trace breaks
    /// off mid-collection.
    pub fn abort_gc(&mut self) -> Option<GcOutcome> {
        let state = self.gc.take()?;
        warn!("{} aborted; marking it failed", state.info.id);
        self.absorb_thread_heaps();
        Some(self.finish_gc(state, true))
    }

    fn finish_gc(&mut self, state: GcState, failed: bool) -> GcOutcome {
        let mut died = Vec::new();

        if !failed {
            let reclaimable: BTreeSet<SpaceId> =
                state.collected.difference(&state.failed_spaces).copied().collect();
            let doomed: Vec<Address> = reclaimable
                .iter()
                .filter_map(|id| self.spaces.get(id))
                .flat_map(|space| self.objects.range(space.start..space.end()).map(|(a, _)| *a))
                .collect();
            for address in doomed {
                if let Some(object) = self.objects.remove(&address) {
                    self.roots.remove(&address);
                    died.push(DiedObject { address, info: object.info, age: object.age });
                }
            }
        }

        let mut remap = RemapTable::default();
        for (to, (origin, mut object)) in state.moved {
            object.age = object.age.saturating_add(1);
            remap.insert(origin, to);
            if let Some(overwritten) = self.objects.insert(to, object) {
                died.push(DiedObject { address: to, info: overwritten.info, age: overwritten.age });
            }
        }

        if !remap.is_empty() {
            for object in self.objects.values_mut() {
                for pointer in &mut object.pointers {
                    *pointer = remap.resolve(*pointer);
                }
            }
        }
        for (address, pointers) in state.fresh_pointers {
            if let Some(object) = self.objects.get_mut(&address) {
                object.pointers = pointers;
            }
        }

        self.roots = if state.roots.is_empty() {
            std::mem::take(&mut self.roots)
                .into_iter()
                .map(|(address, roots)| (remap.resolve(address), roots))
                .collect()
        } else {
            state.roots
        };

        info!(
            "{} ended{}: {} moved, {} died, {} live",
            state.info,
            if failed { " (failed)" } else { "" },
            remap.len(),
            died.len(),
            self.objects.len()
        );
        self.last_gc = Some(state.info.clone());
        GcOutcome { info: state.info, failed, remap, died }
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Absorbed object at `address`
    #[must_use]
    pub fn object(&self, address: Address) -> Option<&HeapObject> {
        self.objects.get(&address)
    }

    /// Absorbed objects in address order
    pub fn objects(&self) -> impl Iterator<Item = (Address, &HeapObject)> {
        self.objects.iter().map(|(a, o)| (*a, o))
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Allocations not yet absorbed from the thread-local heaps
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.thread_heaps.values().map(ThreadLocalHeap::pending_len).sum()
    }

    #[must_use]
    pub fn space_index(&self) -> SpaceIndex {
        SpaceIndex::new(&self.spaces)
    }

    /// Freeze the absorbed objects into an index-backed snapshot.
    ///
    /// Objects moved by a collection still in progress appear at their new
    /// address.
    #[must_use]
    pub fn freeze(&self, boundary: Option<GcBoundary>) -> HeapSnapshot {
        let spaces = self.space_index();
        let mut builder = HeapSnapshot::builder(Arc::clone(&self.symbols)).boundary(boundary);

        let moved = self.gc.iter().flat_map(|gc| gc.moved.iter().map(|(to, (_, o))| (*to, o)));
        let live: Vec<(Address, &HeapObject)> = self.objects().chain(moved).collect();
        for (address, object) in &live {
            builder.object(*address, Arc::clone(&object.info), object.age, spaces.lookup(*address));
        }
        for (address, object) in &live {
            builder.pointers(*address, &object.pointers);
        }
        for (address, roots) in &self.roots {
            for root in roots {
                builder.root(*address, root.clone());
            }
        }
        for (id, record) in &self.threads {
            builder.thread(*id, record.name.clone());
        }
        for space in self.spaces.values() {
            builder.space(space.space_ref());
        }
        builder.finish()
    }
}
