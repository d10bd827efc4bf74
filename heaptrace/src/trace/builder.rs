//! # Heap Builder
//!
//! Replays trace events into a [`DetailedHeap`] and acts at GC boundaries:
//!
//! ```text
//! gc_start ──▶ absorb TLAB objects ──▶ freeze(Start) ──▶ statistics ──▶ listeners
//! gc_end   ──▶ reclaim / remap     ──▶ freeze(End)   ──▶ statistics ──▶ listeners
//!                                                        (skipped when failed)
//! ```
//!
//! A replay error is fatal: the collection in progress is aborted as failed
//! and no statistics are taken for it.

use crate::domain::{Address, GcId, SpaceId, ThreadId, TraceError};
use crate::heap::{DetailedHeap, GcBoundary, GcInfo, GcOutcome, GcPhase, HeapSnapshot, MovedObject, ObjAllocation};
use crate::statistics::{Statistics, StatisticsCollector};
use crate::stream::{Outcome, TaskContext};
use crate::symbols::Symbols;
use heaptrace_common::{RootKind, SpaceKind, SpaceMode, TraceEvent};
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::counter::EventCounter;
use super::decoder::{self, ReplaySummary};
use super::handler::TraceEventHandler;

/// Observer of GC boundaries.
#[allow(unused_variables)]
pub trait HeapListener {
    /// Heap as it was when the collection started
    fn gc_start(&mut self, info: &GcInfo, snapshot: &Arc<HeapSnapshot>) {}

    /// Heap after the collection, with what it reclaimed and moved
    fn gc_end(&mut self, outcome: &GcOutcome, snapshot: &Arc<HeapSnapshot>) {}

    /// One notification per moved object, also for region moves
    fn objects_moved(&mut self, moves: &[MovedObject]) {}
}

pub struct HeapBuilder<'l> {
    heap: DetailedHeap,
    statistics: Option<StatisticsCollector>,
    listeners: Vec<&'l mut dyn HeapListener>,
    task: TaskContext,
    events: EventCounter,
    /// Replay time since the last boundary, for the reachable-bytes budget
    since_boundary: Instant,
}

impl<'l> HeapBuilder<'l> {
    #[must_use]
    pub fn new(symbols: Arc<Symbols>) -> Self {
        Self {
            heap: DetailedHeap::new(symbols),
            statistics: None,
            listeners: Vec::new(),
            task: TaskContext::new(),
            events: EventCounter::new(),
            since_boundary: Instant::now(),
        }
    }

    /// Take statistics at every GC boundary.
    #[must_use]
    pub fn with_statistics(mut self, collector: StatisticsCollector) -> Self {
        self.statistics = Some(collector);
        self
    }

    /// Cancellation and progress for statistics traversals.
    #[must_use]
    pub fn with_task(mut self, task: TaskContext) -> Self {
        self.task = task;
        self
    }

    pub fn add_listener(&mut self, listener: &'l mut dyn HeapListener) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn heap(&self) -> &DetailedHeap {
        &self.heap
    }

    /// Events replayed so far, by kind
    #[must_use]
    pub fn events(&self) -> &EventCounter {
        &self.events
    }

    /// Statistics records taken so far
    #[must_use]
    pub fn statistics(&self) -> &[Statistics] {
        self.statistics.as_ref().map(StatisticsCollector::records).unwrap_or_default()
    }

    /// Replay a JSON-lines trace file.
    ///
    /// # Errors
    ///
    /// The first decoding or replay error. The collection in progress, if
    /// any, is aborted as failed before returning.
    pub fn replay_file(&mut self, path: &Path) -> Result<ReplaySummary, TraceError> {
        let result = decoder::replay_file(path, self);
        self.settle(result)
    }

    /// Replay already decoded events.
    ///
    /// # Errors
    ///
    /// As [`HeapBuilder::replay_file`].
    pub fn replay<I>(&mut self, events: I) -> Result<ReplaySummary, TraceError>
    where
        I: IntoIterator<Item = TraceEvent>,
    {
        let result = decoder::replay(events.into_iter().map(Ok), self);
        self.settle(result)
    }

    fn settle(&mut self, result: Result<ReplaySummary, TraceError>) -> Result<ReplaySummary, TraceError> {
        if let Err(e) = &result {
            warn!("Replay failed: {e}");
            if let Some(outcome) = self.heap.abort_gc() {
                warn!("{} marked failed; its heap state is not used for statistics", outcome.info.id);
            }
        }
        result
    }

    /// Snapshot of the heap at the end of the trace, pending allocations
    /// included.
    #[must_use]
    pub fn finish(mut self) -> (HeapSnapshot, Vec<Statistics>) {
        self.heap.absorb_thread_heaps();
        let snapshot = self.heap.freeze(None);
        let statistics = self.statistics.map(StatisticsCollector::into_records).unwrap_or_default();
        (snapshot, statistics)
    }

    fn wants_snapshots(&self) -> bool {
        self.statistics.is_some() || !self.listeners.is_empty()
    }

    fn take_statistics(&mut self, snapshot: &HeapSnapshot) -> Result<(), TraceError> {
        let Some(collector) = self.statistics.as_mut() else {
            return Ok(());
        };
        collector.record_parse(self.since_boundary.elapsed());
        match collector.collect(snapshot, &self.task) {
            Ok(Outcome::Completed(stats)) => {
                debug!("Statistics: {} objects, {} bytes", stats.total().objects, stats.total().bytes);
            }
            Ok(Outcome::Cancelled) => debug!("Statistics cancelled"),
            Err(e) => return Err(TraceError::PipelineFailed(e.to_string())),
        }
        Ok(())
    }

    fn moved(&mut self, moves: &[MovedObject]) {
        for listener in &mut self.listeners {
            listener.objects_moved(moves);
        }
    }
}

impl TraceEventHandler for HeapBuilder<'_> {
    fn before_event(&mut self, event: &TraceEvent) {
        self.events.before_event(event);
    }

    fn space_create(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        self.heap.space_create(id, start, size)
    }

    fn space_redefine(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        self.heap.space_redefine(id, start, size)
    }

    fn space_alloc(&mut self, id: SpaceId, mode: SpaceMode, kind: SpaceKind) -> Result<(), TraceError> {
        self.heap.space_alloc(id, mode, kind)
    }

    fn space_release(&mut self, id: SpaceId) -> Result<(), TraceError> {
        self.heap.space_release(id)
    }

    fn space_destroy(&mut self, first: SpaceId, count: u32) -> Result<(), TraceError> {
        self.heap.space_destroy(first, count)
    }

    fn thread_alive(&mut self, id: ThreadId, name: &str) -> Result<(), TraceError> {
        self.heap.thread_alive(id, name)
    }

    fn thread_death(&mut self, id: ThreadId) -> Result<(), TraceError> {
        self.heap.thread_death(id);
        Ok(())
    }

    fn tlab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        self.heap.tlab_alloc(thread, start, size)
    }

    fn plab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        self.heap.plab_alloc(thread, start, size)
    }

    fn obj_alloc(&mut self, alloc: &ObjAllocation) -> Result<(), TraceError> {
        self.heap.obj_alloc(alloc).map(|_| ())
    }

    fn gc_start(&mut self, info: GcInfo) -> Result<(), TraceError> {
        self.heap.gc_start(info.clone())?;
        if self.wants_snapshots() {
            let boundary = GcBoundary { info: info.clone(), phase: GcPhase::Start, failed: false };
            let snapshot = Arc::new(self.heap.freeze(Some(boundary)));
            self.take_statistics(&snapshot)?;
            for listener in &mut self.listeners {
                listener.gc_start(&info, &snapshot);
            }
        }
        self.since_boundary = Instant::now();
        Ok(())
    }

    fn gc_info(&mut self, space: SpaceId, id: GcId) -> Result<(), TraceError> {
        self.heap.gc_info(space, id)
    }

    fn gc_failed(&mut self, space: SpaceId) -> Result<(), TraceError> {
        self.heap.gc_failed(space)
    }

    fn gc_interrupt(&mut self, id: GcId) -> Result<(), TraceError> {
        self.heap.gc_interrupt(id)
    }

    fn gc_continue(&mut self, id: GcId) -> Result<(), TraceError> {
        self.heap.gc_continue(id)
    }

    fn gc_end(&mut self, info: GcInfo, failed: bool) -> Result<(), TraceError> {
        let outcome = self.heap.gc_end(info.id, failed)?;
        if self.wants_snapshots() {
            let boundary = GcBoundary { info: outcome.info.clone(), phase: GcPhase::End, failed: outcome.failed };
            let snapshot = Arc::new(self.heap.freeze(Some(boundary)));
            if outcome.failed {
                warn!("{} failed; no statistics taken", outcome.info.id);
            } else {
                self.take_statistics(&snapshot)?;
            }
            for listener in &mut self.listeners {
                listener.gc_end(&outcome, &snapshot);
            }
        }
        self.since_boundary = Instant::now();
        Ok(())
    }

    fn gc_move(&mut self, from: Address, to: Address, space: Option<SpaceId>) -> Result<(), TraceError> {
        let moved = self.heap.gc_move(from, to, space)?;
        self.moved(&[moved]);
        Ok(())
    }

    fn gc_move_region(&mut self, from: Address, to: Address, count: u32) -> Result<(), TraceError> {
        let moves = self.heap.gc_move_region(from, to, count)?;
        self.moved(&moves);
        Ok(())
    }

    fn gc_keep_alive(&mut self, address: Address) -> Result<(), TraceError> {
        let kept = self.heap.gc_keep_alive(address)?;
        self.moved(&[kept]);
        Ok(())
    }

    fn gc_ptr(&mut self, address: Address, pointers: &[Address]) -> Result<(), TraceError> {
        self.heap.set_pointers(address, pointers)
    }

    fn gc_root(&mut self, address: Address, root: &RootKind) -> Result<(), TraceError> {
        self.heap.add_root(address, root.clone())
    }

    fn gc_tag(&mut self, text: &str) -> Result<(), TraceError> {
        debug!("Tag: {text}");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), TraceError> {
        self.heap.absorb_thread_heaps();
        Ok(())
    }
}
