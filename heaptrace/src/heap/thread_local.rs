//! Per-thread allocation state.
//!
//! Each mutator thread appends to its own [`ThreadLocalHeap`] while the trace
//! is replayed. Pending objects are invisible to classification until the
//! global heap absorbs them at a synchronization point (cleanup, GC start,
//! GC end).

use crate::domain::{Address, ThreadId, TraceError};
use std::collections::BTreeMap;

use super::object::HeapObject;

/// A thread-local allocation buffer (TLAB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lab {
    pub start: Address,
    pub size: u64,
    top: Address,
}

impl Lab {
    #[must_use]
    pub fn new(start: Address, size: u64) -> Self {
        Self { start, size, top: start }
    }

    /// Bump-allocate `bytes`, or `None` if the buffer is full.
    pub fn bump(&mut self, bytes: u64) -> Option<Address> {
        let end = self.start.saturating_offset(self.size);
        let next = self.top.checked_offset(bytes)?;
        if next > end {
            return None;
        }
        let address = self.top;
        self.top = next;
        Some(address)
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.start.saturating_offset(self.size).0 - self.top.0
    }
}

#[derive(Debug)]
pub struct ThreadLocalHeap {
    thread: ThreadId,
    tlab: Option<Lab>,
    pending: BTreeMap<Address, HeapObject>,
}

impl ThreadLocalHeap {
    #[must_use]
    pub fn new(thread: ThreadId) -> Self {
        Self { thread, tlab: None, pending: BTreeMap::new() }
    }

    pub fn set_tlab(&mut self, lab: Lab) {
        self.tlab = Some(lab);
    }

    /// Place `object` at the top of the current TLAB.
    ///
    /// # Errors
    ///
    /// `NoLab` if the thread has no TLAB, `LabOverflow` if it is full.
    pub fn alloc_fast(&mut self, object: HeapObject) -> Result<Address, TraceError> {
        let lab = self.tlab.as_mut().ok_or(TraceError::NoLab(self.thread))?;
        let size = object.info.size;
        let address =
            lab.bump(size).ok_or(TraceError::LabOverflow { thread: self.thread, needed: size })?;
        self.pending.insert(address, object);
        Ok(address)
    }

    /// Record an object at an explicit address.
    ///
    /// Returns the tentative object previously recorded at that address, which
    /// the new one supersedes.
    pub fn record(&mut self, address: Address, object: HeapObject) -> Option<HeapObject> {
        self.pending.insert(address, object)
    }

    pub fn pending_mut(&mut self, address: Address) -> Option<&mut HeapObject> {
        self.pending.get_mut(&address)
    }

    /// Hand all pending objects to the caller.
    pub fn take_pending(&mut self) -> BTreeMap<Address, HeapObject> {
        std::mem::take(&mut self.pending)
    }

    /// Forget the current TLAB; the VM retires it at every collection.
    pub fn retire_labs(&mut self) {
        self.tlab = None;
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
