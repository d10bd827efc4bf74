//! One callback per trace event kind.
//!
//! [`dispatch`] turns a decoded [`TraceEvent`] into the matching call with
//! domain types. Every callback defaults to doing nothing, so diagnostic
//! handlers override only what they need.

use crate::domain::{Address, GcId, SiteId, SpaceId, ThreadId, TraceError, TypeId};
use crate::heap::{GcInfo, ObjAllocation};
use heaptrace_common::{RootKind, SpaceKind, SpaceMode, TraceEvent};

/// Receives trace events in trace order.
///
/// # Errors
///
/// Any error returned by a callback is fatal to the replay.
#[allow(unused_variables)]
pub trait TraceEventHandler {
    /// Called before the event's own callback.
    fn before_event(&mut self, event: &TraceEvent) {}

    // ------------------------------------------------------------------------
    // Spaces
    // ------------------------------------------------------------------------

    fn space_create(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        Ok(())
    }

    fn space_redefine(&mut self, id: SpaceId, start: Address, size: u64) -> Result<(), TraceError> {
        Ok(())
    }

    fn space_alloc(&mut self, id: SpaceId, mode: SpaceMode, kind: SpaceKind) -> Result<(), TraceError> {
        Ok(())
    }

    fn space_release(&mut self, id: SpaceId) -> Result<(), TraceError> {
        Ok(())
    }

    fn space_destroy(&mut self, first: SpaceId, count: u32) -> Result<(), TraceError> {
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Threads and allocation
    // ------------------------------------------------------------------------

    fn thread_alive(&mut self, id: ThreadId, name: &str) -> Result<(), TraceError> {
        Ok(())
    }

    fn thread_death(&mut self, id: ThreadId) -> Result<(), TraceError> {
        Ok(())
    }

    fn tlab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        Ok(())
    }

    fn plab_alloc(&mut self, thread: ThreadId, start: Address, size: u64) -> Result<(), TraceError> {
        Ok(())
    }

    fn obj_alloc(&mut self, alloc: &ObjAllocation) -> Result<(), TraceError> {
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------------

    fn gc_start(&mut self, info: GcInfo) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_info(&mut self, space: SpaceId, id: GcId) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_failed(&mut self, space: SpaceId) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_interrupt(&mut self, id: GcId) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_continue(&mut self, id: GcId) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_end(&mut self, info: GcInfo, failed: bool) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_move(&mut self, from: Address, to: Address, space: Option<SpaceId>) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_move_region(&mut self, from: Address, to: Address, count: u32) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_keep_alive(&mut self, address: Address) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_ptr(&mut self, address: Address, pointers: &[Address]) -> Result<(), TraceError> {
        Ok(())
    }

    fn gc_root(&mut self, address: Address, root: &RootKind) -> Result<(), TraceError> {
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------------

    fn gc_tag(&mut self, text: &str) -> Result<(), TraceError> {
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Invoke the callback matching `event`.
///
/// # Errors
///
/// Whatever the callback returns.
pub fn dispatch<H: TraceEventHandler + ?Sized>(handler: &mut H, event: &TraceEvent) -> Result<(), TraceError> {
    handler.before_event(event);
    match event {
        TraceEvent::SpaceCreate { index, start, size } => handler.space_create(SpaceId(*index), Address(*start), *size),
        TraceEvent::SpaceRedefine { index, start, size } => {
            handler.space_redefine(SpaceId(*index), Address(*start), *size)
        }
        TraceEvent::SpaceAlloc { index, mode, kind } => handler.space_alloc(SpaceId(*index), *mode, *kind),
        TraceEvent::SpaceRelease { index } => handler.space_release(SpaceId(*index)),
        TraceEvent::SpaceDestroy { first_index, count } => handler.space_destroy(SpaceId(*first_index), *count),

        TraceEvent::ThreadAlive { id, name } => handler.thread_alive(ThreadId(*id), name),
        TraceEvent::ThreadDeath { id } => handler.thread_death(ThreadId(*id)),
        TraceEvent::TlabAlloc { thread, address, size } => handler.tlab_alloc(ThreadId(*thread), Address(*address), *size),
        TraceEvent::PlabAlloc { thread, address, size } => handler.plab_alloc(ThreadId(*thread), Address(*address), *size),
        TraceEvent::ObjAlloc { thread, path, allocator, address, site, deviant_type, array_length, size } => {
            handler.obj_alloc(&ObjAllocation {
                thread: ThreadId(*thread),
                path: *path,
                allocator: *allocator,
                address: address.map(Address),
                site: SiteId(*site),
                deviant_type: deviant_type.map(TypeId),
                array_length: *array_length,
                size: *size,
            })
        }

        TraceEvent::GcStart { id, kind, cause, concurrent } => handler.gc_start(GcInfo {
            id: GcId(*id),
            kind: *kind,
            cause: cause.clone(),
            concurrent: *concurrent,
        }),
        TraceEvent::GcInfo { space, gc_id } => handler.gc_info(SpaceId(*space), GcId(*gc_id)),
        TraceEvent::GcFailed { space } => handler.gc_failed(SpaceId(*space)),
        TraceEvent::GcInterrupt { id } => handler.gc_interrupt(GcId(*id)),
        TraceEvent::GcContinue { id } => handler.gc_continue(GcId(*id)),
        TraceEvent::GcEnd { id, kind, cause, failed } => handler.gc_end(
            GcInfo { id: GcId(*id), kind: *kind, cause: cause.clone(), concurrent: false },
            *failed,
        ),
        TraceEvent::GcMove { from, to, space } => handler.gc_move(Address(*from), Address(*to), space.map(SpaceId)),
        TraceEvent::GcMoveRegion { from, to, count } => handler.gc_move_region(Address(*from), Address(*to), *count),
        TraceEvent::GcKeepAlive { address } => handler.gc_keep_alive(Address(*address)),
        TraceEvent::GcPtr { address, pointers } => {
            let pointers: Vec<Address> = pointers.iter().copied().map(Address).collect();
            handler.gc_ptr(Address(*address), &pointers)
        }
        TraceEvent::GcRoot { address, root } => handler.gc_root(Address(*address), root),

        TraceEvent::GcTag { text } => handler.gc_tag(text),
        TraceEvent::Cleanup => handler.cleanup(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heaptrace_common::{AllocPath, Allocator, GcKind};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl TraceEventHandler for Recorder {
        fn obj_alloc(&mut self, alloc: &ObjAllocation) -> Result<(), TraceError> {
            self.calls.push(format!("alloc {:?} {:?}", alloc.address, alloc.deviant_type));
            Ok(())
        }

        fn gc_end(&mut self, info: GcInfo, failed: bool) -> Result<(), TraceError> {
            self.calls.push(format!("end {} {failed}", info.id));
            Ok(())
        }

        fn gc_ptr(&mut self, address: Address, pointers: &[Address]) -> Result<(), TraceError> {
            self.calls.push(format!("ptr {address} {}", pointers.len()));
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_converts_fields() {
        let mut recorder = Recorder::default();
        let events = [
            TraceEvent::ObjAlloc {
                thread: 1,
                path: AllocPath::Slow,
                allocator: Allocator::Vm,
                address: Some(0x10),
                site: 1,
                deviant_type: Some(7),
                array_length: None,
                size: 16,
            },
            TraceEvent::GcPtr { address: 0x10, pointers: vec![0, 0x20] },
            TraceEvent::GcEnd { id: 3, kind: GcKind::Minor, cause: "test".to_string(), failed: true },
            TraceEvent::Cleanup,
        ];
        for event in &events {
            dispatch(&mut recorder, event).unwrap();
        }
        assert_eq!(
            recorder.calls,
            vec![
                "alloc Some(Address(16)) Some(TypeId(7))".to_string(),
                "ptr 0x10 2".to_string(),
                "end GC#3 true".to_string(),
            ]
        );
    }
}
