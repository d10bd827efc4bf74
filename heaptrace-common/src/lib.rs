//! # Shared Trace Event Schema (Trace Producer ↔ Analyzer)
//!
//! Defines the event records a VM-side trace producer emits and the analyzer
//! replays. The schema is deliberately flat: raw integers for addresses, ids
//! and thread handles. The analyzer wraps them in domain newtypes on entry.
//!
//! ## Event Families
//!
//! 1. **Space lifecycle** - create / redefine / alloc / release / destroy
//! 2. **Allocation** - fast (inside a LAB), normal and slow (explicit address)
//! 3. **GC lifecycle** - start / info / failed / interrupt / continue / end
//! 4. **GC work** - move, move-region, keep-alive, pointers, roots
//! 5. **Threads and annotations** - alive / death, tag, cleanup
//!
//! ## Key Types
//!
//! - [`TraceEvent`] - One replayable event
//! - [`RootKind`] - Typed GC root record attached to a pointer
//! - [`AllocPath`], [`Allocator`] - How an object was allocated
//! - [`SpaceMode`], [`SpaceKind`] - How a space is used
//!
//! With the `serde` feature enabled every type serialises as a snake_case
//! tagged JSON object, one event per line in trace files.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Address value used for null pointers inside [`TraceEvent::GcPtr`].
pub const NULL_ADDRESS: u64 = 0;

/// Allocation site id reserved for objects whose site is unknown.
pub const UNKNOWN_SITE: u32 = 0;

/// Type id reserved for objects whose type is unknown.
pub const UNKNOWN_TYPE: u32 = 0;

// ============================================================================
// Space Enums
// ============================================================================

/// How a space hands out memory once it is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum SpaceMode {
    /// Objects are placed directly into the space
    Normal,
    /// The space is carved into thread-local allocation buffers
    Lab,
}

/// Generation a space belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum SpaceKind {
    Eden,
    Survivor,
    Old,
}

impl SpaceKind {
    /// Human readable label used in statistics and classification keys.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SpaceKind::Eden => "Eden",
            SpaceKind::Survivor => "Survivor",
            SpaceKind::Old => "Old",
        }
    }
}

// ============================================================================
// Allocation Enums
// ============================================================================

/// Encoding an allocation event was emitted with.
///
/// **Values**:
/// - `Fast`: inside the thread's current TLAB, no address in the event
/// - `Normal`: explicit address, type taken from the allocation site
/// - `Slow`: explicit address, may carry a deviant runtime type and may
///   correct a tentative object previously recorded at the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum AllocPath {
    Fast,
    Normal,
    Slow,
}

/// Execution tier that performed the allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum Allocator {
    Interpreter,
    C1,
    C2,
    Vm,
}

impl Allocator {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Allocator::Interpreter => "Interpreter",
            Allocator::C1 => "C1",
            Allocator::C2 => "C2",
            Allocator::Vm => "VM",
        }
    }
}

// ============================================================================
// GC Enums
// ============================================================================

/// Collection scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum GcKind {
    /// Young generation only
    Minor,
    /// Whole heap
    Major,
}

/// Typed GC root record.
///
/// Every [`TraceEvent::GcRoot`] associates one pointer with exactly one of
/// these records. Ids refer to the producer's class/method tables and are only
/// used for labelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "root", rename_all = "snake_case")
)]
pub enum RootKind {
    ClassLoader { loader_name: String },
    Class { class_id: u32 },
    StaticField { class_id: u32, offset: u32 },
    LocalVariable { thread: u64, class_id: u32, method_id: u32, slot: u32 },
    VmInternalThreadData { thread: u64, kind: u32 },
    CodeBlob { class_id: u32, method_id: u32 },
    JniLocal { thread: u64 },
    JniGlobal { weak: bool },
    Other { kind: u32 },
    Debug { vm_call: String },
}

impl RootKind {
    /// Short label of the root category, independent of the payload.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RootKind::ClassLoader { .. } => "Class Loader",
            RootKind::Class { .. } => "Class",
            RootKind::StaticField { .. } => "Static Field",
            RootKind::LocalVariable { .. } => "Local Variable",
            RootKind::VmInternalThreadData { .. } => "VM Internal Thread Data",
            RootKind::CodeBlob { .. } => "Code Blob",
            RootKind::JniLocal { .. } => "JNI Local",
            RootKind::JniGlobal { weak: false } => "JNI Global",
            RootKind::JniGlobal { weak: true } => "JNI Weak Global",
            RootKind::Other { .. } => "Other",
            RootKind::Debug { .. } => "Debug",
        }
    }
}

// ============================================================================
// Trace Event
// ============================================================================

/// One event of the append-only trace.
///
/// Events must be replayed in exactly the order they were written: slow-path
/// corrections and GC work events depend on state established earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "event", rename_all = "snake_case")
)]
pub enum TraceEvent {
    // ========================================================================
    // Space Lifecycle
    // ========================================================================
    SpaceCreate { index: u32, start: u64, size: u64 },
    SpaceRedefine { index: u32, start: u64, size: u64 },
    SpaceAlloc { index: u32, mode: SpaceMode, kind: SpaceKind },
    SpaceRelease { index: u32 },
    /// Removes `count` consecutive regions starting at `first_index`
    SpaceDestroy { first_index: u32, count: u32 },

    // ========================================================================
    // Threads
    // ========================================================================
    ThreadAlive { id: u64, name: String },
    ThreadDeath { id: u64 },

    // ========================================================================
    // Allocation
    // ========================================================================
    /// New thread-local allocation buffer for mutator allocations
    TlabAlloc { thread: u64, address: u64, size: u64 },
    /// New promotion buffer used by GC threads
    PlabAlloc { thread: u64, address: u64, size: u64 },
    /// Object allocation
    ///
    /// **Fields**:
    /// - `address`: `None` for [`AllocPath::Fast`], required otherwise
    /// - `deviant_type`: runtime type when it differs from the site's type
    /// - `array_length`: `Some` for arrays only
    /// - `size`: object size in bytes
    ObjAlloc {
        thread: u64,
        path: AllocPath,
        allocator: Allocator,
        address: Option<u64>,
        site: u32,
        deviant_type: Option<u32>,
        array_length: Option<u32>,
        size: u64,
    },

    // ========================================================================
    // GC Lifecycle
    // ========================================================================
    GcStart { id: u32, kind: GcKind, cause: String, concurrent: bool },
    /// Marks `space` as collected by GC `gc_id`
    GcInfo { space: u32, gc_id: u32 },
    /// Collection of `space` failed, its objects stay in place
    GcFailed { space: u32 },
    GcInterrupt { id: u32 },
    GcContinue { id: u32 },
    GcEnd { id: u32, kind: GcKind, cause: String, failed: bool },

    // ========================================================================
    // GC Work
    // ========================================================================
    GcMove { from: u64, to: u64, space: Option<u32> },
    /// Moves `count` objects laid out back to back starting at `from`
    GcMoveRegion { from: u64, to: u64, count: u32 },
    GcKeepAlive { address: u64 },
    /// Replaces the outgoing pointers of the object at `address`
    GcPtr { address: u64, pointers: Vec<u64> },
    GcRoot { address: u64, root: RootKind },

    // ========================================================================
    // Annotations
    // ========================================================================
    GcTag { text: String },
    Cleanup,
}

impl TraceEvent {
    /// Stable snake_case name of the event kind, used for counting and logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            TraceEvent::SpaceCreate { .. } => "space_create",
            TraceEvent::SpaceRedefine { .. } => "space_redefine",
            TraceEvent::SpaceAlloc { .. } => "space_alloc",
            TraceEvent::SpaceRelease { .. } => "space_release",
            TraceEvent::SpaceDestroy { .. } => "space_destroy",
            TraceEvent::ThreadAlive { .. } => "thread_alive",
            TraceEvent::ThreadDeath { .. } => "thread_death",
            TraceEvent::TlabAlloc { .. } => "tlab_alloc",
            TraceEvent::PlabAlloc { .. } => "plab_alloc",
            TraceEvent::ObjAlloc { .. } => "obj_alloc",
            TraceEvent::GcStart { .. } => "gc_start",
            TraceEvent::GcInfo { .. } => "gc_info",
            TraceEvent::GcFailed { .. } => "gc_failed",
            TraceEvent::GcInterrupt { .. } => "gc_interrupt",
            TraceEvent::GcContinue { .. } => "gc_continue",
            TraceEvent::GcEnd { .. } => "gc_end",
            TraceEvent::GcMove { .. } => "gc_move",
            TraceEvent::GcMoveRegion { .. } => "gc_move_region",
            TraceEvent::GcKeepAlive { .. } => "gc_keep_alive",
            TraceEvent::GcPtr { .. } => "gc_ptr",
            TraceEvent::GcRoot { .. } => "gc_root",
            TraceEvent::GcTag { .. } => "gc_tag",
            TraceEvent::Cleanup => "cleanup",
        }
    }

    /// Returns true for events that are only valid while a GC is active.
    #[must_use]
    pub fn requires_active_gc(&self) -> bool {
        matches!(
            self,
            TraceEvent::GcInfo { .. }
                | TraceEvent::GcFailed { .. }
                | TraceEvent::GcInterrupt { .. }
                | TraceEvent::GcContinue { .. }
                | TraceEvent::GcMove { .. }
                | TraceEvent::GcMoveRegion { .. }
                | TraceEvent::GcKeepAlive { .. }
                | TraceEvent::GcRoot { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_labels_distinguish_weak_globals() {
        assert_eq!(RootKind::JniGlobal { weak: false }.label(), "JNI Global");
        assert_eq!(RootKind::JniGlobal { weak: true }.label(), "JNI Weak Global");
    }

    #[test]
    fn test_gc_work_events_require_active_gc() {
        assert!(TraceEvent::GcKeepAlive { address: 0x10 }.requires_active_gc());
        assert!(!TraceEvent::Cleanup.requires_active_gc());
        assert!(!TraceEvent::GcPtr { address: 0x10, pointers: vec![] }.requires_active_gc());
    }
}
