//! Heap reconstruction
//!
//! - [`detailed`]: the live heap the trace is replayed into
//! - [`snapshot`]: frozen, index-backed views handed to classification
//! - [`gc`]: collection records (boundaries, remap tables, died objects)

pub mod detailed;
pub mod gc;
pub mod object;
pub mod snapshot;
pub mod space;
pub mod thread_local;

pub use detailed::{DetailedHeap, ObjAllocation};
pub use gc::{DiedObject, GcBoundary, GcInfo, GcOutcome, GcPhase, MovedObject, RemapTable};
pub use object::{HeapObject, ObjectInfo, ObjectInfoCache, ObjectShape, SMALL_ARRAY_LIMIT};
pub use snapshot::{HeapSnapshot, SnapshotBuilder, SnapshotObject};
pub use space::{Space, SpaceIndex, SpaceRef};
pub use thread_local::{Lab, ThreadLocalHeap};
