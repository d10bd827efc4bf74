//! # Heap Statistics
//!
//! One [`Statistics`] record per GC boundary: per space kind memory, allocator
//! and shape breakdowns, per space totals and, when affordable, the bytes
//! reachable from GC roots.
//!
//! ```text
//! snapshot ──▶ ObjectStream::parallel ──▶ SpaceTotals per worker
//!                                             │ merge
//!                                             ▼
//!                          Statistics { boundary, spaces, reachable_bytes }
//! ```

pub mod collector;
pub mod metadata;
pub mod model;

pub use collector::{collect_totals, ReachableBudget, StatisticsCollector, MAX_REACHABLE_OVERHEAD};
pub use metadata::{MetadataStore, TraceFingerprint, METADATA_VERSION};
pub use model::{AllocatorBreakdown, MemoryConsumption, ShapeBreakdown, SpaceStatistics, SpaceTotals, Statistics};
