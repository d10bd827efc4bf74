//! # heaptrace - Heap Reconstruction and Classification from Allocation Traces
//!
//! heaptrace replays a trace of allocations, moves, pointer updates and
//! garbage collections emitted by a managed runtime, rebuilds the heap as it
//! was at every GC boundary, and answers "what is on the heap, and why is it
//! still there?" by grouping objects through configurable classifier chains.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Trace file (JSON lines)                        │
//! │     space / thread / LAB / alloc / gc_* / ptr / root events     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ decoder thread, bounded channel
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  trace::HeapBuilder ──▶ heap::DetailedHeap (spaces, LABs, GCs)  │
//! │          │                        │                             │
//! │          │ GC boundary            │ freeze                      │
//! │          ▼                        ▼                             │
//! │  statistics::StatisticsCollector  heap::HeapSnapshot            │
//! │  diff::HeapEvolution (listener)        │                        │
//! └────────────────────────────────────────┼────────────────────────┘
//!                                          ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  stream::ObjectStream (parallel, per-worker state)              │
//! │          │                                                      │
//! │          ▼                                                      │
//! │  grouping::Grouper ◀── registry (classifiers, filters, plugins) │
//! │          │                                                      │
//! │          ▼                                                      │
//! │  ClassificationTree ──▶ closure ──▶ export / metadata           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`domain`]: newtype ids and the error families
//! - [`symbols`]: allocated types, allocation sites, call-site labels
//! - [`heap`]: the mutable heap model and immutable per-boundary snapshots
//! - [`trace`]: trace decoding, event dispatch and the replaying builder
//! - [`registry`]: classifier and filter factories, built-ins and plugins
//! - [`stream`]: object populations and the parallel object stream
//! - [`grouping`]: classification trees built from classifier chains
//! - [`closure`]: transitive closure and retained sizes per group
//! - [`statistics`]: per-boundary memory statistics and their metadata cache
//! - [`diff`]: perm/born/died/temp evolution over a GC window
//! - [`export`]: tree export and import
//! - [`config`] and [`cli`]: analysis settings and their command line
//!
//! ## Typical Usage
//!
//! ```bash
//! # Group the heap at the end of the trace by type
//! heaptrace app.trace --symbols app.symbols.json
//!
//! # What lived, was born, died or came and went between GC 3 and GC 7
//! heaptrace app.trace --symbols app.symbols.json --from-gc 3 --to-gc 7
//! ```
//!
//! ## Key Concepts
//!
//! - **LAB**: thread-local allocation buffer; fast allocations carry no address
//! - **Snapshot**: dense, index-addressed freeze of the heap at a GC boundary
//! - **Classifier chain**: ordered classifiers whose keys form a tree path
//! - **Closure**: everything reachable from a group; **retained** is the part
//!   unreachable from roots once the group is gone

pub mod bits;
pub mod cli;
pub mod closure;
pub mod config;
pub mod diff;
pub mod domain;
pub mod export;
pub mod grouping;
pub mod heap;
pub mod registry;
pub mod statistics;
pub mod stream;
pub mod symbols;
pub mod trace;
