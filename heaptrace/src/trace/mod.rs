//! # Trace Replay
//!
//! ```text
//! trace.jsonl ──▶ TraceReader ──▶ dispatch ──▶ TraceEventHandler
//!                                               ├── HeapBuilder ──▶ HeapListener (diff)
//!                                               └── EventCounter
//! ```

pub mod builder;
pub mod counter;
pub mod decoder;
pub mod handler;

pub use builder::{HeapBuilder, HeapListener};
pub use counter::EventCounter;
pub use decoder::{replay, replay_file, ReplaySummary, TraceReader, PIPELINE_CAPACITY};
pub use handler::{dispatch, TraceEventHandler};
