//! Structured error types for heaptrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Cancellation is deliberately absent: cancelled work reports
//! [`crate::stream::Outcome::Cancelled`] instead of failing.

use super::types::{Address, GcId, SiteId, SpaceId, ThreadId, TypeId};
use thiserror::Error;

/// Failures while decoding or replaying a trace. Fatal to the parse.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("{0} referenced before it was created")]
    UnknownSpace(SpaceId),

    #[error("Address {0} does not belong to any space")]
    AddressOutsideSpaces(Address),

    #[error("Range of {size} bytes at {start} runs past the end of the address space")]
    AddressOverflow { start: Address, size: u64 },

    #[error("Fast allocation on {0} without a current TLAB")]
    NoLab(ThreadId),

    #[error("Normal or slow allocation on {0} without an address")]
    MissingAddress(ThreadId),

    #[error("TLAB of {thread} cannot fit {needed} more bytes")]
    LabOverflow { thread: ThreadId, needed: u64 },

    #[error("No object at {address} (while handling {event})")]
    UnknownObject { address: Address, event: &'static str },

    #[error("Unknown allocation site {0}")]
    UnknownSite(SiteId),

    #[error("Unknown type {0}")]
    UnknownType(TypeId),

    #[error("{0} outside of a garbage collection")]
    NoActiveGc(&'static str),

    #[error("{started} started while {active} is still active")]
    NestedGc { active: GcId, started: GcId },

    #[error("Expected event for {expected}, got {found}")]
    GcMismatch { expected: GcId, found: GcId },

    #[error("{0} registered alive twice")]
    ThreadAlreadyAlive(ThreadId),

    #[error("Malformed event at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Trace pipeline failed: {0}")]
    PipelineFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures while filtering, classifying or aggregating a population.
///
/// Any of these aborts the classification request; partially built trees are
/// dropped, never returned.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Unknown classifier '{0}'")]
    UnknownClassifier(String),

    #[error("Unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("Classifier '{classifier}' failed on {object}: {reason}")]
    ClassifierFailed { classifier: String, object: String, reason: String },

    #[error("Filter '{filter}' failed on {object}: {reason}")]
    FilterFailed { filter: String, object: String, reason: String },

    #[error("Classifier '{classifier}' produced an invalid key: {reason}")]
    InvalidKey { classifier: String, reason: String },

    #[error("'{unit}' has no property '{property}' accepting '{value}'")]
    InvalidProperty { unit: String, property: String, value: String },

    #[error("'{0}' needs pointer information, which this population does not provide")]
    PointersUnavailable(String),

    #[error("'{unit}' only runs on {required} populations")]
    IncompatibleSource { unit: String, required: String },

    #[error("Closure computation needs member indices, but the tree only stores counts")]
    NoMemberIndices,

    #[error("Classification worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("Diff window {from} to {to} was not closed by the trace")]
    IncompleteWindow { from: GcId, to: GcId },
}

/// Failures while populating a classifier or filter registry.
///
/// These are logged and the offending unit is skipped; loading continues.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to load plugin '{unit}': {reason}")]
    PluginLoadFailed { unit: String, reason: String },

    #[error("Plugin directory {path} is not readable: {source}")]
    DirectoryUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize classification tree: {0}")]
    SerializationFailed(String),

    #[error("Invalid classification tree: {0}")]
    InvalidTree(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures while reading persisted metadata.
///
/// Never surfaced to callers: the metadata API turns them into a stale-cache
/// miss and the data is derived again.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata format version {found} does not match expected version {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Metadata file {0} does not exist")]
    Missing(String),

    #[error("Cached statistics were derived from {cached}, not {current}")]
    TraceMismatch { cached: String, current: String },

    #[error("Corrupt metadata: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Invalid analysis settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Diff window must not end before it starts ({from} to {to})")]
    InvalidWindow { from: GcId, to: GcId },

    #[error("Classifier chain is empty")]
    EmptyChain,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_error_display() {
        let err = TraceError::UnknownSpace(SpaceId(3));
        assert_eq!(err.to_string(), "Space#3 referenced before it was created");

        let err = TraceError::NestedGc { active: GcId(1), started: GcId(2) };
        assert_eq!(err.to_string(), "GC#2 started while GC#1 is still active");
    }

    #[test]
    fn test_classifier_failure_names_the_classifier() {
        let err = ClassificationError::ClassifierFailed {
            classifier: "Type".to_string(),
            object: "object 17".to_string(),
            reason: "type table missing".to_string(),
        };
        assert!(err.to_string().contains("'Type'"));
        assert!(err.to_string().contains("object 17"));
    }

    #[test]
    fn test_plugin_load_error() {
        let err = RegistryError::PluginLoadFailed {
            unit: "broken.json".to_string(),
            reason: "missing field `kind`".to_string(),
        };
        assert!(err.to_string().contains("broken.json"));
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_metadata_version_mismatch() {
        let err = MetadataError::VersionMismatch { found: 1, expected: 2 };
        assert_eq!(
            err.to_string(),
            "Metadata format version 1 does not match expected version 2"
        );
    }
}
