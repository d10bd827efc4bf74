//! Diagnostic handler counting events by kind.

use heaptrace_common::TraceEvent;
use std::collections::BTreeMap;
use std::fmt;

use super::handler::TraceEventHandler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounter {
    counts: BTreeMap<&'static str, u64>,
    total: u64,
}

impl EventCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self, kind: &str) -> u64 {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Counts by event kind name, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counts.iter().map(|(kind, count)| (*kind, *count))
    }
}

impl TraceEventHandler for EventCounter {
    fn before_event(&mut self, event: &TraceEvent) {
        *self.counts.entry(event.kind_name()).or_default() += 1;
        self.total += 1;
    }
}

impl fmt::Display for EventCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} events", self.total)?;
        for (kind, count) in self.iter() {
            writeln!(f, "  {kind:<16} {count:>10}")?;
        }
        Ok(())
    }
}
