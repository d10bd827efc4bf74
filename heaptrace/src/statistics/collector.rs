//! Parallel statistics collection at GC boundaries.

use crate::domain::ClassificationError;
use crate::heap::{GcPhase, HeapSnapshot};
use crate::stream::{ObjectContext, ObjectStream, ObjectVisitor, Outcome, TaskContext, ThreadVisitorGenerator};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use super::model::{MemoryConsumption, SpaceTotals, Statistics};

/// Reachability time may be at most this many times the parse time.
pub const MAX_REACHABLE_OVERHEAD: f64 = 2.0;

/// Decides whether computing reachable bytes is still affordable.
///
/// Tracks time spent replaying the trace against time spent in the
/// reachability walk; once the walk costs more than
/// [`MAX_REACHABLE_OVERHEAD`] times the parse, it is skipped until further
/// parsing brings the ratio back under the limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReachableBudget {
    parse: Duration,
    reachable: Duration,
}

impl ReachableBudget {
    pub fn record_parse(&mut self, elapsed: Duration) {
        self.parse += elapsed;
    }

    pub fn record_reachable(&mut self, elapsed: Duration) {
        self.reachable += elapsed;
    }

    /// Reachability time over parse time
    #[must_use]
    pub fn overhead(&self) -> f64 {
        if self.reachable.is_zero() {
            0.0
        } else if self.parse.is_zero() {
            f64::INFINITY
        } else {
            self.reachable.as_secs_f64() / self.parse.as_secs_f64()
        }
    }

    #[must_use]
    pub fn affordable(&self) -> bool {
        self.overhead() <= MAX_REACHABLE_OVERHEAD
    }
}

/// Collects one [`Statistics`] record per snapshot and keeps them in order.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    workers: usize,
    records: Vec<Statistics>,
    budget: ReachableBudget,
    reachable_enabled: bool,
    skipped: u64,
    /// Whether the previous GC end was over budget
    skipping: bool,
}

impl StatisticsCollector {
    /// `workers == 0` means available parallelism.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self { workers, reachable_enabled: true, ..Self::default() }
    }

    /// Never compute reachable bytes.
    #[must_use]
    pub fn without_reachable_bytes(mut self) -> Self {
        self.reachable_enabled = false;
        self
    }

    /// Account replay time since the previous snapshot.
    pub fn record_parse(&mut self, elapsed: Duration) {
        self.budget.record_parse(elapsed);
    }

    /// Traverse `snapshot` and append its record.
    ///
    /// Reachable bytes are computed only at GC end and only while the budget
    /// allows.
    ///
    /// # Errors
    ///
    /// `WorkerPanicked` if a traversal worker panicked.
    pub fn collect(
        &mut self,
        snapshot: &HeapSnapshot,
        task: &TaskContext,
    ) -> Result<Outcome<&Statistics>, ClassificationError> {
        let Outcome::Completed(spaces) = collect_totals(snapshot, self.workers, task)? else {
            return Ok(Outcome::Cancelled);
        };

        let at_end = snapshot.boundary().is_some_and(|b| b.phase == GcPhase::End);
        let reachable_bytes = if !self.reachable_enabled || !at_end {
            None
        } else if self.budget.affordable() {
            if self.skipping {
                info!("Reachable bytes resumed at overhead {:.2}", self.budget.overhead());
                self.skipping = false;
            }
            let started = Instant::now();
            let bytes = snapshot.reachable_bytes();
            self.budget.record_reachable(started.elapsed());
            Some(bytes)
        } else {
            self.skipped += 1;
            if !self.skipping {
                warn!(
                    "Skipping reachable bytes while overhead {:.2} exceeds {MAX_REACHABLE_OVERHEAD}",
                    self.budget.overhead()
                );
                self.skipping = true;
            }
            None
        };

        self.records.push(Statistics { boundary: snapshot.boundary().cloned(), spaces, reachable_bytes });
        let index = self.records.len() - 1;
        Ok(Outcome::Completed(&self.records[index]))
    }

    #[must_use]
    pub fn records(&self) -> &[Statistics] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Statistics> {
        self.records
    }

    #[must_use]
    pub fn budget(&self) -> &ReachableBudget {
        &self.budget
    }

    /// Snapshots whose reachable bytes were skipped
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Per-space totals of `snapshot`, one private accumulator per worker.
///
/// # Errors
///
/// `WorkerPanicked` if a traversal worker panicked.
pub fn collect_totals(
    snapshot: &HeapSnapshot,
    workers: usize,
    task: &TaskContext,
) -> Result<Outcome<SpaceTotals>, ClassificationError> {
    let outcome = ObjectStream::new(snapshot).workers(workers).parallel(task, &TotalsGenerator)?;
    Ok(outcome.map(|partials| {
        let mut totals = SpaceTotals::default();
        // Known spaces appear even when empty
        for space in snapshot.spaces() {
            totals.by_space.entry(space.id).or_insert_with(MemoryConsumption::default);
        }
        for partial in partials {
            totals.merge(partial.0);
        }
        debug!("Statistics: {} objects, {} bytes", totals.total().objects, totals.total().bytes);
        totals
    }))
}

struct TotalsGenerator;

struct TotalsVisitor(SpaceTotals);

impl ThreadVisitorGenerator for TotalsGenerator {
    type Visitor = TotalsVisitor;

    fn generate(&self, _worker: usize) -> Result<TotalsVisitor, ClassificationError> {
        Ok(TotalsVisitor(SpaceTotals::default()))
    }
}

impl ObjectVisitor for TotalsVisitor {
    fn visit(&mut self, object: &ObjectContext<'_>) -> Result<(), ClassificationError> {
        self.0.record(object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, GcId, SpaceId, ThreadId, TypeId};
    use crate::heap::{GcBoundary, GcInfo, ObjectInfo, SpaceRef};
    use crate::symbols::{AllocationSite, Symbols};
    use heaptrace_common::{Allocator, GcKind, SpaceKind};
    use std::sync::Arc;

    fn snapshot(phase: GcPhase) -> HeapSnapshot {
        let eden = SpaceRef { id: SpaceId(0), kind: Some(SpaceKind::Eden) };
        let old = SpaceRef { id: SpaceId(1), kind: Some(SpaceKind::Old) };
        let boundary = GcBoundary {
            info: GcInfo { id: GcId(1), kind: GcKind::Minor, cause: "test".to_string(), concurrent: false },
            phase,
            failed: false,
        };
        let mut builder = HeapSnapshot::builder(Arc::new(Symbols::new())).boundary(Some(boundary));
        builder.space(eden).space(old).space(SpaceRef { id: SpaceId(2), kind: None });
        for (i, (length, space)) in [(None, eden), (Some(10), eden), (Some(300), old)].into_iter().enumerate() {
            let info = Arc::new(ObjectInfo {
                type_id: TypeId(0),
                site: Arc::new(AllocationSite::unknown()),
                size: 16,
                array_length: length,
                allocator: Allocator::C1,
                thread: ThreadId(1),
            });
            builder.object(Address(0x100 + i as u64 * 16), info, 0, Some(space));
        }
        builder.root(Address(0x100), heaptrace_common::RootKind::Other { kind: 0 });
        builder.finish()
    }

    #[test]
    fn test_totals_by_space_and_shape() {
        let snapshot = snapshot(GcPhase::End);
        let totals = collect_totals(&snapshot, 2, &TaskContext::new()).unwrap().completed().unwrap();
        assert_eq!(totals.eden.memory, MemoryConsumption { objects: 2, bytes: 32 });
        assert_eq!(totals.eden.shapes.small_arrays.objects, 1);
        assert_eq!(totals.old.shapes.big_arrays.objects, 1);
        assert_eq!(totals.eden.allocators.c1, 2);
        assert_eq!(totals.by_space[&SpaceId(2)], MemoryConsumption::default());
    }

    #[test]
    fn test_reachable_only_at_gc_end() {
        let mut collector = StatisticsCollector::new(1);
        collector.record_parse(Duration::from_secs(1));
        let start = collector.collect(&snapshot(GcPhase::Start), &TaskContext::new()).unwrap();
        assert_eq!(start.completed().unwrap().reachable_bytes, None);
        let end = collector.collect(&snapshot(GcPhase::End), &TaskContext::new()).unwrap();
        assert_eq!(end.completed().unwrap().reachable_bytes, Some(16));
        assert_eq!(collector.records().len(), 2);
    }

    #[test]
    fn test_reachable_bytes_resume_once_affordable() {
        let mut collector = StatisticsCollector::new(1);
        collector.record_parse(Duration::from_millis(100));
        collector.budget.record_reachable(Duration::from_secs(1));

        let skipped = collector.collect(&snapshot(GcPhase::End), &TaskContext::new()).unwrap();
        assert_eq!(skipped.completed().unwrap().reachable_bytes, None);
        collector.collect(&snapshot(GcPhase::End), &TaskContext::new()).unwrap();
        assert_eq!(collector.skipped(), 2);
        assert!(collector.skipping);

        collector.record_parse(Duration::from_secs(10));
        let resumed = collector.collect(&snapshot(GcPhase::End), &TaskContext::new()).unwrap();
        assert_eq!(resumed.completed().unwrap().reachable_bytes, Some(16));
        assert!(!collector.skipping);
        assert_eq!(collector.skipped(), 2);
    }

    #[test]
    fn test_budget_threshold() {
        let mut budget = ReachableBudget::default();
        assert!(budget.affordable());
        budget.record_parse(Duration::from_millis(100));
        budget.record_reachable(Duration::from_millis(200));
        assert!(budget.affordable());
        budget.record_reachable(Duration::from_millis(1));
        assert!(!budget.affordable());
    }
}
