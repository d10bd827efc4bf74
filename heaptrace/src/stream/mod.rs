//! # Object Stream
//!
//! Traversal over every object of a population, independent of whether the
//! population is an index-backed snapshot or a counts-only view.
//!
//! ## Modes
//!
//! ```text
//! sequential:  filters ──▶ visitor            (position order, one thread)
//!
//! parallel:    [0 .. n/k) ──▶ visitor#0 ─┐
//!              [n/k .. 2n/k) ──▶ visitor#1 ─┼──▶ Vec<visitor> (caller merges)
//!              ...                         ─┘
//! ```
//!
//! Each parallel worker owns a disjoint range and a private visitor produced
//! by a [`ThreadVisitorGenerator`]. No state is shared between workers except
//! the cancellation flag and the progress counter. Visitor errors are never
//! swallowed: the first failing worker (in range order) decides the result.

pub mod context;
pub mod population;
pub mod task;

pub use context::ObjectContext;
pub use population::{
    DetachedObject, DetachedPopulation, ObjectPopulation, SnapshotSubset, SourceCollection,
};
pub use task::{Outcome, TaskContext, PROGRESS_INTERVAL};

use crate::domain::ClassificationError;
use crate::registry::{Filter, FilterVote};
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

/// Number of workers used when the caller does not choose
#[must_use]
pub fn available_workers() -> usize {
    thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Receives every object of a traversal.
pub trait ObjectVisitor: Send {
    /// # Errors
    ///
    /// Any error aborts the traversal and is returned to the caller.
    fn visit(&mut self, object: &ObjectContext<'_>) -> Result<(), ClassificationError>;
}

/// Produces one fresh, unshared visitor per parallel worker.
pub trait ThreadVisitorGenerator: Sync {
    type Visitor: ObjectVisitor;

    /// # Errors
    ///
    /// Returned as the traversal result, e.g. when a classifier cannot be
    /// instantiated for the worker.
    fn generate(&self, worker: usize) -> Result<Self::Visitor, ClassificationError>;
}

/// Apply `filters` in order, short-circuiting on the first `False`.
///
/// `Unknown` defers the decision and counts as a pass.
///
/// # Errors
///
/// The first filter error.
pub fn passes_filters(
    filters: &mut [Box<dyn Filter>],
    object: &ObjectContext<'_>,
) -> Result<bool, ClassificationError> {
    for filter in filters.iter_mut() {
        if filter.filter(object)? == FilterVote::False {
            return Ok(false);
        }
    }
    Ok(true)
}

pub struct ObjectStream<'p, P: ObjectPopulation + ?Sized> {
    population: &'p P,
    workers: usize,
}

impl<'p, P: ObjectPopulation + ?Sized> ObjectStream<'p, P> {
    #[must_use]
    pub fn new(population: &'p P) -> Self {
        Self { population, workers: available_workers() }
    }

    /// Number of parallel workers; `0` means available parallelism.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 { available_workers() } else { workers };
        self
    }

    #[must_use]
    pub fn population(&self) -> &'p P {
        self.population
    }

    /// Visit every object passing `filters`, in position order.
    ///
    /// # Errors
    ///
    /// The first filter or visitor error.
    pub fn for_each<F>(
        &self,
        task: &TaskContext,
        filters: &mut [Box<dyn Filter>],
        mut visitor: F,
    ) -> Result<Outcome<()>, ClassificationError>
    where
        F: FnMut(&ObjectContext<'_>) -> Result<(), ClassificationError>,
    {
        let mut iterated = 0u64;
        for position in 0..self.population.len() {
            if task.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let object = self.population.context(position);
            if passes_filters(filters, &object)? {
                visitor(&object)?;
            }
            iterated += 1;
            if iterated % PROGRESS_INTERVAL == 0 {
                task.report(iterated);
            }
        }
        task.report(iterated);
        Ok(Outcome::Completed(()))
    }

    /// Run one generated visitor per contiguous range and return all of them,
    /// in range order, for the caller to merge.
    ///
    /// # Errors
    ///
    /// The error of the first failing worker, or `WorkerPanicked`.
    pub fn parallel<G: ThreadVisitorGenerator>(
        &self,
        task: &TaskContext,
        generator: &G,
    ) -> Result<Outcome<Vec<G::Visitor>>, ClassificationError> {
        let len = self.population.len();
        let workers = self.workers.clamp(1, len.max(1));
        let chunk = len.div_ceil(workers);
        debug!("Traversing {len} objects with {workers} workers");

        let abort = AtomicBool::new(false);
        let iterated = AtomicU64::new(0);
        let population = self.population;

        let results: Vec<Result<Option<G::Visitor>, ClassificationError>> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let range = (worker * chunk).min(len)..((worker + 1) * chunk).min(len);
                    let (abort, iterated) = (&abort, &iterated);
                    s.spawn(move || -> Result<Option<G::Visitor>, ClassificationError> {
                        let mut visitor = generator.generate(worker)?;
                        let mut local = 0u64;
                        for position in range {
                            if task.is_cancelled() || abort.load(Ordering::Relaxed) {
                                return Ok(None);
                            }
                            if let Err(e) = visitor.visit(&population.context(position)) {
                                abort.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                            local += 1;
                            if local == PROGRESS_INTERVAL {
                                task.report(iterated.fetch_add(local, Ordering::Relaxed) + local);
                                local = 0;
                            }
                        }
                        task.report(iterated.fetch_add(local, Ordering::Relaxed) + local);
                        Ok(Some(visitor))
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().unwrap_or(Err(ClassificationError::WorkerPanicked(worker)))
                })
                .collect()
        });

        let mut visitors = Vec::with_capacity(workers);
        let mut cancelled = false;
        for result in results {
            match result? {
                Some(visitor) => visitors.push(visitor),
                None => cancelled = true,
            }
        }
        if cancelled {
            return Ok(Outcome::Cancelled);
        }
        Ok(Outcome::Completed(visitors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, ThreadId, TypeId};
    use crate::heap::{HeapSnapshot, ObjectInfo};
    use crate::symbols::{AllocationSite, Symbols};
    use heaptrace_common::Allocator;
    use std::sync::Arc;

    fn snapshot(n: u64) -> HeapSnapshot {
        let mut builder = HeapSnapshot::builder(Arc::new(Symbols::new()));
        for i in 0..n {
            let info = Arc::new(ObjectInfo {
                type_id: TypeId(0),
                site: Arc::new(AllocationSite::unknown()),
                size: i + 1,
                array_length: None,
                allocator: Allocator::Vm,
                thread: ThreadId(1),
            });
            builder.object(Address(0x1000 + i * 64), info, 0, None);
        }
        builder.finish()
    }

    struct Summer {
        bytes: u64,
        fail_at: Option<u64>,
    }

    impl ObjectVisitor for Summer {
        fn visit(&mut self, object: &ObjectContext<'_>) -> Result<(), ClassificationError> {
            if Some(object.size()) == self.fail_at {
                return Err(ClassificationError::InvalidKey {
                    classifier: "test".to_string(),
                    reason: "boom".to_string(),
                });
            }
            self.bytes += object.bytes();
            Ok(())
        }
    }

    struct SummerGenerator(Option<u64>);

    impl ThreadVisitorGenerator for SummerGenerator {
        type Visitor = Summer;

        fn generate(&self, _worker: usize) -> Result<Summer, ClassificationError> {
            Ok(Summer { bytes: 0, fail_at: self.0 })
        }
    }

    #[test]
    fn test_sequential_visits_all() {
        let snapshot = snapshot(10);
        let mut total = 0;
        let outcome = ObjectStream::new(&snapshot)
            .for_each(&TaskContext::new(), &mut [], |o| {
                total += o.size();
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Completed(()));
        assert_eq!(total, 55);
    }

    #[test]
    fn test_parallel_partitions_cover_population() {
        let snapshot = snapshot(1000);
        for workers in [1, 3, 8] {
            let visitors = ObjectStream::new(&snapshot)
                .workers(workers)
                .parallel(&TaskContext::new(), &SummerGenerator(None))
                .unwrap()
                .completed()
                .unwrap();
            assert_eq!(visitors.len(), workers);
            assert_eq!(visitors.iter().map(|v| v.bytes).sum::<u64>(), 500_500);
        }
    }

    #[test]
    fn test_parallel_empty_population() {
        let snapshot = snapshot(0);
        let visitors = ObjectStream::new(&snapshot)
            .workers(4)
            .parallel(&TaskContext::new(), &SummerGenerator(None))
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(visitors.len(), 1);
    }

    #[test]
    fn test_parallel_error_propagates() {
        let snapshot = snapshot(100);
        let result = ObjectStream::new(&snapshot)
            .workers(4)
            .parallel(&TaskContext::new(), &SummerGenerator(Some(42)));
        assert!(matches!(result, Err(ClassificationError::InvalidKey { .. })));
    }

    #[test]
    fn test_cancelled_traversal() {
        let snapshot = snapshot(100);
        let task = TaskContext::new();
        task.cancel();
        let outcome = ObjectStream::new(&snapshot)
            .workers(2)
            .parallel(&task, &SummerGenerator(None))
            .unwrap();
        assert!(outcome.is_cancelled());
    }
}
