//! Tracks the objects alive at the start of a diff window across every
//! collection inside it.
//!
//! ```text
//!   GC from ─────── GC k ─────── GC k+1 ─────── GC to
//!   start snapshot  died/remap   died/remap     end snapshot
//!   tracked = all   - died       - died         perm  = tracked ∩ end
//!                   ↦ remap      ↦ remap        born  = end \ perm
//! ```
//!
//! Tracked objects remember their index in the start snapshot. A reclaimed
//! object is Died when it was tracked and Temp otherwise.
//!
//! Died objects and the start view of Perm are classified on the start
//! snapshot, Born and the end view of Perm on the end snapshot, so every
//! classifier sees an object as the heap was at that end of the window. Temp
//! objects exist in neither snapshot; they are classified from the counts
//! captured at reclamation, and only when every unit of the chain runs on
//! such a population.

use crate::domain::{Address, ClassificationError, GcId, ObjectIndex, ThreadId};
use crate::grouping::{ClassificationTree, Grouper};
use crate::heap::{GcOutcome, HeapSnapshot};
use crate::stream::{Outcome, SnapshotSubset, SourceCollection, TaskContext};
use crate::trace::HeapListener;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::age::ObjectAgeCollection;
use super::pbdt::PermBornDiedTempGrouping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Waiting,
    Open,
    Closed,
}

/// Diff window between the ends of two collections.
#[derive(Debug)]
pub struct HeapEvolution {
    from: GcId,
    to: GcId,
    state: WindowState,
    start: Option<Arc<HeapSnapshot>>,
    end: Option<Arc<HeapSnapshot>>,
    /// Current address -> start snapshot index of window-start objects still alive
    tracked: BTreeMap<Address, ObjectIndex>,
    /// Start snapshot indices of the tracked objects reclaimed so far
    died_at_start: Vec<ObjectIndex>,
    died: ObjectAgeCollection,
    temp: ObjectAgeCollection,
}

impl HeapEvolution {
    /// Window from the end of collection `from` to the end of `to`.
    #[must_use]
    pub fn new(from: GcId, to: GcId) -> Self {
        Self {
            from,
            to,
            state: WindowState::Waiting,
            start: None,
            end: None,
            tracked: BTreeMap::new(),
            died_at_start: Vec::new(),
            died: ObjectAgeCollection::new(),
            temp: ObjectAgeCollection::new(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == WindowState::Closed
    }

    #[must_use]
    pub fn start_snapshot(&self) -> Option<&Arc<HeapSnapshot>> {
        self.start.as_ref()
    }

    #[must_use]
    pub fn end_snapshot(&self) -> Option<&Arc<HeapSnapshot>> {
        self.end.as_ref()
    }

    #[must_use]
    pub fn died(&self) -> &ObjectAgeCollection {
        &self.died
    }

    #[must_use]
    pub fn temp(&self) -> &ObjectAgeCollection {
        &self.temp
    }

    /// Window-start objects still alive
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn open(&mut self, snapshot: &Arc<HeapSnapshot>) {
        self.tracked = (0..).zip(snapshot.objects()).map(|(index, object)| (object.address, index)).collect();
        self.start = Some(Arc::clone(snapshot));
        self.state = WindowState::Open;
        info!("Diff window opened at {} with {} objects", self.from, self.tracked.len());
    }

    /// Apply one collection's deaths and moves to the tracked set.
    fn advance(&mut self, outcome: &GcOutcome) {
        for died in &outcome.died {
            if let Some(index) = self.tracked.remove(&died.address) {
                self.died_at_start.push(index);
                self.died.record_died(died);
            } else {
                self.temp.record_died(died);
            }
        }
        // Remove every mover first; moves may chain through freed addresses
        let moved: Vec<(Address, ObjectIndex)> = outcome
            .remap
            .iter()
            .filter_map(|(from, to)| self.tracked.remove(&from).map(|index| (to, index)))
            .collect();
        self.tracked.extend(moved);
        debug!(
            "{}: {} tracked, {} died, {} temp",
            outcome.info.id,
            self.tracked.len(),
            self.died.object_count(),
            self.temp.object_count()
        );
    }

    /// Classify the partitions of the closed window with `grouper`.
    ///
    /// Temp is left out when a unit of the chain needs pointer or root
    /// information.
    ///
    /// # Errors
    ///
    /// `IncompleteWindow` while the trace has not reached the window end, or
    /// any classification error.
    pub fn grouping(
        &self,
        grouper: &Grouper<'_>,
        task: &TaskContext,
    ) -> Result<Outcome<PermBornDiedTempGrouping>, ClassificationError> {
        let (Some(start), Some(end), WindowState::Closed) = (&self.start, &self.end, self.state) else {
            return Err(ClassificationError::IncompleteWindow { from: self.from, to: self.to });
        };
        let (start, end) = (start.as_ref(), end.as_ref());

        let mut perm_start: Vec<ObjectIndex> = Vec::with_capacity(self.tracked.len());
        let mut perm_end: Vec<ObjectIndex> = Vec::with_capacity(self.tracked.len());
        let mut died = self.died_at_start.clone();
        let mut vanished = 0usize;
        for (address, &index) in &self.tracked {
            match end.index_of(*address) {
                Some(at_end) => {
                    perm_start.push(index);
                    perm_end.push(at_end);
                }
                None => {
                    vanished += 1;
                    died.push(index);
                }
            }
        }
        if vanished > 0 {
            warn!("{vanished} window-start objects vanished without being reclaimed; counting them as died");
        }
        let perm_set: BTreeSet<ObjectIndex> = perm_end.iter().copied().collect();
        #[allow(clippy::cast_possible_truncation)]
        let born: Vec<ObjectIndex> =
            (0..end.len() as ObjectIndex).filter(|index| !perm_set.contains(index)).collect();

        let classify = |snapshot: &HeapSnapshot, indices: Vec<ObjectIndex>| {
            grouper.list(&SnapshotSubset::new(snapshot, indices), task)
        };
        let Outcome::Completed(perm_start) = classify(start, perm_start)? else {
            return Ok(Outcome::Cancelled);
        };
        let Outcome::Completed(perm_end) = classify(end, perm_end)? else {
            return Ok(Outcome::Cancelled);
        };
        let Outcome::Completed(born) = classify(end, born)? else {
            return Ok(Outcome::Cancelled);
        };
        let Outcome::Completed(died) = classify(start, died)? else {
            return Ok(Outcome::Cancelled);
        };
        let Outcome::Completed(temp) = self.temp_tree(grouper, task, start, end)? else {
            return Ok(Outcome::Cancelled);
        };
        Ok(Outcome::Completed(PermBornDiedTempGrouping { perm_start, perm_end, born, died, temp }))
    }

    /// Temp tree, `None` when the chain cannot classify it.
    fn temp_tree(
        &self,
        grouper: &Grouper<'_>,
        task: &TaskContext,
        start: &HeapSnapshot,
        end: &HeapSnapshot,
    ) -> Result<Outcome<Option<ClassificationTree>>, ClassificationError> {
        if !grouper.runs_on(SourceCollection::Streaming) {
            info!(
                "Leaving out {} temp objects: the chain needs pointer or root information",
                self.temp.object_count()
            );
            return Ok(Outcome::Completed(None));
        }
        let temp = self.temp.to_population(Arc::clone(end.symbols())).with_threads(self.thread_names(start, end));
        Ok(grouper.map(&temp, task)?.map(Some))
    }

    /// Names of the threads that allocated temp objects.
    fn thread_names(&self, start: &HeapSnapshot, end: &HeapSnapshot) -> HashMap<ThreadId, String> {
        let mut threads = HashMap::new();
        for info in self.temp.infos() {
            let name = end.thread_name(info.thread).or_else(|| start.thread_name(info.thread));
            if let Some(name) = name {
                threads.entry(info.thread).or_insert_with(|| name.to_string());
            }
        }
        threads
    }
}

impl HeapListener for HeapEvolution {
    fn gc_end(&mut self, outcome: &GcOutcome, snapshot: &Arc<HeapSnapshot>) {
        let id = outcome.info.id;
        match self.state {
            WindowState::Waiting if id == self.from => {
                self.open(snapshot);
                if id == self.to {
                    self.end = Some(Arc::clone(snapshot));
                    self.state = WindowState::Closed;
                }
            }
            WindowState::Open => {
                self.advance(outcome);
                if id == self.to {
                    self.end = Some(Arc::clone(snapshot));
                    self.state = WindowState::Closed;
                    info!(
                        "Diff window closed at {id}: {} perm, {} died, {} temp",
                        self.tracked.len(),
                        self.died.object_count(),
                        self.temp.object_count()
                    );
                }
            }
            WindowState::Waiting | WindowState::Closed => {}
        }
    }
}
