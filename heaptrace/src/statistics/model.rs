//! Statistics records.

use crate::domain::SpaceId;
use crate::heap::{GcBoundary, ObjectShape};
use crate::stream::ObjectContext;
use heaptrace_common::{Allocator, SpaceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConsumption {
    pub objects: u64,
    pub bytes: u64,
}

impl MemoryConsumption {
    pub fn add(&mut self, objects: u64, bytes: u64) {
        self.objects += objects;
        self.bytes += bytes;
    }
}

impl AddAssign for MemoryConsumption {
    fn add_assign(&mut self, other: Self) {
        self.add(other.objects, other.bytes);
    }
}

/// Objects per allocating tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorBreakdown {
    pub interpreter: u64,
    pub c1: u64,
    pub c2: u64,
    pub vm: u64,
}

impl AllocatorBreakdown {
    pub fn add(&mut self, allocator: Allocator, objects: u64) {
        match allocator {
            Allocator::Interpreter => self.interpreter += objects,
            Allocator::C1 => self.c1 += objects,
            Allocator::C2 => self.c2 += objects,
            Allocator::Vm => self.vm += objects,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.interpreter + self.c1 + self.c2 + self.vm
    }
}

impl AddAssign for AllocatorBreakdown {
    fn add_assign(&mut self, other: Self) {
        self.interpreter += other.interpreter;
        self.c1 += other.c1;
        self.c2 += other.c2;
        self.vm += other.vm;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeBreakdown {
    pub instances: MemoryConsumption,
    pub small_arrays: MemoryConsumption,
    pub big_arrays: MemoryConsumption,
}

impl ShapeBreakdown {
    pub fn add(&mut self, shape: ObjectShape, objects: u64, bytes: u64) {
        match shape {
            ObjectShape::Instance => self.instances.add(objects, bytes),
            ObjectShape::SmallArray => self.small_arrays.add(objects, bytes),
            ObjectShape::BigArray => self.big_arrays.add(objects, bytes),
        }
    }
}

impl AddAssign for ShapeBreakdown {
    fn add_assign(&mut self, other: Self) {
        self.instances += other.instances;
        self.small_arrays += other.small_arrays;
        self.big_arrays += other.big_arrays;
    }
}

/// Everything known about the objects of one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStatistics {
    pub memory: MemoryConsumption,
    pub allocators: AllocatorBreakdown,
    pub shapes: ShapeBreakdown,
}

impl SpaceStatistics {
    pub fn record(&mut self, object: &ObjectContext<'_>) {
        let (objects, bytes) = (object.count, object.bytes());
        self.memory.add(objects, bytes);
        self.allocators.add(object.info.allocator, objects);
        self.shapes.add(object.info.shape(), objects, bytes);
    }
}

impl AddAssign for SpaceStatistics {
    fn add_assign(&mut self, other: Self) {
        self.memory += other.memory;
        self.allocators += other.allocators;
        self.shapes += other.shapes;
    }
}

/// Field-wise sums over one snapshot; merging in any order gives the same
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceTotals {
    pub eden: SpaceStatistics,
    pub survivor: SpaceStatistics,
    pub old: SpaceStatistics,
    /// Objects outside any allocated space
    pub unassigned: SpaceStatistics,
    pub by_space: BTreeMap<SpaceId, MemoryConsumption>,
}

impl SpaceTotals {
    pub fn record(&mut self, object: &ObjectContext<'_>) {
        let kind = object.space.and_then(|space| space.kind);
        self.kind_mut(kind).record(object);
        if let Some(space) = object.space {
            self.by_space.entry(space.id).or_default().add(object.count, object.bytes());
        }
    }

    pub fn merge(&mut self, other: SpaceTotals) {
        self.eden += other.eden;
        self.survivor += other.survivor;
        self.old += other.old;
        self.unassigned += other.unassigned;
        for (space, memory) in other.by_space {
            *self.by_space.entry(space).or_default() += memory;
        }
    }

    #[must_use]
    pub fn kind(&self, kind: Option<SpaceKind>) -> &SpaceStatistics {
        match kind {
            Some(SpaceKind::Eden) => &self.eden,
            Some(SpaceKind::Survivor) => &self.survivor,
            Some(SpaceKind::Old) => &self.old,
            None => &self.unassigned,
        }
    }

    fn kind_mut(&mut self, kind: Option<SpaceKind>) -> &mut SpaceStatistics {
        match kind {
            Some(SpaceKind::Eden) => &mut self.eden,
            Some(SpaceKind::Survivor) => &mut self.survivor,
            Some(SpaceKind::Old) => &mut self.old,
            None => &mut self.unassigned,
        }
    }

    #[must_use]
    pub fn total(&self) -> MemoryConsumption {
        let mut total = MemoryConsumption::default();
        for stats in [&self.eden, &self.survivor, &self.old, &self.unassigned] {
            total += stats.memory;
        }
        total
    }
}

/// One record per observed GC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub boundary: Option<GcBoundary>,
    pub spaces: SpaceTotals,
    /// Bytes reachable from GC roots, when it was affordable to compute
    pub reachable_bytes: Option<u64>,
}

impl Statistics {
    /// Objects in the space with `id`; zero for known but empty spaces.
    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<MemoryConsumption> {
        self.spaces.by_space.get(&id).copied()
    }

    #[must_use]
    pub fn total(&self) -> MemoryConsumption {
        self.spaces.total()
    }
}
