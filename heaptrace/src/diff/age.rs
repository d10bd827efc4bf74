//! Counts of objects that no longer exist, grouped by allocation facts and age.

use crate::domain::Address;
use crate::heap::{DiedObject, ObjectInfo};
use crate::stream::{DetachedObject, DetachedPopulation};
use crate::symbols::Symbols;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// `ObjectInfo -> age -> count`, plus running totals.
///
/// Reclaimed objects have no address left to identify them, so they are
/// remembered only as counts of identical objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectAgeCollection {
    counts: HashMap<Arc<ObjectInfo>, BTreeMap<u16, u64>>,
    objects: u64,
    bytes: u64,
}

impl ObjectAgeCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, info: &Arc<ObjectInfo>, age: u16, count: u64) {
        *self.counts.entry(Arc::clone(info)).or_default().entry(age).or_default() += count;
        self.objects += count;
        self.bytes += info.size * count;
    }

    pub fn record_died(&mut self, died: &DiedObject) {
        self.record(&died.info, died.age, 1);
    }

    /// Add every count of `other`.
    pub fn merge(&mut self, other: &ObjectAgeCollection) {
        for (info, ages) in &other.counts {
            for (age, count) in ages {
                self.record(info, *age, *count);
            }
        }
    }

    /// Independent copy with `other` merged in; both inputs stay untouched.
    #[must_use]
    pub fn merged(&self, other: &ObjectAgeCollection) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    #[must_use]
    pub fn object_count(&self) -> u64 {
        self.objects
    }

    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects == 0
    }

    /// Distinct `(info, age)` entries
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.counts.values().map(BTreeMap::len).sum()
    }

    /// Distinct allocation facts recorded so far
    pub fn infos(&self) -> impl Iterator<Item = &Arc<ObjectInfo>> {
        self.counts.keys()
    }

    /// Count of objects sharing `info` and `age`
    #[must_use]
    pub fn count(&self, info: &ObjectInfo, age: u16) -> u64 {
        self.counts.get(info).and_then(|ages| ages.get(&age)).copied().unwrap_or(0)
    }

    /// Counts-only population with one entry per `(info, age)`.
    #[must_use]
    pub fn to_population(&self, symbols: Arc<Symbols>) -> DetachedPopulation {
        let objects = self
            .counts
            .iter()
            .flat_map(|(info, ages)| {
                ages.iter().map(|(age, count)| DetachedObject {
                    address: Address::NULL,
                    info: Arc::clone(info),
                    age: *age,
                    space: None,
                    count: *count,
                })
            })
            .collect();
        DetachedPopulation::new(symbols, objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ThreadId, TypeId};
    use crate::stream::ObjectPopulation;
    use crate::symbols::AllocationSite;
    use heaptrace_common::Allocator;

    fn info(size: u64) -> Arc<ObjectInfo> {
        Arc::new(ObjectInfo {
            type_id: TypeId(1),
            site: Arc::new(AllocationSite::unknown()),
            size,
            array_length: None,
            allocator: Allocator::Interpreter,
            thread: ThreadId(1),
        })
    }

    #[test]
    fn test_record_groups_identical_objects() {
        let mut ages = ObjectAgeCollection::new();
        let small = info(16);
        ages.record(&small, 0, 1);
        ages.record(&info(16), 0, 2);
        ages.record(&small, 3, 1);
        ages.record(&info(32), 0, 1);
        assert_eq!(ages.count(&small, 0), 3);
        assert_eq!(ages.entry_count(), 3);
        assert_eq!(ages.object_count(), 5);
        assert_eq!(ages.byte_count(), 4 * 16 + 32);
    }

    #[test]
    fn test_merged_leaves_inputs_untouched() {
        let mut a = ObjectAgeCollection::new();
        a.record(&info(16), 1, 1);
        let mut b = ObjectAgeCollection::new();
        b.record(&info(16), 1, 2);
        let merged = a.merged(&b);
        assert_eq!(merged.count(&info(16), 1), 3);
        assert_eq!(a.object_count(), 1);
        assert_eq!(b.object_count(), 2);
    }

    #[test]
    fn test_population_keeps_multiplicities() {
        let mut ages = ObjectAgeCollection::new();
        ages.record(&info(8), 0, 4);
        ages.record(&info(8), 2, 1);
        let population = ages.to_population(Arc::new(Symbols::new()));
        assert_eq!(population.len(), 2);
        assert_eq!(population.object_count(), 5);
    }
}
