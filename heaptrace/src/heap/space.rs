//! Heap spaces (regions).

use crate::domain::{Address, SpaceId};
use heaptrace_common::{SpaceKind, SpaceMode};
use std::collections::BTreeMap;

/// A contiguous address range announced by the trace.
///
/// `mode` and `kind` are only set between `space_alloc` and `space_release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    pub id: SpaceId,
    pub start: Address,
    pub size: u64,
    pub mode: Option<SpaceMode>,
    pub kind: Option<SpaceKind>,
}

impl Space {
    #[must_use]
    pub fn new(id: SpaceId, start: Address, size: u64) -> Self {
        Self { id, start, size, mode: None, kind: None }
    }

    /// One past the last address of the space
    ///
    /// Spaces are validated on creation, so this never clamps in practice.
    #[must_use]
    pub fn end(&self) -> Address {
        self.start.saturating_offset(self.size)
    }

    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end()
    }

    #[must_use]
    pub fn space_ref(&self) -> SpaceRef {
        SpaceRef { id: self.id, kind: self.kind }
    }
}

/// Space residency recorded on snapshot objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceRef {
    pub id: SpaceId,
    pub kind: Option<SpaceKind>,
}

/// Address-sorted view of the spaces, for per-object lookups.
#[derive(Debug)]
pub struct SpaceIndex {
    ranges: Vec<(Address, Address, SpaceRef)>,
}

impl SpaceIndex {
    #[must_use]
    pub fn new(spaces: &BTreeMap<SpaceId, Space>) -> Self {
        let mut ranges: Vec<_> =
            spaces.values().map(|s| (s.start, s.end(), s.space_ref())).collect();
        ranges.sort_by_key(|(start, _, _)| *start);
        Self { ranges }
    }

    #[must_use]
    pub fn lookup(&self, address: Address) -> Option<SpaceRef> {
        let after = self.ranges.partition_point(|(start, _, _)| *start <= address);
        let (_, end, space) = self.ranges.get(after.checked_sub(1)?)?;
        (address < *end).then_some(*space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_half_open() {
        let space = Space::new(SpaceId(0), Address(0x1000), 0x100);
        assert!(space.contains(Address(0x1000)));
        assert!(space.contains(Address(0x10ff)));
        assert!(!space.contains(Address(0x1100)));
        assert_eq!(space.end(), Address(0x1100));
    }

    #[test]
    fn test_space_index_lookup() {
        let mut spaces = BTreeMap::new();
        spaces.insert(SpaceId(0), Space::new(SpaceId(0), Address(0x2000), 0x100));
        spaces.insert(SpaceId(1), Space::new(SpaceId(1), Address(0x1000), 0x100));
        let index = SpaceIndex::new(&spaces);
        assert_eq!(index.lookup(Address(0x1080)).map(|s| s.id), Some(SpaceId(1)));
        assert_eq!(index.lookup(Address(0x20ff)).map(|s| s.id), Some(SpaceId(0)));
        assert!(index.lookup(Address(0x1100)).is_none());
        assert!(index.lookup(Address(0x10)).is_none());
    }
}
