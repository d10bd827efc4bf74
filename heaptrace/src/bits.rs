//! Fixed-size bit set indexed by snapshot object index.

use crate::domain::ObjectIndex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Bit set able to hold indices `0..len`
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { words: vec![0; len.div_ceil(64)], len }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Set `index`; returns true if it was not set before.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the capacity.
    pub fn insert(&mut self, index: ObjectIndex) -> bool {
        let i = index as usize;
        assert!(i < self.len, "bit index {i} out of range {}", self.len);
        let word = &mut self.words[i / 64];
        let mask = 1u64 << (i % 64);
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    #[must_use]
    pub fn contains(&self, index: ObjectIndex) -> bool {
        let i = index as usize;
        i < self.len && self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn union_with(&mut self, other: &BitSet) {
        if other.len > self.len {
            self.words.resize(other.words.len(), 0);
            self.len = other.len;
        }
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= theirs;
        }
    }

    /// Set indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ObjectIndex> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let base = w * 64;
            (0..64).filter(move |bit| word & (1u64 << bit) != 0).map(move |bit| {
                #[allow(clippy::cast_possible_truncation)]
                let index = (base + bit) as ObjectIndex;
                index
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_freshness() {
        let mut bits = BitSet::new(130);
        assert!(bits.insert(129));
        assert!(!bits.insert(129));
        assert!(bits.contains(129));
        assert!(!bits.contains(128));
        assert!(!bits.contains(500));
        assert_eq!(bits.count(), 1);
    }

    #[test]
    fn test_union_and_iter() {
        let mut a = BitSet::new(70);
        a.insert(1);
        a.insert(65);
        let mut b = BitSet::new(100);
        b.insert(2);
        b.insert(99);
        a.union_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 65, 99]);
    }
}
