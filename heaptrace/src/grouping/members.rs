//! Compact sets of snapshot indices.

use crate::domain::ObjectIndex;
use serde::{Deserialize, Serialize};

/// Sorted snapshot indices stored as run-length ranges.
///
/// Workers visit indices in ascending order, so most pushes extend the last
/// run. Out-of-order pushes are still accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCollection {
    /// `(first, len)`, sorted and non-adjacent
    runs: Vec<(ObjectIndex, u32)>,
    len: u64,
}

impl IndexCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: ObjectIndex) {
        let end = self.runs.last().map(|&(first, len)| u64::from(first) + u64::from(len));
        match end {
            Some(end) if end == u64::from(index) => {
                if let Some((_, len)) = self.runs.last_mut() {
                    *len += 1;
                }
            }
            Some(end) if u64::from(index) < end => {
                if !self.contains(index) {
                    self.union_with(&Self::from_iter([index]));
                }
                return;
            }
            _ => self.runs.push((index, 1)),
        }
        self.len += 1;
    }

    /// Union with `other`, keeping the run list canonical.
    #[allow(clippy::cast_possible_truncation)]
    pub fn union_with(&mut self, other: &IndexCollection) {
        if other.runs.is_empty() {
            return;
        }
        let mut merged: Vec<(ObjectIndex, u32)> = Vec::with_capacity(self.runs.len() + other.runs.len());
        let mut left = self.runs.iter().peekable();
        let mut right = other.runs.iter().peekable();
        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) if a.0 <= b.0 => left.next(),
                (Some(_), Some(_)) | (None, Some(_)) => right.next(),
                (Some(_), None) => left.next(),
                (None, None) => break,
            };
            let Some(&(first, len)) = next else { break };
            let end = u64::from(first) + u64::from(len);
            match merged.last_mut() {
                Some((last_first, last_len)) if u64::from(*last_first) + u64::from(*last_len) >= u64::from(first) => {
                    let last_end = u64::from(*last_first) + u64::from(*last_len);
                    if end > last_end {
                        *last_len = (end - u64::from(*last_first)) as u32;
                    }
                }
                _ => merged.push((first, len)),
            }
        }
        self.len = merged.iter().map(|&(_, len)| u64::from(len)).sum();
        self.runs = merged;
    }

    #[must_use]
    pub fn contains(&self, index: ObjectIndex) -> bool {
        let position = self.runs.partition_point(|&(first, _)| first <= index);
        position > 0 && {
            let (first, len) = self.runs[position - 1];
            u64::from(index) < u64::from(first) + u64::from(len)
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of runs, a measure of fragmentation
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectIndex> + '_ {
        self.runs.iter().flat_map(|&(first, len)| first..first + len)
    }
}

impl FromIterator<ObjectIndex> for IndexCollection {
    fn from_iter<I: IntoIterator<Item = ObjectIndex>>(iter: I) -> Self {
        let mut indices: Vec<ObjectIndex> = iter.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        let mut collection = Self::new();
        for index in indices {
            collection.push(index);
        }
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascending_push_coalesces() {
        let mut members = IndexCollection::new();
        for index in [0, 1, 2, 5, 6, 9] {
            members.push(index);
        }
        assert_eq!(members.len(), 6);
        assert_eq!(members.run_count(), 3);
        assert!(members.contains(6));
        assert!(!members.contains(4));
        assert_eq!(members.iter().collect::<Vec<_>>(), vec![0, 1, 2, 5, 6, 9]);
    }

    #[test]
    fn test_out_of_order_push() {
        let mut members: IndexCollection = [4, 5, 6].into_iter().collect();
        members.push(1);
        members.push(5);
        assert_eq!(members.iter().collect::<Vec<_>>(), vec![1, 4, 5, 6]);
        assert_eq!(members.len(), 4);
    }

    #[test]
    fn test_union_joins_adjacent_runs() {
        let mut a: IndexCollection = [0, 1, 2, 10].into_iter().collect();
        let b: IndexCollection = [3, 4, 9, 11].into_iter().collect();
        a.union_with(&b);
        assert_eq!(a.run_count(), 2);
        assert_eq!(a.len(), 8);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 9, 10, 11]);
    }
}
