//! Nodes of a classification tree.

use crate::closure::ClosureSizes;
use crate::domain::ObjectIndex;
use crate::registry::Key;
use std::collections::BTreeMap;
use std::fmt;

use super::members::IndexCollection;

/// Key of the bucket collecting objects rejected by a filter.
pub const FILTERED: &str = "Filtered";

/// Root key of every tree.
pub const OVERALL: &str = "Overall";

/// One group of objects sharing the same key path.
///
/// Counts hold at every node:
///
/// ```text
/// objects == Σ children.objects - duplicates + leaf_objects
/// ```
///
/// `duplicates` is non-zero only below classifiers yielding several sibling
/// keys for one object; `leaf_objects` counts objects whose classification
/// chain ended at this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingNode {
    pub key: Key,
    /// Classifier that produced `key`; `None` for the root and the filtered bucket
    pub classifier: Option<String>,
    /// Keys from the first level down to this node, the root excluded
    pub full_key: Vec<Key>,
    pub objects: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub duplicate_bytes: u64,
    pub leaf_objects: u64,
    pub leaf_bytes: u64,
    pub children: BTreeMap<Key, GroupingNode>,
    /// Snapshot indices of the members, for index-backed trees
    pub members: Option<IndexCollection>,
    pub closure: Option<ClosureSizes>,
}

impl GroupingNode {
    #[must_use]
    pub fn root(retain_members: bool) -> Self {
        Self::new(Key::text(OVERALL), None, Vec::new(), retain_members)
    }

    #[must_use]
    pub fn new(key: Key, classifier: Option<String>, full_key: Vec<Key>, retain_members: bool) -> Self {
        Self {
            key,
            classifier,
            full_key,
            objects: 0,
            bytes: 0,
            duplicates: 0,
            duplicate_bytes: 0,
            leaf_objects: 0,
            leaf_bytes: 0,
            children: BTreeMap::new(),
            members: retain_members.then(IndexCollection::new),
            closure: None,
        }
    }

    /// Depth below the root
    #[must_use]
    pub fn level(&self) -> usize {
        self.full_key.len()
    }

    /// `Type#Allocation Site` style path, empty for the root
    #[must_use]
    pub fn full_key_string(&self) -> String {
        full_key_string(&self.full_key)
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn is_filtered_bucket(&self) -> bool {
        self.classifier.is_none() && self.level() == 1 && self.key == Key::text(FILTERED)
    }

    #[must_use]
    pub fn retains_members(&self) -> bool {
        self.members.is_some()
    }

    /// Count `count` objects of `bytes` in total, remembering `index` when
    /// members are retained.
    pub fn record(&mut self, index: Option<ObjectIndex>, count: u64, bytes: u64) {
        self.objects += count;
        self.bytes += bytes;
        if let (Some(members), Some(index)) = (self.members.as_mut(), index) {
            members.push(index);
        }
    }

    pub fn record_leaf(&mut self, count: u64, bytes: u64) {
        self.leaf_objects += count;
        self.leaf_bytes += bytes;
    }

    /// Child for `key`, created on first use.
    pub fn child(&mut self, key: Key, classifier: Option<&str>) -> &mut GroupingNode {
        let retain = self.retains_members();
        let parent_key = &self.full_key;
        self.children.entry(key).or_insert_with_key(|key| {
            let mut full_key = parent_key.clone();
            full_key.push(key.clone());
            GroupingNode::new(key.clone(), classifier.map(str::to_string), full_key, retain)
        })
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&GroupingNode> {
        self.children.get(key)
    }

    /// Children by descending bytes, then key
    #[must_use]
    pub fn sorted_children(&self) -> Vec<&GroupingNode> {
        let mut children: Vec<&GroupingNode> = self.children.values().collect();
        children.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));
        children
    }

    /// Fold `other` into `self`: matching keys are unioned, counters summed.
    ///
    /// Associative and commutative, so per-worker trees may be merged in any
    /// grouping.
    pub fn merge(&mut self, other: GroupingNode) {
        self.objects += other.objects;
        self.bytes += other.bytes;
        self.duplicates += other.duplicates;
        self.duplicate_bytes += other.duplicate_bytes;
        self.leaf_objects += other.leaf_objects;
        self.leaf_bytes += other.leaf_bytes;
        match (self.members.as_mut(), other.members) {
            (Some(mine), Some(theirs)) => mine.union_with(&theirs),
            (None, Some(theirs)) => self.members = Some(theirs),
            _ => {}
        }
        for (key, child) in other.children {
            match self.children.get_mut(&key) {
                Some(existing) => existing.merge(child),
                None => {
                    self.children.insert(key, child);
                }
            }
        }
    }

    /// Depth-first, pre-order walk
    pub fn walk<'n>(&'n self, visit: &mut impl FnMut(&'n GroupingNode)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut GroupingNode)) {
        visit(self);
        for child in self.children.values_mut() {
            child.walk_mut(visit);
        }
    }

    /// First node violating the count balance, with the expected object count.
    #[must_use]
    pub fn check_balance(&self) -> Option<(&GroupingNode, u64)> {
        if !self.children.is_empty() || self.leaf_objects != self.objects {
            let children: u64 = self.children.values().map(|c| c.objects).sum();
            let expected = (children + self.leaf_objects).saturating_sub(self.duplicates);
            if expected != self.objects {
                return Some((self, expected));
            }
        }
        self.children.values().find_map(GroupingNode::check_balance)
    }
}

impl fmt::Display for GroupingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} objects, {} bytes)", self.key, self.objects, self.bytes)
    }
}

#[must_use]
pub fn full_key_string(keys: &[Key]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join("#")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(parent: &mut GroupingNode, key: &str, index: ObjectIndex, bytes: u64) {
        let child = parent.child(Key::text(key), Some("Type"));
        child.record(Some(index), 1, bytes);
        child.record_leaf(1, bytes);
    }

    #[test]
    fn test_child_full_key() {
        let mut root = GroupingNode::root(true);
        let child = root.child(Key::text("A"), Some("Type")).child(Key::Int(2), Some("Age"));
        assert_eq!(child.level(), 2);
        assert_eq!(child.full_key_string(), "A#2");
        assert!(child.retains_members());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = GroupingNode::root(true);
        a.record(Some(0), 1, 16);
        leaf(&mut a, "X", 0, 16);
        let mut b = GroupingNode::root(true);
        b.record(Some(1), 1, 32);
        leaf(&mut b, "Y", 1, 32);
        let mut c = GroupingNode::root(true);
        c.record(Some(2), 1, 16);
        leaf(&mut c, "X", 2, 16);

        let mut left = a.clone();
        left.merge(b.clone());
        left.merge(c.clone());
        let mut bc = b;
        bc.merge(c);
        let mut right = a;
        right.merge(bc);

        assert_eq!(left, right);
        assert_eq!(left.objects, 3);
        assert_eq!(left.get(&Key::text("X")).unwrap().objects, 2);
        assert_eq!(left.get(&Key::text("X")).unwrap().members.as_ref().unwrap().len(), 2);
        assert!(left.check_balance().is_none());
    }

    #[test]
    fn test_sorted_children_by_bytes() {
        let mut root = GroupingNode::root(false);
        leaf(&mut root, "small", 0, 8);
        leaf(&mut root, "big", 1, 800);
        let order: Vec<String> = root.sorted_children().iter().map(|c| c.key.to_string()).collect();
        assert_eq!(order, vec!["big", "small"]);
    }
}
