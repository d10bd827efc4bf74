//! Classification trees and their pointer maps.

use crate::domain::ObjectIndex;
use crate::heap::HeapSnapshot;
use crate::registry::{chain_label, Key};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::node::{GroupingNode, FILTERED};

/// Storage variant of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Built over a snapshot; every node keeps its member indices
    List,
    /// Counts only
    Map,
}

/// `path -> {path -> pointer count}` between leaves, both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerMaps {
    pub points_to: BTreeMap<String, BTreeMap<String, u64>>,
    pub pointed_from: BTreeMap<String, BTreeMap<String, u64>>,
}

impl PointerMaps {
    /// Count snapshot pointers between the leaves of `root`.
    ///
    /// An object reached through several sibling keys belongs to several
    /// leaves; each of its pointers is counted once per leaf pair.
    #[must_use]
    pub fn compute(root: &GroupingNode, snapshot: &HeapSnapshot) -> Self {
        let mut leaves: Vec<(String, &GroupingNode)> = Vec::new();
        root.walk(&mut |node| {
            if node.level() > 0 && node.is_leaf() {
                leaves.push((node.full_key_string(), node));
            }
        });

        let mut owners: HashMap<ObjectIndex, Vec<usize>> = HashMap::new();
        for (leaf, (_, node)) in leaves.iter().enumerate() {
            if let Some(members) = &node.members {
                for index in members.iter() {
                    owners.entry(index).or_default().push(leaf);
                }
            }
        }

        let mut maps = PointerMaps::default();
        for (from_path, node) in &leaves {
            let Some(members) = &node.members else { continue };
            for index in members.iter() {
                for target in snapshot.points_to(index) {
                    for &to_leaf in owners.get(target).map_or(&[][..], Vec::as_slice) {
                        let to_path = &leaves[to_leaf].0;
                        *maps.points_to.entry(from_path.clone()).or_default().entry(to_path.clone()).or_default() += 1;
                        *maps
                            .pointed_from
                            .entry(to_path.clone())
                            .or_default()
                            .entry(from_path.clone())
                            .or_default() += 1;
                    }
                }
            }
        }
        maps
    }
}

/// Root node plus the chain that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationTree {
    root: GroupingNode,
    classifiers: Vec<String>,
    filters: Vec<String>,
    kind: TreeKind,
    pointer_maps: Option<PointerMaps>,
}

impl ClassificationTree {
    /// Empty tree: a root with a zero-count filtered bucket.
    #[must_use]
    pub fn empty(kind: TreeKind, classifiers: Vec<String>, filters: Vec<String>) -> Self {
        let mut root = GroupingNode::root(kind == TreeKind::List);
        root.child(Key::text(FILTERED), None);
        Self { root, classifiers, filters, kind, pointer_maps: None }
    }

    #[must_use]
    pub fn from_parts(root: GroupingNode, classifiers: Vec<String>, filters: Vec<String>, kind: TreeKind) -> Self {
        Self { root, classifiers, filters, kind, pointer_maps: None }
    }

    #[must_use]
    pub fn root(&self) -> &GroupingNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut GroupingNode {
        &mut self.root
    }

    #[must_use]
    pub fn classifiers(&self) -> &[String] {
        &self.classifiers
    }

    #[must_use]
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    #[must_use]
    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// `(Type) -> (Allocation Site)`
    #[must_use]
    pub fn chain_label(&self) -> String {
        chain_label(&self.classifiers)
    }

    #[must_use]
    pub fn object_count(&self) -> u64 {
        self.root.objects
    }

    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.root.bytes
    }

    /// The bucket of objects rejected by a filter.
    #[must_use]
    pub fn filtered(&self) -> Option<&GroupingNode> {
        self.root.get(&Key::text(FILTERED)).filter(|node| node.is_filtered_bucket())
    }

    /// Node at `path` below the root; the empty path is the root itself.
    #[must_use]
    pub fn find(&self, path: &[Key]) -> Option<&GroupingNode> {
        path.iter().try_fold(&self.root, |node, key| node.get(key))
    }

    /// Nodes without children, the filtered bucket included, in key order
    #[must_use]
    pub fn leaves(&self) -> Vec<&GroupingNode> {
        let mut leaves = Vec::new();
        self.root.walk(&mut |node| {
            if node.level() > 0 && node.is_leaf() {
                leaves.push(node);
            }
        });
        leaves
    }

    #[must_use]
    pub fn pointer_maps(&self) -> Option<&PointerMaps> {
        self.pointer_maps.as_ref()
    }

    pub fn set_pointer_maps(&mut self, maps: PointerMaps) {
        self.pointer_maps = Some(maps);
    }

    /// Drop every group, keeping the chain metadata.
    pub fn clear(&mut self) {
        let mut root = GroupingNode::root(self.kind == TreeKind::List);
        root.child(Key::text(FILTERED), None);
        self.root = root;
        self.pointer_maps = None;
    }

    /// Whether closure sizes were computed for this tree
    #[must_use]
    pub fn has_closures(&self) -> bool {
        self.root.closure.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree_has_filtered_bucket() {
        let tree = ClassificationTree::empty(TreeKind::List, vec!["Type".to_string()], Vec::new());
        assert_eq!(tree.object_count(), 0);
        let filtered = tree.filtered().unwrap();
        assert_eq!(filtered.objects, 0);
        assert_eq!(filtered.full_key_string(), "Filtered");
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.chain_label(), "(Type)");
    }

    #[test]
    fn test_find_and_clear() {
        let mut tree = ClassificationTree::empty(TreeKind::Map, vec!["Type".to_string()], Vec::new());
        tree.root_mut().record(None, 2, 64);
        let child = tree.root_mut().child(Key::text("A"), Some("Type"));
        child.record(None, 2, 64);
        child.record_leaf(2, 64);

        assert_eq!(tree.find(&[Key::text("A")]).unwrap().objects, 2);
        assert_eq!(tree.find(&[]).unwrap().objects, 2);
        assert!(tree.find(&[Key::text("B")]).is_none());

        tree.clear();
        assert_eq!(tree.object_count(), 0);
        assert!(tree.find(&[Key::text("A")]).is_none());
        assert!(tree.filtered().is_some());
    }
}
