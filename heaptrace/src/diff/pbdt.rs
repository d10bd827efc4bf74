//! Perm / Born / Died / Temp trees of one diff window.
//!
//! Perm is classified twice: as its objects were at the window start and as
//! they are at the window end. Keys that change over time (space, age, roots)
//! may differ between the two views, so `before` adds Died to the start view
//! and `after` adds Born to the end view.

use crate::grouping::{full_key_string, ClassificationTree, GroupingNode};
use crate::registry::Key;
use crate::statistics::MemoryConsumption;
use std::collections::BTreeSet;
use std::fmt;

/// Which of the four partitions an object ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Alive at both ends of the window
    Perm,
    /// Alive at the end only
    Born,
    /// Alive at the start only
    Died,
    /// Allocated and reclaimed inside the window
    Temp,
}

/// One key path of the union of the trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRow {
    pub full_key: Vec<Key>,
    /// Perm objects keyed as they were at the window start
    pub perm_start: MemoryConsumption,
    /// Perm objects keyed as they are at the window end
    pub perm_end: MemoryConsumption,
    pub born: MemoryConsumption,
    pub died: MemoryConsumption,
    /// `None` when the chain could not classify temp objects
    pub temp: Option<MemoryConsumption>,
}

impl DiffRow {
    /// Objects of this group alive at the window start
    #[must_use]
    pub fn before(&self) -> MemoryConsumption {
        let mut before = self.perm_start;
        before += self.died;
        before
    }

    /// Objects of this group alive at the window end
    #[must_use]
    pub fn after(&self) -> MemoryConsumption {
        let mut after = self.perm_end;
        after += self.born;
        after
    }
}

/// A key path whose start or end counts disagree with the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imbalance {
    pub path: String,
    pub expected_before: MemoryConsumption,
    pub before: MemoryConsumption,
    pub expected_after: MemoryConsumption,
    pub after: MemoryConsumption,
}

impl fmt::Display for Imbalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': before {}/{} (perm + died {}/{}), after {}/{} (perm + born {}/{})",
            self.path,
            self.before.objects,
            self.before.bytes,
            self.expected_before.objects,
            self.expected_before.bytes,
            self.after.objects,
            self.after.bytes,
            self.expected_after.objects,
            self.expected_after.bytes,
        )
    }
}

/// The partitions of a diff window, classified by the same chain.
#[derive(Debug, Clone)]
pub struct PermBornDiedTempGrouping {
    /// Perm on the start snapshot
    pub perm_start: ClassificationTree,
    /// Perm on the end snapshot
    pub perm_end: ClassificationTree,
    /// On the end snapshot
    pub born: ClassificationTree,
    /// On the start snapshot
    pub died: ClassificationTree,
    /// Counts only; absent when a unit of the chain needs pointers or roots
    pub temp: Option<ClassificationTree>,
}

impl PermBornDiedTempGrouping {
    /// Tree of `lifetime`; Perm is the start view.
    #[must_use]
    pub fn tree(&self, lifetime: Lifetime) -> Option<&ClassificationTree> {
        match lifetime {
            Lifetime::Perm => Some(&self.perm_start),
            Lifetime::Born => Some(&self.born),
            Lifetime::Died => Some(&self.died),
            Lifetime::Temp => self.temp.as_ref(),
        }
    }

    /// Keys of the children of `path` in any of the trees
    #[must_use]
    pub fn children(&self, path: &[Key]) -> BTreeSet<Key> {
        self.nodes(path)
            .into_iter()
            .flatten()
            .flat_map(|node| node.children.keys().cloned())
            .collect()
    }

    /// Counts of `path` in every tree, zero where the path is absent.
    #[must_use]
    pub fn row(&self, path: &[Key]) -> DiffRow {
        let [perm_start, perm_end, born, died, temp] = self.nodes(path).map(consumption);
        DiffRow {
            full_key: path.to_vec(),
            perm_start,
            perm_end,
            born,
            died,
            temp: self.temp.is_some().then_some(temp),
        }
    }

    /// Every key path of the union, depth first, children in key order.
    #[must_use]
    pub fn rows(&self) -> Vec<DiffRow> {
        let mut rows = Vec::new();
        let mut pending = vec![Vec::new()];
        while let Some(path) = pending.pop() {
            // Reverse so the smallest key is visited first
            for key in self.children(&path).into_iter().rev() {
                let mut child = path.clone();
                child.push(key);
                pending.push(child);
            }
            rows.push(self.row(&path));
        }
        rows
    }

    /// Paths where `before != perm_start + died` or `after != perm_end + born`.
    ///
    /// `before` and `after` are the trees of the window's start and end
    /// snapshots built with the same chain.
    #[must_use]
    pub fn imbalances(&self, before: &ClassificationTree, after: &ClassificationTree) -> Vec<Imbalance> {
        let mut paths: BTreeSet<Vec<Key>> = BTreeSet::new();
        for tree in [&self.perm_start, &self.perm_end, &self.born, &self.died, before, after]
            .into_iter()
            .chain(self.temp.as_ref())
        {
            tree.root().walk(&mut |node: &GroupingNode| {
                paths.insert(node.full_key.clone());
            });
        }
        paths
            .into_iter()
            .filter_map(|path| {
                let row = self.row(&path);
                let at_start = consumption(before.find(&path));
                let at_end = consumption(after.find(&path));
                (row.before() != at_start || row.after() != at_end).then(|| Imbalance {
                    path: full_key_string(&path),
                    expected_before: row.before(),
                    before: at_start,
                    expected_after: row.after(),
                    after: at_end,
                })
            })
            .collect()
    }

    fn nodes(&self, path: &[Key]) -> [Option<&GroupingNode>; 5] {
        [
            Some(&self.perm_start),
            Some(&self.perm_end),
            Some(&self.born),
            Some(&self.died),
            self.temp.as_ref(),
        ]
        .map(|tree| tree.and_then(|tree| tree.find(path)))
    }
}

fn consumption(node: Option<&GroupingNode>) -> MemoryConsumption {
    node.map_or_else(MemoryConsumption::default, |node| MemoryConsumption { objects: node.objects, bytes: node.bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::TreeKind;

    fn tree(groups: &[(&str, u64)]) -> ClassificationTree {
        let mut tree = ClassificationTree::empty(TreeKind::Map, vec!["Type".to_string()], Vec::new());
        for (name, objects) in groups {
            let root = tree.root_mut();
            root.record(None, *objects, objects * 8);
            let child = root.child(Key::text(*name), Some("Type"));
            child.record(None, *objects, objects * 8);
            child.record_leaf(*objects, objects * 8);
        }
        tree
    }

    fn grouping() -> PermBornDiedTempGrouping {
        PermBornDiedTempGrouping {
            perm_start: tree(&[("A", 2)]),
            perm_end: tree(&[("A", 2)]),
            born: tree(&[("B", 1)]),
            died: tree(&[("A", 1), ("C", 1)]),
            temp: Some(tree(&[("D", 5)])),
        }
    }

    #[test]
    fn test_union_children() {
        let keys: Vec<Key> = grouping().children(&[]).into_iter().collect();
        assert_eq!(
            keys,
            vec![Key::text("A"), Key::text("B"), Key::text("C"), Key::text("D"), Key::text("Filtered")]
        );
    }

    #[test]
    fn test_rows_cover_the_union() {
        let rows = grouping().rows();
        assert_eq!(rows[0].full_key, Vec::<Key>::new());
        assert_eq!(rows[1].full_key, vec![Key::text("A")]);
        assert_eq!(rows[1].before(), MemoryConsumption { objects: 3, bytes: 24 });
        assert_eq!(rows[1].after(), MemoryConsumption { objects: 2, bytes: 16 });
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn test_imbalances() {
        let grouping = grouping();
        let before = tree(&[("A", 3), ("C", 1)]);
        let after = tree(&[("A", 2), ("B", 1)]);
        assert!(grouping.imbalances(&before, &after).is_empty());

        let after = tree(&[("A", 3), ("B", 1)]);
        let imbalances = grouping.imbalances(&before, &after);
        assert_eq!(imbalances.len(), 2);
        assert_eq!(imbalances[0].path, "");
        assert_eq!(imbalances[1].path, "A");
    }

    #[test]
    fn test_perm_keys_may_move_between_views() {
        // Two perm objects were A at the start and are E at the end
        let grouping = PermBornDiedTempGrouping {
            perm_start: tree(&[("A", 2)]),
            perm_end: tree(&[("E", 2)]),
            born: tree(&[("B", 1)]),
            died: tree(&[("C", 1)]),
            temp: None,
        };
        let before = tree(&[("A", 2), ("C", 1)]);
        let after = tree(&[("E", 2), ("B", 1)]);
        assert!(grouping.imbalances(&before, &after).is_empty());

        let a = grouping.row(&[Key::text("A")]);
        assert_eq!(a.perm_start.objects, 2);
        assert_eq!(a.perm_end.objects, 0);
        assert_eq!(a.temp, None);
        assert!(grouping.tree(Lifetime::Temp).is_none());
        assert_eq!(grouping.children(&[]).len(), 5);
    }
}
