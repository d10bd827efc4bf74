//! Classification tree export
//!
//! Two JSON flavours:
//!
//! - **self-describing**: carries the format tag, version, tree kind, the
//!   classifier and filter chains and every counter of every node
//! - **generic**: a plain `{key, path, objects, bytes, children}` tree for
//!   external visualisation tools
//!
//! Both carry the `points_to` / `pointed_from` maps keyed by node path
//! strings when the tree has them. [`read_tree`] accepts either flavour.
//! Member indices are never exported, so imported trees cannot be used for
//! closure computation.

use crate::closure::ClosureSizes;
use crate::domain::ExportError;
use crate::grouping::{full_key_string, ClassificationTree, GroupingNode, PointerMaps, TreeKind};
use crate::registry::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Format tag of self-describing exports
pub const FORMAT_TAG: &str = "heaptrace-tree";

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    #[default]
    SelfDescribing,
    Generic,
}

// ============================================================================
// SELF-DESCRIBING FLAVOUR
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SelfDescribingTree {
    format: String,
    version: u32,
    kind: TreeKind,
    classifiers: Vec<String>,
    #[serde(default)]
    filters: Vec<String>,
    root: SelfDescribingNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pointer_maps: Option<PointerMaps>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SelfDescribingNode {
    key: Key,
    /// Classifier that produced the key; absent for the root and the filtered bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classifier: Option<String>,
    objects: u64,
    bytes: u64,
    #[serde(default)]
    duplicates: u64,
    #[serde(default)]
    duplicate_bytes: u64,
    #[serde(default)]
    leaf_objects: u64,
    #[serde(default)]
    leaf_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closure: Option<ClosureSizes>,
    #[serde(default)]
    children: Vec<SelfDescribingNode>,
}

impl SelfDescribingNode {
    fn from_node(node: &GroupingNode) -> Self {
        Self {
            key: node.key.clone(),
            classifier: node.classifier.clone(),
            objects: node.objects,
            bytes: node.bytes,
            duplicates: node.duplicates,
            duplicate_bytes: node.duplicate_bytes,
            leaf_objects: node.leaf_objects,
            leaf_bytes: node.leaf_bytes,
            closure: node.closure,
            children: node.children.values().map(Self::from_node).collect(),
        }
    }

    fn into_node(self, full_key: Vec<Key>) -> GroupingNode {
        let mut node = GroupingNode::new(self.key, self.classifier, full_key, false);
        node.objects = self.objects;
        node.bytes = self.bytes;
        node.duplicates = self.duplicates;
        node.duplicate_bytes = self.duplicate_bytes;
        node.leaf_objects = self.leaf_objects;
        node.leaf_bytes = self.leaf_bytes;
        node.closure = self.closure;
        for child in self.children {
            let mut child_key = node.full_key.clone();
            child_key.push(child.key.clone());
            let child = child.into_node(child_key);
            node.children.insert(child.key.clone(), child);
        }
        node
    }
}

// ============================================================================
// GENERIC FLAVOUR
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct GenericTree {
    tree: GenericNode,
    #[serde(default)]
    points_to: BTreeMap<String, BTreeMap<String, u64>>,
    #[serde(default)]
    pointed_from: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenericNode {
    key: Key,
    /// Full key path joined by `#`
    path: String,
    objects: u64,
    bytes: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<GenericNode>,
}

impl GenericNode {
    fn from_node(node: &GroupingNode) -> Self {
        Self {
            key: node.key.clone(),
            path: node.full_key_string(),
            objects: node.objects,
            bytes: node.bytes,
            children: node.children.values().map(Self::from_node).collect(),
        }
    }

    /// Counters the generic flavour drops are derived from the children.
    fn into_node(self, full_key: Vec<Key>) -> Result<GroupingNode, ExportError> {
        let path = full_key_string(&full_key);
        if path != self.path {
            return Err(ExportError::InvalidTree(format!("node path '{}' does not match '{path}'", self.path)));
        }
        let mut node = GroupingNode::new(self.key, None, full_key, false);
        node.objects = self.objects;
        node.bytes = self.bytes;
        for child in self.children {
            let mut child_key = node.full_key.clone();
            child_key.push(child.key.clone());
            let child = child.into_node(child_key)?;
            node.children.insert(child.key.clone(), child);
        }
        let child_objects: u64 = node.children.values().map(|c| c.objects).sum();
        let child_bytes: u64 = node.children.values().map(|c| c.bytes).sum();
        if child_objects < node.objects {
            node.leaf_objects = node.objects - child_objects;
            node.leaf_bytes = node.bytes.saturating_sub(child_bytes);
        } else {
            node.duplicates = child_objects - node.objects;
            node.duplicate_bytes = child_bytes.saturating_sub(node.bytes);
        }
        Ok(node)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyTree {
    SelfDescribing(SelfDescribingTree),
    Generic(GenericTree),
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// JSON document for `tree` in `format`.
///
/// # Errors
///
/// `SerializationFailed` if a node cannot be represented as JSON.
pub fn to_json(tree: &ClassificationTree, format: ExportFormat) -> Result<serde_json::Value, ExportError> {
    let value = match format {
        ExportFormat::SelfDescribing => serde_json::to_value(SelfDescribingTree {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            kind: tree.kind(),
            classifiers: tree.classifiers().to_vec(),
            filters: tree.filters().to_vec(),
            root: SelfDescribingNode::from_node(tree.root()),
            pointer_maps: tree.pointer_maps().cloned(),
        }),
        ExportFormat::Generic => {
            let maps = tree.pointer_maps().cloned().unwrap_or_default();
            serde_json::to_value(GenericTree {
                tree: GenericNode::from_node(tree.root()),
                points_to: maps.points_to,
                pointed_from: maps.pointed_from,
            })
        }
    };
    value.map_err(|e| ExportError::SerializationFailed(e.to_string()))
}

/// # Errors
///
/// Serialisation or IO failures.
pub fn write_tree<W: Write>(tree: &ClassificationTree, format: ExportFormat, writer: W) -> Result<(), ExportError> {
    let value = to_json(tree, format)?;
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &value)?;
    writer.flush()?;
    Ok(())
}

/// # Errors
///
/// Serialisation or IO failures.
pub fn export_to_file(tree: &ClassificationTree, format: ExportFormat, path: &Path) -> Result<(), ExportError> {
    write_tree(tree, format, File::create(path)?)
}

/// Read a tree in either flavour.
///
/// # Errors
///
/// `InvalidTree` for unknown format tags, newer versions or inconsistent
/// node paths; `Json`/`Io` for unreadable input.
pub fn read_tree<R: Read>(reader: R) -> Result<ClassificationTree, ExportError> {
    match serde_json::from_reader(BufReader::new(reader))? {
        AnyTree::SelfDescribing(document) => {
            if document.format != FORMAT_TAG {
                return Err(ExportError::InvalidTree(format!("unknown format '{}'", document.format)));
            }
            if document.version > FORMAT_VERSION {
                return Err(ExportError::InvalidTree(format!(
                    "version {} is newer than supported version {FORMAT_VERSION}",
                    document.version
                )));
            }
            let root = document.root.into_node(Vec::new());
            let mut tree = ClassificationTree::from_parts(root, document.classifiers, document.filters, document.kind);
            if let Some(maps) = document.pointer_maps {
                tree.set_pointer_maps(maps);
            }
            Ok(tree)
        }
        AnyTree::Generic(document) => {
            let root = document.tree.into_node(Vec::new())?;
            let mut tree = ClassificationTree::from_parts(root, Vec::new(), Vec::new(), TreeKind::Map);
            if !document.points_to.is_empty() || !document.pointed_from.is_empty() {
                tree.set_pointer_maps(PointerMaps { points_to: document.points_to, pointed_from: document.pointed_from });
            }
            Ok(tree)
        }
    }
}

/// # Errors
///
/// See [`read_tree`].
pub fn import_from_file(path: &Path) -> Result<ClassificationTree, ExportError> {
    read_tree(File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::FILTERED;

    fn tree() -> ClassificationTree {
        let mut tree = ClassificationTree::empty(TreeKind::Map, vec!["Type".to_string(), "Age".to_string()], Vec::new());
        let root = tree.root_mut();
        root.record(None, 3, 48);
        let order = root.child(Key::text("com.acme.Order"), Some("Type"));
        order.record(None, 2, 32);
        let young = order.child(Key::Int(0), Some("Age"));
        young.record(None, 2, 32);
        young.record_leaf(2, 32);
        let filtered = root.child(Key::text(FILTERED), None);
        filtered.record(None, 1, 16);
        filtered.record_leaf(1, 16);
        tree
    }

    #[test]
    fn test_self_describing_round_trip() {
        let tree = tree();
        let mut buffer = Vec::new();
        write_tree(&tree, ExportFormat::SelfDescribing, &mut buffer).unwrap();
        let imported = read_tree(buffer.as_slice()).unwrap();
        assert_eq!(imported, tree);
    }

    #[test]
    fn test_generic_keeps_paths_and_counts() {
        let tree = tree();
        let value = to_json(&tree, ExportFormat::Generic).unwrap();
        assert_eq!(value["tree"]["children"][0]["path"], "Filtered");
        assert_eq!(value["tree"]["children"][1]["children"][0]["path"], "com.acme.Order#0");

        let imported = read_tree(value.to_string().as_bytes()).unwrap();
        let node = imported.find(&[Key::text("com.acme.Order"), Key::Int(0)]).unwrap();
        assert_eq!((node.objects, node.bytes), (2, 32));
        assert_eq!(imported.object_count(), 3);
        assert!(imported.root().check_balance().is_none());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let json = r#"{"format": "other", "version": 1, "kind": "map", "classifiers": [],
                       "root": {"key": "Overall", "objects": 0, "bytes": 0}}"#;
        assert!(matches!(read_tree(json.as_bytes()), Err(ExportError::InvalidTree(_))));
    }
}
