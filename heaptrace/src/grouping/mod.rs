//! # Classification Trees
//!
//! A filter chain then a classifier chain applied to every object of a
//! population. Each classifier adds one level of nesting; rejected objects
//! go to a `Filtered` bucket directly below the root.
//!
//! ```text
//! Overall (120 objects)
//! ├── Filtered (20)
//! ├── com.acme.Order (60)
//! │   ├── Shop::buy():3 (45)
//! │   └── Shop::restock():9 (15)
//! └── com.acme.Item (40)
//!     └── Shop::buy():7 (40)
//! ```
//!
//! Two storage variants:
//!
//! - [`TreeKind::List`]: built over a snapshot, every node keeps its member
//!   indices, which closures and pointer maps need
//! - [`TreeKind::Map`]: counts only, for populations without pointer data

pub mod builder;
pub mod members;
pub mod node;
pub mod tree;

pub use builder::{Grouper, GroupingWorker};
pub use members::IndexCollection;
pub use node::{full_key_string, GroupingNode, FILTERED, OVERALL};
pub use tree::{ClassificationTree, PointerMaps, TreeKind};
