//! Metadata shared by classifiers and filters.

use crate::domain::ClassificationError;
use crate::heap::HeapSnapshot;
use crate::stream::SourceCollection;
use crate::symbols::Symbols;
use serde::{Deserialize, Serialize};

/// What a unit looks at. Lets callers ask the registry for "any classifier
/// that groups by type" without knowing its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Type,
    AllocationSite,
    CallStack,
    Space,
    Thread,
    Allocator,
    Age,
    Roots,
    Pointers,
    Shape,
    DataStructure,
    Plugin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Bool,
    Integer,
    Text,
    Choice(Vec<String>),
}

/// One user-configurable setting of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub presentation_name: String,
    pub kind: PropertyKind,
    pub value: String,
}

impl Property {
    #[must_use]
    pub fn new(name: &str, kind: PropertyKind, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            presentation_name: presentation_name(name),
            kind,
            value: value.to_string(),
        }
    }
}

/// `max_depth` -> `Max Depth`
#[must_use]
pub fn presentation_name(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Everything a unit may look at once before a traversal begins.
#[derive(Debug, Clone, Copy)]
pub struct SetupEnv<'a> {
    pub symbols: &'a Symbols,
    pub source_collection: SourceCollection,
    /// Present for index-backed populations
    pub snapshot: Option<&'a HeapSnapshot>,
}

/// A named, pluggable classifier or filter.
pub trait Unit: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Sample key or verdict, shown in listings
    fn example(&self) -> &str {
        ""
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::All
    }

    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    fn properties(&self) -> Vec<Property> {
        Vec::new()
    }

    /// # Errors
    ///
    /// `InvalidProperty` if the unit has no such property or rejects `value`.
    fn set_property(&mut self, name: &str, value: &str) -> Result<(), ClassificationError> {
        Err(invalid_property(self.name(), name, value))
    }

    /// Called once before a traversal begins.
    fn setup(&mut self, _env: &SetupEnv<'_>) {}
}

#[must_use]
pub fn invalid_property(unit: &str, property: &str, value: &str) -> ClassificationError {
    ClassificationError::InvalidProperty {
        unit: unit.to_string(),
        property: property.to_string(),
        value: value.to_string(),
    }
}

/// Parse a boolean property value.
///
/// # Errors
///
/// `InvalidProperty` for anything but `true`/`false`.
pub fn parse_bool(unit: &str, property: &str, value: &str) -> Result<bool, ClassificationError> {
    value.parse().map_err(|_| invalid_property(unit, property, value))
}
