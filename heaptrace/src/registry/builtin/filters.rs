//! Built-in filters.

use crate::domain::ClassificationError;
use crate::registry::filter::{Filter, FilterVote};
use crate::registry::unit::{Capability, SetupEnv, Unit};
use crate::stream::{ObjectContext, SourceCollection};

use super::data_structures::StructureMemo;

/// Keeps objects whose type may belong to the application's domain model.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlyDomainObjects;

impl Unit for OnlyDomainObjects {
    fn name(&self) -> &str {
        "Only Domain Objects"
    }

    fn description(&self) -> &str {
        "Drops JDK types and primitive arrays"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Type]
    }
}

impl Filter for OnlyDomainObjects {
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError> {
        Ok(match object.allocated_type() {
            Some(ty) => ty.is_possible_domain_type().into(),
            None => FilterVote::Unknown,
        })
    }
}

/// Keeps arrays, or with `keep_arrays == false` drops them.
#[derive(Debug, Clone, Copy)]
pub struct ArrayFilter {
    keep_arrays: bool,
}

impl ArrayFilter {
    #[must_use]
    pub fn only_arrays() -> Self {
        Self { keep_arrays: true }
    }

    #[must_use]
    pub fn no_arrays() -> Self {
        Self { keep_arrays: false }
    }
}

impl Unit for ArrayFilter {
    fn name(&self) -> &str {
        if self.keep_arrays {
            "Only Arrays"
        } else {
            "No Arrays"
        }
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Shape]
    }
}

impl Filter for ArrayFilter {
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError> {
        Ok((object.info.is_array() == self.keep_arrays).into())
    }
}

/// Keeps objects referenced directly by at least one GC root.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlyRooted;

impl Unit for OnlyRooted {
    fn name(&self) -> &str {
        "Only Rooted"
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::IndexBacked
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Roots]
    }
}

impl Filter for OnlyRooted {
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError> {
        Ok((!object.roots(self.name())?.is_empty()).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureRole {
    Leaf,
    Internal,
}

/// Keeps the leaves or the internal objects of detected data structures.
///
/// Decisions are memoised per snapshot index in bit vectors owned by the
/// filter instance.
#[derive(Debug, Clone)]
pub struct DataStructureFilter {
    role: StructureRole,
    memo: StructureMemo,
}

impl DataStructureFilter {
    #[must_use]
    pub fn new(role: StructureRole) -> Self {
        Self { role, memo: StructureMemo::default() }
    }
}

impl Unit for DataStructureFilter {
    fn name(&self) -> &str {
        match self.role {
            StructureRole::Leaf => "Data Structure Leaf",
            StructureRole::Internal => "Data Structure Internal",
        }
    }

    fn description(&self) -> &str {
        match self.role {
            StructureRole::Leaf => "Objects held by a collection",
            StructureRole::Internal => "Objects a collection is built from",
        }
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::IndexBacked
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::DataStructure, Capability::Pointers]
    }

    fn setup(&mut self, env: &SetupEnv<'_>) {
        if let Some(snapshot) = env.snapshot {
            self.memo = StructureMemo::new(snapshot.len());
        }
    }
}

impl Filter for DataStructureFilter {
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError> {
        let (snapshot, index) = object.snapshot(self.name())?;
        if self.memo.capacity() != snapshot.len() {
            self.memo = StructureMemo::new(snapshot.len());
        }
        let keep = match self.role {
            StructureRole::Leaf => self.memo.is_leaf(snapshot, index),
            StructureRole::Internal => self.memo.is_internal(snapshot, index),
        };
        Ok(keep.into())
    }
}
