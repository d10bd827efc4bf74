//! Per-object view handed to filters, classifiers and visitors.

use crate::domain::{Address, ClassificationError, ObjectIndex};
use crate::heap::{HeapSnapshot, ObjectInfo, SpaceRef};
use crate::symbols::{AllocatedType, AllocationSite, Symbols};
use heaptrace_common::RootKind;

/// The object currently being visited.
///
/// Index-backed populations set `index` and `snapshot`; populations that
/// only carry counts (age collections, the live heap while it is still
/// being replayed) leave both empty and may stand for `count` objects at once.
#[derive(Debug, Clone, Copy)]
pub struct ObjectContext<'a> {
    pub index: Option<ObjectIndex>,
    pub address: Address,
    pub info: &'a ObjectInfo,
    /// Collections survived
    pub age: u16,
    pub space: Option<SpaceRef>,
    /// Number of identical objects this context stands for
    pub count: u64,
    pub thread_name: Option<&'a str>,
    pub symbols: &'a Symbols,
    pub snapshot: Option<&'a HeapSnapshot>,
}

impl<'a> ObjectContext<'a> {
    #[must_use]
    pub fn allocated_type(&self) -> Option<&'a AllocatedType> {
        self.symbols.type_info(self.info.type_id)
    }

    /// External type name, `"unknown"` if the type is not in the tables
    #[must_use]
    pub fn type_name(&self) -> &'a str {
        self.allocated_type().map_or("unknown", AllocatedType::external_name)
    }

    #[must_use]
    pub fn site(&self) -> &'a AllocationSite {
        &self.info.site
    }

    /// Shallow size of one object
    #[must_use]
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Shallow size of all objects this context stands for
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.info.size * self.count
    }

    /// Snapshot the object belongs to.
    ///
    /// # Errors
    ///
    /// `PointersUnavailable` naming `unit` if the population has no pointer index.
    pub fn snapshot(&self, unit: &str) -> Result<(&'a HeapSnapshot, ObjectIndex), ClassificationError> {
        match (self.snapshot, self.index) {
            (Some(snapshot), Some(index)) => Ok((snapshot, index)),
            _ => Err(ClassificationError::PointersUnavailable(unit.to_string())),
        }
    }

    /// # Errors
    ///
    /// `PointersUnavailable` naming `unit` if the population has no pointer index.
    pub fn points_to(&self, unit: &str) -> Result<&'a [ObjectIndex], ClassificationError> {
        let (snapshot, index) = self.snapshot(unit)?;
        Ok(snapshot.points_to(index))
    }

    /// # Errors
    ///
    /// `PointersUnavailable` naming `unit` if the population has no pointer index.
    pub fn pointed_from(&self, unit: &str) -> Result<&'a [ObjectIndex], ClassificationError> {
        let (snapshot, index) = self.snapshot(unit)?;
        Ok(snapshot.pointed_from(index))
    }

    /// # Errors
    ///
    /// `PointersUnavailable` naming `unit` if the population has no root index.
    pub fn roots(&self, unit: &str) -> Result<&'a [RootKind], ClassificationError> {
        let (snapshot, index) = self.snapshot(unit)?;
        Ok(snapshot.roots_of(index))
    }

    /// Short human-readable identity for error messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self.index {
            Some(index) => format!("object #{index} ({} @ {})", self.type_name(), self.address),
            None => format!("{} object", self.type_name()),
        }
    }
}
