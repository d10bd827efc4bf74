//! Object metadata and interning.
//!
//! Millions of objects share a handful of distinct `(type, site, size, ...)`
//! combinations, so [`ObjectInfo`] values are interned once and shared via
//! `Arc` between the live heap, snapshots and age collections.

use crate::domain::{Address, SiteId, ThreadId, TypeId};
use crate::symbols::AllocationSite;
use heaptrace_common::Allocator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Arrays shorter than this count as small
pub const SMALL_ARRAY_LIMIT: u32 = 255;

/// Coarse object layout used by statistics and the shape classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectShape {
    Instance,
    SmallArray,
    BigArray,
}

impl ObjectShape {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ObjectShape::Instance => "Instance",
            ObjectShape::SmallArray => "Small Array",
            ObjectShape::BigArray => "Big Array",
        }
    }
}

/// Immutable allocation-time facts about an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectInfo {
    pub type_id: TypeId,
    pub site: Arc<AllocationSite>,
    /// Size in bytes
    pub size: u64,
    /// `Some` for arrays
    pub array_length: Option<u32>,
    pub allocator: Allocator,
    pub thread: ThreadId,
}

impl ObjectInfo {
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.array_length.is_some()
    }

    #[must_use]
    pub fn shape(&self) -> ObjectShape {
        match self.array_length {
            None => ObjectShape::Instance,
            Some(length) if length < SMALL_ARRAY_LIMIT => ObjectShape::SmallArray,
            Some(_) => ObjectShape::BigArray,
        }
    }
}

/// One object of the live heap.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub info: Arc<ObjectInfo>,
    /// Outgoing references, null pointers excluded
    pub pointers: Vec<Address>,
    /// Number of collections survived
    pub age: u16,
}

impl HeapObject {
    #[must_use]
    pub fn new(info: Arc<ObjectInfo>) -> Self {
        Self { info, pointers: Vec::new(), age: 0 }
    }
}

/// Interning table for [`ObjectInfo`] and deviant-type site copies.
#[derive(Debug, Default)]
pub struct ObjectInfoCache {
    infos: HashMap<ObjectInfo, Arc<ObjectInfo>>,
    deviant_sites: HashMap<(SiteId, TypeId), Arc<AllocationSite>>,
}

impl ObjectInfoCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance equal to `info`
    pub fn intern(&mut self, info: ObjectInfo) -> Arc<ObjectInfo> {
        if let Some(shared) = self.infos.get(&info) {
            return Arc::clone(shared);
        }
        let shared = Arc::new(info.clone());
        self.infos.insert(info, Arc::clone(&shared));
        shared
    }

    /// Copy of `site` allocating `real_type` instead of its static type.
    pub fn deviant_site(&mut self, site: &AllocationSite, real_type: TypeId) -> Arc<AllocationSite> {
        Arc::clone(
            self.deviant_sites
                .entry((site.id(), real_type))
                .or_insert_with(|| Arc::new(site.copy(real_type))),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: u64) -> ObjectInfo {
        ObjectInfo {
            type_id: TypeId(1),
            site: Arc::new(AllocationSite::unknown()),
            size,
            array_length: None,
            allocator: Allocator::C2,
            thread: ThreadId(1),
        }
    }

    #[test]
    fn test_intern_shares_equal_infos() {
        let mut cache = ObjectInfoCache::new();
        let a = cache.intern(info(16));
        let b = cache.intern(info(16));
        let c = cache.intern(info(24));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_shape_boundary() {
        let mut array = info(16);
        array.array_length = Some(254);
        assert_eq!(array.shape(), ObjectShape::SmallArray);
        array.array_length = Some(255);
        assert_eq!(array.shape(), ObjectShape::BigArray);
        assert_eq!(info(16).shape(), ObjectShape::Instance);
    }

    #[test]
    fn test_deviant_site_is_cached_copy() {
        let mut cache = ObjectInfoCache::new();
        let site = AllocationSite::new(SiteId(4), vec![], TypeId(1));
        let first = cache.deviant_site(&site, TypeId(9));
        let second = cache.deviant_site(&site, TypeId(9));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), SiteId(4));
        assert_eq!(first.allocated_type(), TypeId(9));
    }
}
