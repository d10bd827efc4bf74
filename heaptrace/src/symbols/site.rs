//! Allocation sites and their call-stack frames.
//!
//! An [`AllocationSite`] identifies where an object was allocated: a call stack
//! of [`Location`]s plus the type allocated there. Equality is `(id, type)`
//! only, so extending a site's stack never changes which group it falls into.
//!
//! # Extension Kinds
//!
//! ```text
//! static   extend_static(frames)        same id, stack_size_extended_static grows
//! dynamic  extend_dynamic(new_id, ...)  new id, original_id() remembers the old one
//! copy     copy(type)                   same id and stack, different allocated type
//! ```

use crate::domain::{SiteId, TypeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use super::descriptor::java_types;

/// Byte-code index used when the producer could not determine one.
pub const UNKNOWN_BCI: i32 = -1;

// =============================================================================
// LOCATION
// =============================================================================

/// One call-stack frame: a method signature and a byte-code index.
///
/// The three readable labels are resolved lazily on first access and cached;
/// most frames of a large trace are never displayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    signature: String,
    bci: i32,
    #[serde(skip)]
    labels: OnceLock<Labels>,
}

#[derive(Debug, Clone)]
struct Labels {
    fully_qualified: String,
    omit_package: String,
    shortest: String,
}

impl Location {
    #[must_use]
    pub fn new(signature: impl Into<String>, bci: i32) -> Self {
        Self { signature: signature.into(), bci, labels: OnceLock::new() }
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn bci(&self) -> i32 {
        self.bci
    }

    /// `java.util.HashMap::put(java.lang.Object, java.lang.Object)`
    #[must_use]
    pub fn fully_qualified(&self) -> &str {
        &self.labels().fully_qualified
    }

    /// `HashMap::put(Object, Object)`
    #[must_use]
    pub fn omit_package(&self) -> &str {
        &self.labels().omit_package
    }

    /// `HashMap::put()`
    #[must_use]
    pub fn shortest(&self) -> &str {
        &self.labels().shortest
    }

    fn labels(&self) -> &Labels {
        self.labels.get_or_init(|| Labels::resolve(&self.signature))
    }
}

impl Labels {
    fn raw(signature: &str) -> Self {
        Self {
            fully_qualified: signature.to_string(),
            omit_package: signature.to_string(),
            shortest: signature.to_string(),
        }
    }

    fn resolve(signature: &str) -> Self {
        let (Some(open), Some(close)) = (signature.find('('), signature.find(')')) else {
            return Self::raw(signature);
        };
        if close < open || !signature.contains('.') {
            return Self::raw(signature);
        }

        // VM-internal frames have no declaring type
        let head = &signature[..open];
        let Some(dot) = head.rfind('.') else {
            return Self::raw(signature);
        };

        let declaring = head[..dot].replace('/', ".");
        let method = &head[dot + 1..];
        let params = &signature[open + 1..close];

        let (Some(long_params), Some(short_params)) =
            (java_types(params, false), java_types(params, true))
        else {
            return Self::raw(signature);
        };

        // Nested classes keep their outer class: a.b.Outer$Inner -> Outer$Inner
        let outer = declaring.split('$').next().unwrap_or(&declaring);
        let short_start = outer.rfind('.').map_or(0, |i| i + 1);
        let short_declaring = &declaring[short_start..];

        Self {
            fully_qualified: format!("{declaring}::{method}({})", long_params.join(", ")),
            omit_package: format!("{short_declaring}::{method}({})", short_params.join(", ")),
            shortest: format!("{short_declaring}::{method}()"),
        }
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.bci == other.bci && self.signature == other.signature
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
        self.bci.hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.signature, self.bci)
    }
}

// =============================================================================
// ALLOCATION SITE
// =============================================================================

/// Where an object was allocated.
///
/// Invariant: `stack_size_original <= stack_size_extended_static <= call_sites.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SiteRecord", into = "SiteRecord")]
pub struct AllocationSite {
    id: SiteId,
    original_id: SiteId,
    call_sites: Vec<Location>,
    allocated_type: TypeId,
    stack_size_original: usize,
    stack_size_extended_static: usize,
}

/// On-disk form of a site: only the static stack is persisted.
#[derive(Serialize, Deserialize)]
struct SiteRecord {
    id: SiteId,
    #[serde(default)]
    call_sites: Vec<Location>,
    allocated_type: TypeId,
}

impl From<SiteRecord> for AllocationSite {
    fn from(record: SiteRecord) -> Self {
        AllocationSite::new(record.id, record.call_sites, record.allocated_type)
    }
}

impl From<AllocationSite> for SiteRecord {
    fn from(site: AllocationSite) -> Self {
        SiteRecord { id: site.id, call_sites: site.call_sites, allocated_type: site.allocated_type }
    }
}

impl AllocationSite {
    #[must_use]
    pub fn new(id: SiteId, call_sites: Vec<Location>, allocated_type: TypeId) -> Self {
        let depth = call_sites.len();
        Self {
            id,
            original_id: id,
            call_sites,
            allocated_type,
            stack_size_original: depth,
            stack_size_extended_static: depth,
        }
    }

    /// Site used for allocations that could not be attributed.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(SiteId::UNKNOWN, Vec::new(), TypeId::UNKNOWN)
    }

    /// Same site, different allocated type.
    ///
    /// Used when a slow-path allocation reports a runtime type that deviates
    /// from the type the site statically allocates.
    #[must_use]
    pub fn copy(&self, allocated_type: TypeId) -> Self {
        Self { allocated_type, ..self.clone() }
    }

    /// Append synthetic frames without changing the site's identity.
    #[must_use]
    pub fn extend_static(&self, frames: &[Location]) -> Self {
        let mut call_sites = self.call_sites.clone();
        call_sites.extend_from_slice(frames);
        Self {
            stack_size_extended_static: call_sites.len(),
            call_sites,
            ..self.clone()
        }
    }

    /// Specialise this site for a concrete call context under a new id.
    ///
    /// The returned site groups separately (its id differs) but still reports
    /// the id of the generic site it was derived from via [`Self::original_id`].
    /// Static stack sizes are carried over unchanged.
    #[must_use]
    pub fn extend_dynamic(&self, new_id: SiteId, frames: &[Location]) -> Self {
        let mut call_sites = self.call_sites.clone();
        call_sites.extend_from_slice(frames);
        Self {
            id: new_id,
            original_id: self.original_id,
            call_sites,
            allocated_type: self.allocated_type,
            stack_size_original: self.stack_size_original,
            stack_size_extended_static: self.stack_size_extended_static,
        }
    }

    #[must_use]
    pub fn id(&self) -> SiteId {
        self.id
    }

    /// Id before any dynamic extension; equals [`Self::id`] for plain sites.
    #[must_use]
    pub fn original_id(&self) -> SiteId {
        self.original_id
    }

    #[must_use]
    pub fn is_dynamically_extended(&self) -> bool {
        self.id != self.original_id
    }

    #[must_use]
    pub fn allocated_type(&self) -> TypeId {
        self.allocated_type
    }

    /// Frames from the allocating method outwards.
    #[must_use]
    pub fn call_sites(&self) -> &[Location] {
        &self.call_sites
    }

    /// The allocating frame, if the stack is known.
    #[must_use]
    pub fn top(&self) -> Option<&Location> {
        self.call_sites.first()
    }

    #[must_use]
    pub fn stack_size_original(&self) -> usize {
        self.stack_size_original
    }

    #[must_use]
    pub fn stack_size_extended_static(&self) -> usize {
        self.stack_size_extended_static
    }

    /// Label used as a classification key.
    #[must_use]
    pub fn label(&self) -> String {
        match self.top() {
            Some(top) => format!("{}:{}", top.omit_package(), top.bci()),
            None => self.id.to_string(),
        }
    }
}

impl PartialEq for AllocationSite {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.allocated_type == other.allocated_type
    }
}

impl Eq for AllocationSite {}

impl Hash for AllocationSite {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.allocated_type.hash(state);
    }
}

impl fmt::Display for AllocationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} frames)", self.id, self.call_sites.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sig: &str) -> Location {
        Location::new(sig, 4)
    }

    #[test]
    fn test_location_labels() {
        let loc = Location::new(
            "java/util/HashMap.put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            12,
        );
        assert_eq!(loc.fully_qualified(), "java.util.HashMap::put(java.lang.Object, java.lang.Object)");
        assert_eq!(loc.omit_package(), "HashMap::put(Object, Object)");
        assert_eq!(loc.shortest(), "HashMap::put()");
        assert_eq!(loc.to_string(), format!("{}:12", loc.signature()));
    }

    #[test]
    fn test_location_nested_class_keeps_outer_name() {
        let loc = Location::new("com/acme/Cache$Entry.<init>(I)V", 0);
        assert_eq!(loc.shortest(), "Cache$Entry::<init>()");
        assert_eq!(loc.omit_package(), "Cache$Entry::<init>(int)");
    }

    #[test]
    fn test_vm_internal_location_uses_raw_signature() {
        let loc = Location::new("VM_INTERNAL", UNKNOWN_BCI);
        assert_eq!(loc.fully_qualified(), "VM_INTERNAL");
        assert_eq!(loc.omit_package(), "VM_INTERNAL");
        assert_eq!(loc.shortest(), "VM_INTERNAL");
    }

    #[test]
    fn test_location_equality_ignores_resolved_labels() {
        let a = Location::new("a/B.c()V", 1);
        let b = Location::new("a/B.c()V", 1);
        let _ = a.shortest();
        assert_eq!(a, b);
        assert_ne!(a, Location::new("a/B.c()V", 2));
    }

    #[test]
    fn test_copy_changes_only_type() {
        let site = AllocationSite::new(SiteId(5), vec![frame("a/B.c()V")], TypeId(1));
        let copy = site.copy(TypeId(2));
        assert_eq!(copy.id(), SiteId(5));
        assert_eq!(copy.allocated_type(), TypeId(2));
        assert_eq!(copy.call_sites(), site.call_sites());
        assert_ne!(copy, site);
    }

    #[test]
    fn test_extend_static_keeps_identity() {
        let site = AllocationSite::new(SiteId(5), vec![frame("a/B.c()V")], TypeId(1));
        let extended = site.extend_static(&[frame("a/B.d()V"), frame("a/B.e()V")]);
        assert_eq!(extended, site);
        assert_eq!(extended.stack_size_original(), 1);
        assert_eq!(extended.stack_size_extended_static(), 3);
        assert_eq!(extended.call_sites().len(), 3);
    }

    #[test]
    fn test_extend_dynamic_remembers_original_id() {
        let site = AllocationSite::new(SiteId(5), vec![frame("a/B.c()V")], TypeId(1));
        let extended = site.extend_dynamic(SiteId(900), &[frame("x/Y.z()V"), frame("x/Y.w()V")]);

        assert_eq!(extended.id(), SiteId(900));
        assert_eq!(extended.original_id(), SiteId(5));
        assert_eq!(extended.stack_size_extended_static(), extended.stack_size_original());
        assert_eq!(extended.call_sites().len(), 3);
        assert!(extended.is_dynamically_extended());
        assert_ne!(extended, site);
    }

    #[test]
    fn test_site_serde_record() {
        let json = r#"{"id":3,"call_sites":[{"signature":"a/B.c()V","bci":7}],"allocated_type":9}"#;
        let site: AllocationSite = serde_json::from_str(json).unwrap();
        assert_eq!(site.id(), SiteId(3));
        assert_eq!(site.original_id(), SiteId(3));
        assert_eq!(site.stack_size_original(), 1);
        assert_eq!(site.label(), "B::c():7");
    }
}
