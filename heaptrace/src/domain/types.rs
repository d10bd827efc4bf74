//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a site id where a
//! type id is expected, and make function signatures more expressive. The raw
//! integers of `heaptrace_common::TraceEvent` are wrapped here on entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Heap address of an object, space or LAB.
///
/// `Address::NULL` (0) is never a valid object address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub const NULL: Address = Address(0);

    /// Returns true if this is the null address
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one, or `None` past the end of the address space
    #[must_use]
    pub fn checked_offset(self, bytes: u64) -> Option<Address> {
        self.0.checked_add(bytes).map(Address)
    }

    /// Address `bytes` past this one, clamped to the top of the address space
    #[must_use]
    pub fn saturating_offset(self, bytes: u64) -> Address {
        Address(self.0.saturating_add(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Allocation site id
///
/// Site 0 is reserved for allocations whose site could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl SiteId {
    pub const UNKNOWN: SiteId = SiteId(heaptrace_common::UNKNOWN_SITE);
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Site#{}", self.0)
    }
}

/// Allocated type id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const UNKNOWN: TypeId = TypeId(heaptrace_common::UNKNOWN_TYPE);
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type#{}", self.0)
    }
}

/// Space (region) index as announced by the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Space#{}", self.0)
    }
}

/// Garbage collection id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GcId(pub u32);

impl fmt::Display for GcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GC#{}", self.0)
    }
}

/// Mutator or GC thread id
///
/// Only used to label provenance, never to gate allocation validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Index of an object inside one frozen snapshot.
///
/// Indices are not comparable across snapshots.
pub type ObjectIndex = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_is_hex() {
        assert_eq!(Address(0x1000).to_string(), "0x1000");
        assert!(Address::NULL.is_null());
        assert_eq!(Address(0x10).checked_offset(0x20), Some(Address(0x30)));
    }

    #[test]
    fn test_offset_past_the_address_space() {
        assert_eq!(Address(u64::MAX - 15).checked_offset(256), None);
        assert_eq!(Address(u64::MAX - 15).saturating_offset(256), Address(u64::MAX));
        assert_eq!(Address(u64::MAX - 15).checked_offset(15), Some(Address(u64::MAX)));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(SiteId(7).to_string(), "Site#7");
        assert_eq!(GcId(3).to_string(), "GC#3");
        assert_eq!(ThreadId(42).to_string(), "TID:42");
    }
}
