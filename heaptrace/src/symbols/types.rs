//! Allocated types.

use crate::domain::TypeId;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::descriptor::{external_name, is_primitive_array};

/// Package prefixes that belong to the runtime rather than the application.
const RUNTIME_PACKAGES: &[&str] = &[
    "java.", "javax.", "jdk.", "sun.", "com.sun.", "org.w3c.", "org.xml.", "org.ietf.", "org.omg.",
];

/// A type objects can be allocated with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "TypeRecord", into = "TypeRecord")]
pub struct AllocatedType {
    id: TypeId,
    internal_name: String,
    external_name: String,
    short_name: String,
    /// Instance size, or element size for arrays
    size: u32,
    is_array: bool,
    possible_domain_type: bool,
}

#[derive(Serialize, Deserialize)]
struct TypeRecord {
    id: TypeId,
    name: String,
    #[serde(default)]
    size: u32,
}

impl From<TypeRecord> for AllocatedType {
    fn from(record: TypeRecord) -> Self {
        AllocatedType::new(record.id, record.name, record.size)
    }
}

impl From<AllocatedType> for TypeRecord {
    fn from(ty: AllocatedType) -> Self {
        TypeRecord { id: ty.id, name: ty.internal_name, size: ty.size }
    }
}

impl AllocatedType {
    #[must_use]
    pub fn new(id: TypeId, internal_name: impl Into<String>, size: u32) -> Self {
        let internal_name = internal_name.into();
        let external = external_name(&internal_name);
        let short_name = external.rsplit('.').next().unwrap_or(&external).to_string();
        let is_array = external.ends_with("[]");
        let possible_domain_type = !is_primitive_array(&internal_name)
            && !RUNTIME_PACKAGES.iter().any(|p| external.starts_with(p))
            && external.contains('.');

        Self {
            id,
            internal_name,
            external_name: external,
            short_name,
            size,
            is_array,
            possible_domain_type,
        }
    }

    /// Placeholder type for objects the producer could not resolve.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(TypeId::UNKNOWN, "U", 0)
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    /// `java.lang.String`, `int[]`
    #[must_use]
    pub fn external_name(&self) -> &str {
        &self.external_name
    }

    /// External name without package
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Heuristic: an application type rather than a runtime or primitive one.
    ///
    /// Arrays of application types count as domain types; primitive arrays and
    /// types in runtime packages do not. Types in the default package are
    /// treated as runtime types since synthetic VM types live there.
    #[must_use]
    pub fn is_possible_domain_type(&self) -> bool {
        self.possible_domain_type
    }
}

impl fmt::Display for AllocatedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.external_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_from_descriptor() {
        let ty = AllocatedType::new(TypeId(4), "Ljava/util/HashMap$Node;", 32);
        assert_eq!(ty.external_name(), "java.util.HashMap$Node");
        assert_eq!(ty.short_name(), "HashMap$Node");
        assert!(!ty.is_array());
    }

    #[test]
    fn test_domain_type_heuristic() {
        assert!(AllocatedType::new(TypeId(1), "Lcom/acme/Order;", 24).is_possible_domain_type());
        assert!(AllocatedType::new(TypeId(2), "[Lcom/acme/Order;", 4).is_possible_domain_type());
        assert!(!AllocatedType::new(TypeId(3), "Ljava/lang/String;", 24).is_possible_domain_type());
        assert!(!AllocatedType::new(TypeId(4), "[I", 4).is_possible_domain_type());
        assert!(!AllocatedType::unknown().is_possible_domain_type());
    }

    #[test]
    fn test_array_detection() {
        assert!(AllocatedType::new(TypeId(5), "[[B", 1).is_array());
        assert_eq!(AllocatedType::new(TypeId(5), "[[B", 1).external_name(), "byte[][]");
    }
}
