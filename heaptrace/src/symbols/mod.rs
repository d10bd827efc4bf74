//! Symbol tables: allocated types and allocation sites.
//!
//! Symbols are loaded once per trace and shared read-only (`Arc<Symbols>`)
//! between the heap, snapshots and classifiers.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "types": [{"id": 1, "name": "Lcom/acme/Order;", "size": 24}],
//!   "sites": [{"id": 1, "allocated_type": 1,
//!              "call_sites": [{"signature": "com/acme/Shop.buy()V", "bci": 3}]}]
//! }
//! ```

pub mod descriptor;
pub mod site;
pub mod types;

pub use site::{AllocationSite, Location, UNKNOWN_BCI};
pub use types::AllocatedType;

use crate::domain::{SiteId, TraceError, TypeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

#[derive(Serialize, Deserialize, Default)]
struct SymbolsFile {
    #[serde(default)]
    types: Vec<AllocatedType>,
    #[serde(default)]
    sites: Vec<AllocationSite>,
}

/// Type and allocation-site tables of one trace.
#[derive(Debug, Clone)]
pub struct Symbols {
    types: HashMap<TypeId, AllocatedType>,
    sites: HashMap<SiteId, Arc<AllocationSite>>,
    next_dynamic_site: u32,
}

impl Default for Symbols {
    fn default() -> Self {
        Self::new()
    }
}

impl Symbols {
    /// Empty tables holding only the unknown type and unknown site.
    #[must_use]
    pub fn new() -> Self {
        let mut symbols = Self { types: HashMap::new(), sites: HashMap::new(), next_dynamic_site: 1 };
        symbols.add_type(AllocatedType::unknown());
        symbols.add_site(AllocationSite::unknown());
        symbols
    }

    /// Load a JSON symbols file.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::Json` if the file is not valid symbols JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TraceError> {
        let file: SymbolsFile = serde_json::from_reader(reader)?;
        let mut symbols = Self::new();
        for ty in file.types {
            symbols.add_type(ty);
        }
        for site in file.sites {
            symbols.add_site(site);
        }
        Ok(symbols)
    }

    pub fn add_type(&mut self, ty: AllocatedType) {
        self.types.insert(ty.id(), ty);
    }

    pub fn add_site(&mut self, site: AllocationSite) {
        self.next_dynamic_site = self.next_dynamic_site.max(site.id().0 + 1);
        self.sites.insert(site.id(), Arc::new(site));
    }

    /// Register a dynamically specialised copy of `site` under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::UnknownSite` if `site` is not in the table.
    pub fn extend_site_dynamic(
        &mut self,
        site: SiteId,
        frames: &[Location],
    ) -> Result<SiteId, TraceError> {
        let generic = self.sites.get(&site).ok_or(TraceError::UnknownSite(site))?;
        let new_id = SiteId(self.next_dynamic_site);
        let extended = generic.extend_dynamic(new_id, frames);
        self.add_site(extended);
        Ok(new_id)
    }

    #[must_use]
    pub fn type_info(&self, id: TypeId) -> Option<&AllocatedType> {
        self.types.get(&id)
    }

    #[must_use]
    pub fn site(&self, id: SiteId) -> Option<&Arc<AllocationSite>> {
        self.sites.get(&id)
    }

    pub fn types(&self) -> impl Iterator<Item = &AllocatedType> {
        self.types.values()
    }

    pub fn sites(&self) -> impl Iterator<Item = &Arc<AllocationSite>> {
        self.sites.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_symbols_json() {
        let json = r#"{
            "types": [{"id": 1, "name": "Lcom/acme/Order;", "size": 24}],
            "sites": [{"id": 7, "allocated_type": 1,
                       "call_sites": [{"signature": "com/acme/Shop.buy()V", "bci": 3}]}]
        }"#;
        let symbols = Symbols::from_reader(json.as_bytes()).unwrap();

        assert_eq!(symbols.type_info(TypeId(1)).unwrap().external_name(), "com.acme.Order");
        assert_eq!(symbols.site(SiteId(7)).unwrap().allocated_type(), TypeId(1));
        assert!(symbols.site(SiteId::UNKNOWN).is_some());
        assert!(symbols.type_info(TypeId::UNKNOWN).is_some());
    }

    #[test]
    fn test_dynamic_extension_allocates_fresh_ids() {
        let mut symbols = Symbols::new();
        symbols.add_site(AllocationSite::new(SiteId(10), vec![], TypeId(0)));

        let first = symbols.extend_site_dynamic(SiteId(10), &[Location::new("a/B.c()V", 1)]).unwrap();
        let second = symbols.extend_site_dynamic(SiteId(10), &[Location::new("a/B.d()V", 1)]).unwrap();

        assert_eq!(first, SiteId(11));
        assert_eq!(second, SiteId(12));
        assert_eq!(symbols.site(first).unwrap().original_id(), SiteId(10));
    }

    #[test]
    fn test_extend_unknown_site_fails() {
        let mut symbols = Symbols::new();
        assert!(matches!(
            symbols.extend_site_dynamic(SiteId(99), &[]),
            Err(TraceError::UnknownSite(SiteId(99)))
        ));
    }
}
