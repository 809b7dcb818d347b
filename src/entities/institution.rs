// Institution Entity - Stable identity + display name
//
// "Name is the natural key during ingestion, UUID is IDENTITY"
//
// - First sighting of a name assigns a UUID
// - Later batches reuse the stored identity for the exact same name
// - No fuzzy matching: a renamed institution is a distinct entity

use crate::store::SupportStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// INSTITUTION ENTITY
// ============================================================================

/// Institution - immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Institution {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Display name (exact, post suffix stripping)
    pub name: String,
}

impl Institution {
    /// Create new institution with a fresh UUID
    pub fn new(name: impl Into<String>) -> Self {
        Institution {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }

    /// Rebuild an institution read back from storage
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Institution {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ============================================================================
// INSTITUTION CATALOG
// ============================================================================

/// Resolve-or-register lookup for one ingestion batch
///
/// Lookup order: names already resolved in this batch, then the store,
/// then a new Institution registered through `save_institution`. The store
/// must make that get-or-create atomic per name; the identity it returns is
/// the one the batch uses.
pub struct InstitutionCatalog<'a, S: SupportStore> {
    store: &'a S,
    resolved: HashMap<String, Institution>,
    order: Vec<String>,
    registered: usize,
}

impl<'a, S: SupportStore> InstitutionCatalog<'a, S> {
    pub fn new(store: &'a S) -> Self {
        InstitutionCatalog {
            store,
            resolved: HashMap::new(),
            order: Vec::new(),
            registered: 0,
        }
    }

    /// Return the Institution for `name`, registering it on first sighting
    pub fn resolve(&mut self, name: &str) -> Result<Institution> {
        if let Some(institution) = self.resolved.get(name) {
            return Ok(institution.clone());
        }

        let institution = match self.store.find_institutions_by_name(name)?.into_iter().next() {
            Some(existing) => {
                debug!(name, id = %existing.id, "reusing stored institution");
                existing
            }
            None => {
                let stored = self.store.save_institution(&Institution::new(name))?;
                debug!(name, id = %stored.id, "registered institution");
                self.registered += 1;
                stored
            }
        };

        self.order.push(name.to_string());
        self.resolved.insert(name.to_string(), institution.clone());
        Ok(institution)
    }

    /// Institutions resolved so far, in first-sighting order
    pub fn institutions(&self) -> Vec<Institution> {
        self.order
            .iter()
            .filter_map(|name| self.resolved.get(name).cloned())
            .collect()
    }

    /// How many institutions this batch created
    pub fn registered_count(&self) -> usize {
        self.registered
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_institution_creation() {
        let institution = Institution::new("국민은행");

        assert!(!institution.id.is_empty());
        assert_eq!(institution.name, "국민은행");
        assert_ne!(institution.id, Institution::new("국민은행").id);
    }

    #[test]
    fn test_resolve_reuses_within_batch() {
        let store = MemoryStore::new();
        let mut catalog = InstitutionCatalog::new(&store);

        let first = catalog.resolve("우리은행").unwrap();
        let second = catalog.resolve("우리은행").unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.registered_count(), 1);
        assert_eq!(store.list_institutions().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_reuses_stored_identity() {
        let store = MemoryStore::new();
        let existing = store.save_institution(&Institution::new("신한은행")).unwrap();

        let mut catalog = InstitutionCatalog::new(&store);
        let resolved = catalog.resolve("신한은행").unwrap();

        assert_eq!(resolved.id, existing.id);
        assert_eq!(catalog.registered_count(), 0);
    }

    #[test]
    fn test_resolve_is_case_and_spelling_exact() {
        let store = MemoryStore::new();
        let mut catalog = InstitutionCatalog::new(&store);

        let upper = catalog.resolve("KEB").unwrap();
        let lower = catalog.resolve("keb").unwrap();

        assert_ne!(upper.id, lower.id);
        assert_eq!(catalog.registered_count(), 2);

        let names: Vec<String> = catalog.institutions().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["KEB".to_string(), "keb".to_string()]);
    }
}
