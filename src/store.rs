// Storage collaborator contract
//
// The engine never reaches into storage directly: ingestion writes through
// this trait and every query reads a fresh snapshot through it.

use crate::db::Event;
use crate::entities::{Institution, SupportRecord};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

/// SupportStore - durable home of Institution and SupportRecord entities
pub trait SupportStore {
    /// All institutions in registration order
    fn list_institutions(&self) -> Result<Vec<Institution>>;

    /// Institutions with exactly this name (possibly empty)
    fn find_institutions_by_name(&self, name: &str) -> Result<Vec<Institution>>;

    /// Get-or-create by name; returns the identity actually stored
    ///
    /// If another writer already stored the same name, its identity wins.
    fn save_institution(&self, institution: &Institution) -> Result<Institution>;

    fn find_support_records_by_institution(
        &self,
        institution: &Institution,
    ) -> Result<Vec<SupportRecord>>;

    fn find_support_records_by_institution_and_month(
        &self,
        institution: &Institution,
        month: &str,
    ) -> Result<Vec<SupportRecord>>;

    /// Store a record; `false` when an identical record is already stored
    fn save_support_record(&self, record: &SupportRecord) -> Result<bool>;

    /// Append an audit event; stores without an audit trail drop it
    fn record_event(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Run `work` as one atomic unit
    ///
    /// The default just runs the closure; stores that share state between
    /// handles must override it with their own rollback.
    fn in_batch<T, F>(&self, work: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T>,
    {
        work(self)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Clone, Default)]
struct MemoryState {
    institutions: Vec<Institution>,
    records: Vec<SupportRecord>,
    hashes: HashSet<String>,
    events: Vec<Event>,
}

/// Process-local store backed by vectors
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    /// Serializes batches across clones
    batch: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored support records
    pub fn record_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.records.len())
    }

    /// Audit events recorded so far
    pub fn events(&self) -> Result<Vec<Event>> {
        let state = self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.events.clone())
    }

    fn filter_records<P>(&self, predicate: P) -> Result<Vec<SupportRecord>>
    where
        P: Fn(&SupportRecord) -> bool,
    {
        let state = self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state
            .records
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect())
    }
}

impl SupportStore for MemoryStore {
    fn list_institutions(&self) -> Result<Vec<Institution>> {
        let state = self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.institutions.clone())
    }

    fn find_institutions_by_name(&self, name: &str) -> Result<Vec<Institution>> {
        let state = self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state
            .institutions
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    fn save_institution(&self, institution: &Institution) -> Result<Institution> {
        let mut state = self.state.write().map_err(|_| anyhow!("memory store lock poisoned"))?;

        if let Some(existing) = state.institutions.iter().find(|i| i.name == institution.name) {
            return Ok(existing.clone());
        }

        state.institutions.push(institution.clone());
        Ok(institution.clone())
    }

    fn find_support_records_by_institution(
        &self,
        institution: &Institution,
    ) -> Result<Vec<SupportRecord>> {
        self.filter_records(|r| r.institution.id == institution.id)
    }

    fn find_support_records_by_institution_and_month(
        &self,
        institution: &Institution,
        month: &str,
    ) -> Result<Vec<SupportRecord>> {
        self.filter_records(|r| r.institution.id == institution.id && r.month == month)
    }

    fn save_support_record(&self, record: &SupportRecord) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| anyhow!("memory store lock poisoned"))?;

        if !state
            .institutions
            .iter()
            .any(|i| i.id == record.institution.id)
        {
            return Err(anyhow!(
                "unknown institution {} ({})",
                record.institution.name,
                record.institution.id
            ));
        }

        if !state.hashes.insert(record.compute_idempotency_hash()) {
            return Ok(false);
        }

        state.records.push(record.clone());
        Ok(true)
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        let mut state = self.state.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        state.events.push(event.clone());
        Ok(())
    }

    /// Restores the pre-batch state when `work` fails
    fn in_batch<T, F>(&self, work: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T>,
    {
        let _batch = self.batch.lock().map_err(|_| anyhow!("memory store batch lock poisoned"))?;
        let snapshot = self
            .state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .clone();

        match work(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                let mut state =
                    self.state.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
                *state = snapshot;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_save_institution_is_get_or_create() {
        let store = MemoryStore::new();

        let first = store.save_institution(&Institution::new("하나은행")).unwrap();
        let second = store.save_institution(&Institution::new("하나은행")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_institutions().unwrap().len(), 1);
    }

    #[test]
    fn test_record_requires_known_institution() {
        let store = MemoryStore::new();
        let orphan = SupportRecord::new(Institution::new("없는은행"), "2005", "1", Decimal::ONE);

        assert!(store.save_support_record(&orphan).is_err());
    }

    #[test]
    fn test_identical_records_are_skipped() {
        let store = MemoryStore::new();
        let bank = store.save_institution(&Institution::new("농협은행")).unwrap();

        let record = SupportRecord::new(bank.clone(), "2005", "1", Decimal::from(57));
        assert!(store.save_support_record(&record).unwrap());
        assert!(!store.save_support_record(&record).unwrap());

        let corrected = SupportRecord::new(bank.clone(), "2005", "1", Decimal::from(58));
        assert!(store.save_support_record(&corrected).unwrap());

        assert_eq!(store.record_count().unwrap(), 2);
        assert_eq!(
            store
                .find_support_records_by_institution_and_month(&bank, "1")
                .unwrap()
                .len(),
            2
        );
        assert!(store
            .find_support_records_by_institution_and_month(&bank, "01")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let store = MemoryStore::new();
        let shared = store.clone();
        let kept = store.save_institution(&Institution::new("국민은행")).unwrap();

        let result: Result<()> = store.in_batch(|s| {
            let bank = s.save_institution(&Institution::new("하나은행"))?;
            s.save_support_record(&SupportRecord::new(bank, "2005", "1", Decimal::ONE))?;
            s.save_support_record(&SupportRecord::new(kept.clone(), "2005", "1", Decimal::TEN))?;
            Err(anyhow!("column 3 is broken"))
        });

        assert!(result.is_err());
        assert_eq!(shared.list_institutions().unwrap(), vec![kept]);
        assert_eq!(shared.record_count().unwrap(), 0);

        let committed = store
            .in_batch(|s| s.save_institution(&Institution::new("하나은행")))
            .unwrap();
        assert_eq!(shared.find_institutions_by_name("하나은행").unwrap(), vec![committed]);
    }
}
