use std::sync::{Arc, Mutex, PoisonError};

use rebac_core::tuple::{RelationTuple, TupleFilter};

use crate::traits::{LegacyRow, LegacyTupleStore, Page, StorageError, TupleStore};

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    tuple: Option<RelationTuple>,
    legacy_subject: Option<String>,
    legacy_object: Option<String>,
    legacy_error: Option<String>,
}

impl StoredRow {
    fn is_legacy(&self) -> bool {
        self.tuple.is_none() && self.legacy_error.is_none()
    }
}

#[derive(Debug, Default)]
struct InnerState {
    next_id: i64,
    rows: Vec<StoredRow>,
}

impl InnerState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn structured(&self) -> impl Iterator<Item = &RelationTuple> {
        self.rows.iter().filter_map(|r| r.tuple.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTupleStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Quarantine reasons recorded so far, by row id.
    pub fn quarantined(&self) -> Vec<(i64, String)> {
        self.lock()
            .rows
            .iter()
            .filter_map(|r| r.legacy_error.as_ref().map(|e| (r.id, e.clone())))
            .collect()
    }
}

impl TupleStore for InMemoryTupleStore {
    async fn create(&self, tuple: &RelationTuple) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.structured().any(|t| t == tuple) {
            return Err(StorageError::DuplicateTuple);
        }
        let id = state.allocate_id();
        state.rows.push(StoredRow {
            id,
            tuple: Some(tuple.clone()),
            legacy_subject: None,
            legacy_object: None,
            legacy_error: None,
        });
        Ok(())
    }

    async fn find_one(&self, filter: &TupleFilter) -> Result<Option<RelationTuple>, StorageError> {
        Ok(self
            .lock()
            .structured()
            .find(|t| filter.matches(t))
            .cloned())
    }

    async fn find_many(
        &self,
        filter: &TupleFilter,
        page: Page,
    ) -> Result<Vec<RelationTuple>, StorageError> {
        Ok(self
            .lock()
            .structured()
            .filter(|t| filter.matches(t))
            .skip(page.skip)
            .take(page.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete_one(&self, tuple: &RelationTuple) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let position = state
            .rows
            .iter()
            .position(|r| r.tuple.as_ref() == Some(tuple));
        match position {
            Some(i) => {
                state.rows.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, tuple: &RelationTuple) -> Result<bool, StorageError> {
        Ok(self.lock().structured().any(|t| t == tuple))
    }
}

impl LegacyTupleStore for InMemoryTupleStore {
    async fn insert_legacy(&self, subject: &str, object: &str) -> Result<i64, StorageError> {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.rows.push(StoredRow {
            id,
            tuple: None,
            legacy_subject: Some(subject.to_string()),
            legacy_object: Some(object.to_string()),
            legacy_error: None,
        });
        Ok(id)
    }

    async fn find_legacy(&self, limit: usize) -> Result<Vec<LegacyRow>, StorageError> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|r| r.is_legacy())
            .take(limit)
            .map(|r| LegacyRow {
                id: r.id,
                subject: r.legacy_subject.clone().unwrap_or_default(),
                object: r.legacy_object.clone().unwrap_or_default(),
            })
            .collect())
    }

    async fn update_one(&self, id: i64, tuple: &RelationTuple) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let position = state
            .rows
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("tuple row {id}")))?;

        if state.structured().any(|t| t == tuple) {
            state.rows.remove(position);
            return Ok(false);
        }
        state.rows[position].tuple = Some(tuple.clone());
        Ok(true)
    }

    async fn quarantine(&self, id: i64, reason: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("tuple row {id}")))?;
        row.legacy_error = Some(reason.to_string());
        Ok(())
    }
}
