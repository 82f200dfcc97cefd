use std::sync::Arc;

use rebac_core::engine::{CheckError, IndexLookup, IndexReader, TupleReader};
use rebac_core::index::{ActorIndexEntry, IndexError, IndexKey, IndexWriter};
use rebac_core::tuple::{ObjectRef, RelationTuple, SubjectRef, TupleFilter};
use rebac_storage::{ActorIndexStore, Page, TupleStore};

pub struct StoreTupleReader<S: TupleStore> {
    store: Arc<S>,
}

impl<S: TupleStore> StoreTupleReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: TupleStore> TupleReader for StoreTupleReader<S> {
    async fn tuple_exists(&self, tuple: &RelationTuple) -> Result<bool, CheckError> {
        self.store
            .exists(tuple)
            .await
            .map_err(|e| CheckError::StorageError(e.to_string()))
    }

    async fn read_tuples(
        &self,
        filter: &TupleFilter,
        limit: Option<usize>,
    ) -> Result<Vec<RelationTuple>, CheckError> {
        self.store
            .find_many(filter, Page { skip: 0, limit })
            .await
            .map_err(|e| CheckError::StorageError(e.to_string()))
    }
}

/// The Actor Index as seen by the check engine and the index builder.
///
/// Read failures are logged and degrade to "unknown" so checks fall back to
/// live evaluation; write failures are returned to the builder.
pub struct StoreIndex<I: ActorIndexStore> {
    store: Arc<I>,
}

impl<I: ActorIndexStore> StoreIndex<I> {
    pub fn new(store: Arc<I>) -> Self {
        Self { store }
    }
}

impl<I: ActorIndexStore> IndexReader for StoreIndex<I> {
    async fn lookup(
        &self,
        relation: &str,
        object: &ObjectRef,
        subject: &SubjectRef,
    ) -> IndexLookup {
        match self.store.contains(relation, object, subject).await {
            Ok(true) => IndexLookup::Member,
            Ok(false) => IndexLookup::Unknown,
            Err(e) => {
                tracing::warn!(error = %e, relation, %object, %subject, "actor index lookup failed");
                IndexLookup::Unknown
            }
        }
    }

    async fn objects_for_member(&self, subject: &SubjectRef, relation: &str) -> Vec<ObjectRef> {
        self.store
            .objects_for_member(subject, relation)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, relation, %subject, "actor index member scan failed");
                Vec::new()
            })
    }
}

impl<I: ActorIndexStore> IndexWriter for StoreIndex<I> {
    async fn upsert_union(&self, entry: &ActorIndexEntry) -> Result<(), IndexError> {
        self.store
            .upsert_union(entry)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))
    }

    async fn replace(&self, entry: &ActorIndexEntry) -> Result<(), IndexError> {
        self.store
            .replace(entry)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))
    }

    async fn remove(&self, key: &IndexKey) -> Result<(), IndexError> {
        self.store
            .remove(key)
            .await
            .map_err(|e| IndexError::Write(e.to_string()))
    }
}
