mod index;
pub mod migrations;
mod queries;
mod queue;

pub use index::PostgresIndexStore;
pub use queue::PostgresJobQueue;

use std::sync::Arc;

use sqlx::PgPool;

use rebac_core::tuple::{RelationTuple, TupleFilter};

use crate::memory::InMemoryKvCache;
use crate::traits::{
    Backend, LegacyRow, LegacyTupleStore, Page, QueuePolicy, StorageError, TupleStore,
};

use queries::to_storage_error;

#[derive(Debug, Clone)]
pub struct PostgresTupleStore {
    pool: PgPool,
    schema: String,
}

impl TupleStore for PostgresTupleStore {
    async fn create(&self, tuple: &RelationTuple) -> Result<(), StorageError> {
        queries::insert_tuple(&self.pool, &self.schema, tuple).await
    }

    async fn find_one(&self, filter: &TupleFilter) -> Result<Option<RelationTuple>, StorageError> {
        let mut rows =
            queries::read_tuples(&self.pool, &self.schema, filter, Page::first(1)).await?;
        Ok(rows.pop())
    }

    async fn find_many(
        &self,
        filter: &TupleFilter,
        page: Page,
    ) -> Result<Vec<RelationTuple>, StorageError> {
        queries::read_tuples(&self.pool, &self.schema, filter, page).await
    }

    async fn delete_one(&self, tuple: &RelationTuple) -> Result<bool, StorageError> {
        queries::delete_tuple(&self.pool, &self.schema, tuple).await
    }

    async fn exists(&self, tuple: &RelationTuple) -> Result<bool, StorageError> {
        queries::tuple_exists(&self.pool, &self.schema, tuple).await
    }
}

impl LegacyTupleStore for PostgresTupleStore {
    async fn insert_legacy(&self, subject: &str, object: &str) -> Result<i64, StorageError> {
        queries::insert_legacy(&self.pool, &self.schema, subject, object).await
    }

    async fn find_legacy(&self, limit: usize) -> Result<Vec<LegacyRow>, StorageError> {
        queries::find_legacy(&self.pool, &self.schema, limit).await
    }

    async fn update_one(&self, id: i64, tuple: &RelationTuple) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_storage_error)?;

        if queries::tuple_exists(&mut *tx, &self.schema, tuple).await? {
            queries::delete_row(&mut *tx, &self.schema, id).await?;
            tx.commit().await.map_err(to_storage_error)?;
            return Ok(false);
        }

        match queries::set_structured_fields(&mut *tx, &self.schema, id, tuple).await {
            Ok(updated) => {
                tx.commit().await.map_err(to_storage_error)?;
                Ok(updated)
            }
            Err(StorageError::DuplicateTuple) => {
                // A concurrent writer created the same tuple first.
                drop(tx);
                queries::delete_row(&self.pool, &self.schema, id).await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn quarantine(&self, id: i64, reason: &str) -> Result<(), StorageError> {
        if !queries::quarantine_row(&self.pool, &self.schema, id, reason).await? {
            return Err(StorageError::NotFound(format!("tuple row {id}")));
        }
        Ok(())
    }
}

/// Tuples, actor index and job queue in one Postgres schema. Decisions are
/// cached in process memory.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    schema: String,
    tuples: Arc<PostgresTupleStore>,
    index: Arc<PostgresIndexStore>,
    queue: Arc<PostgresJobQueue>,
    cache: Arc<InMemoryKvCache>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, schema: &str, policy: QueuePolicy) -> Result<Self, StorageError> {
        migrations::validate_schema_name(schema)?;
        let schema = schema.to_string();

        Ok(Self {
            tuples: Arc::new(PostgresTupleStore {
                pool: pool.clone(),
                schema: schema.clone(),
            }),
            index: Arc::new(PostgresIndexStore::new(pool.clone(), schema.clone())),
            queue: Arc::new(PostgresJobQueue::new(pool.clone(), schema.clone(), policy)),
            cache: Arc::new(InMemoryKvCache::new()),
            pool,
            schema,
        })
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        schema: &str,
        policy: QueuePolicy,
    ) -> Result<Self, StorageError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(to_storage_error)?;
        Self::new(pool, schema, policy)
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrations::run_migrations(&self.pool, &self.schema).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Backend for PostgresBackend {
    type Tuples = PostgresTupleStore;
    type Index = PostgresIndexStore;
    type Queue = PostgresJobQueue;
    type Cache = InMemoryKvCache;

    fn tuples(&self) -> Arc<PostgresTupleStore> {
        Arc::clone(&self.tuples)
    }

    fn index(&self) -> Arc<PostgresIndexStore> {
        Arc::clone(&self.index)
    }

    fn queue(&self) -> Arc<PostgresJobQueue> {
        Arc::clone(&self.queue)
    }

    fn cache(&self) -> Arc<InMemoryKvCache> {
        Arc::clone(&self.cache)
    }
}
