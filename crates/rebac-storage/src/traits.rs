use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rebac_core::engine::KeyValueCache;
use rebac_core::index::{ActorIndexEntry, IndexJob, IndexKey};
use rebac_core::tuple::{ObjectRef, RelationTuple, SubjectRef, TupleFilter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("tuple already exists")]
    DuplicateTuple,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Offset pagination for bulk reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self {
            skip: 0,
            limit: None,
        }
    }

    pub fn first(limit: usize) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }

    pub fn next(self) -> Self {
        Self {
            skip: self.skip + self.limit.unwrap_or(0),
            limit: self.limit,
        }
    }
}

pub trait TupleStore: Send + Sync {
    /// Fails with [`StorageError::DuplicateTuple`] when the tuple exists.
    fn create(&self, tuple: &RelationTuple)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    fn find_one(
        &self,
        filter: &TupleFilter,
    ) -> impl Future<Output = Result<Option<RelationTuple>, StorageError>> + Send;

    fn find_many(
        &self,
        filter: &TupleFilter,
        page: Page,
    ) -> impl Future<Output = Result<Vec<RelationTuple>, StorageError>> + Send;

    /// Returns whether a tuple was removed.
    fn delete_one(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn exists(&self, tuple: &RelationTuple)
    -> impl Future<Output = Result<bool, StorageError>> + Send;
}

/// A row still carrying only the composite `"type:id#relation"` subject and
/// `"type:id"` object columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRow {
    pub id: i64,
    pub subject: String,
    pub object: String,
}

pub trait LegacyTupleStore: Send + Sync {
    fn insert_legacy(
        &self,
        subject: &str,
        object: &str,
    ) -> impl Future<Output = Result<i64, StorageError>> + Send;

    /// Rows with no structured fields and no quarantine mark.
    fn find_legacy(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LegacyRow>, StorageError>> + Send;

    /// Writes the structured fields of row `id`. When the structured tuple
    /// already exists the legacy row is merged away and `false` is returned.
    fn update_one(
        &self,
        id: i64,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn quarantine(
        &self,
        id: i64,
        reason: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

pub trait ActorIndexStore: Send + Sync {
    fn upsert_union(
        &self,
        entry: &ActorIndexEntry,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn replace(
        &self,
        entry: &ActorIndexEntry,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn remove(&self, key: &IndexKey) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn get(
        &self,
        key: &IndexKey,
    ) -> impl Future<Output = Result<Option<ActorIndexEntry>, StorageError>> + Send;

    /// Whether any entry for `(relation, object)` lists `subject`.
    fn contains(
        &self,
        relation: &str,
        object: &ObjectRef,
        subject: &SubjectRef,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn objects_for_member(
        &self,
        subject: &SubjectRef,
        relation: &str,
    ) -> impl Future<Output = Result<Vec<ObjectRef>, StorageError>> + Send;

    fn list_keys(
        &self,
        page: Page,
    ) -> impl Future<Output = Result<Vec<IndexKey>, StorageError>> + Send;
}

/// Redelivery policy shared by queue implementations.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// How long a dequeued job stays invisible before it is redelivered.
    pub visibility_timeout: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

impl QueuePolicy {
    /// Exponential delay before attempt `attempt + 1`, plus up to 20%
    /// jitter derived from the job id.
    pub fn backoff(&self, attempt: u32, job_id: i64) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff);
        let jitter_permille = job_id.rem_euclid(200) as u32;
        (base + base * jitter_permille / 1000).min(self.max_backoff)
    }

    pub fn should_dead_letter(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub job: IndexJob,
    /// 1 on first delivery.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Retry { delay: Duration },
    DeadLettered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead: usize,
}

/// Durable at-least-once delivery of index jobs.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: &IndexJob) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Next visible job, or `None` when nothing is ready. Never blocks.
    fn dequeue(&self) -> impl Future<Output = Result<Option<Delivery>, StorageError>> + Send;

    fn ack(&self, delivery: &Delivery) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn nack(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> impl Future<Output = Result<NackOutcome, StorageError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<QueueStats, StorageError>> + Send;

    /// Stops accepting jobs. Already queued jobs remain deliverable.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// The set of collaborators one deployment runs against.
pub trait Backend: Send + Sync + 'static {
    type Tuples: TupleStore + LegacyTupleStore + 'static;
    type Index: ActorIndexStore + 'static;
    type Queue: JobQueue + 'static;
    type Cache: KeyValueCache + 'static;

    fn tuples(&self) -> Arc<Self::Tuples>;
    fn index(&self) -> Arc<Self::Index>;
    fn queue(&self) -> Arc<Self::Queue>;
    fn cache(&self) -> Arc<Self::Cache>;
}
