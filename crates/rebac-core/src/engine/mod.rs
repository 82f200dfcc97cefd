mod cache;
mod check;

pub use cache::{
    CacheError, CacheSlot, DecisionCache, DecisionKey, InvalidationScope, KeyValueCache,
};
pub use check::{CheckEngine, CheckRequest, CheckResult};

use std::future::Future;

use crate::policy::PolicyError;
use crate::tuple::{ObjectRef, RelationTuple, SubjectRef, TupleFilter};

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("storage error: {0}")]
    StorageError(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on indirection recursion and on same-relation chain length.
    pub max_depth: usize,
    /// Bound on intermediate entities explored per indirection term.
    pub max_fanout: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_fanout: 1000,
        }
    }
}

pub trait TupleReader: Send + Sync {
    fn tuple_exists(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<bool, CheckError>> + Send;

    fn read_tuples(
        &self,
        filter: &TupleFilter,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<RelationTuple>, CheckError>> + Send;
}

/// Result of an Actor Index membership lookup. Absence is never a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLookup {
    Member,
    Unknown,
}

/// Read side of the Actor Index. Implementations swallow their own failures
/// and answer `Unknown`, which sends the engine to live evaluation.
pub trait IndexReader: Send + Sync {
    fn lookup(
        &self,
        relation: &str,
        object: &ObjectRef,
        subject: &SubjectRef,
    ) -> impl Future<Output = IndexLookup> + Send;

    fn objects_for_member(
        &self,
        subject: &SubjectRef,
        relation: &str,
    ) -> impl Future<Output = Vec<ObjectRef>> + Send;
}

/// An index that knows nothing; every check runs live.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndex;

impl IndexReader for NoIndex {
    async fn lookup(&self, _: &str, _: &ObjectRef, _: &SubjectRef) -> IndexLookup {
        IndexLookup::Unknown
    }

    async fn objects_for_member(&self, _: &SubjectRef, _: &str) -> Vec<ObjectRef> {
        Vec::new()
    }
}
