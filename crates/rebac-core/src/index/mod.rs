mod builder;

pub use builder::{BuildReport, ClosureExpander, IndexBuilder};

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::engine::CheckError;
use crate::tuple::{ObjectRef, RelationTuple, SubjectRef};

/// Identifies an Actor Index entry: the closure of `relation` rooted at
/// tuple `(root, relation, object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    pub root: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
}

impl IndexKey {
    pub fn new(root: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            root,
            relation: relation.into(),
            object,
        }
    }

    pub fn tuple(&self) -> RelationTuple {
        RelationTuple::new(self.root.clone(), &self.relation, self.object.clone())
    }
}

impl From<&RelationTuple> for IndexKey {
    fn from(tuple: &RelationTuple) -> Self {
        Self::new(tuple.subject.clone(), &tuple.relation, tuple.object.clone())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.root, self.relation, self.object)
    }
}

/// Everyone who holds `key.relation` on `key.object` by way of `key.root`:
/// the root itself plus every subject reaching it through a chain of
/// `key.relation` tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIndexEntry {
    pub key: IndexKey,
    pub members: BTreeSet<SubjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Grant,
    Revoke,
}

/// A relation change awaiting index maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJob {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
    pub kind: JobKind,
}

impl IndexJob {
    pub fn grant(tuple: &RelationTuple) -> Self {
        Self::from_tuple(tuple, JobKind::Grant)
    }

    pub fn revoke(tuple: &RelationTuple) -> Self {
        Self::from_tuple(tuple, JobKind::Revoke)
    }

    fn from_tuple(tuple: &RelationTuple, kind: JobKind) -> Self {
        Self {
            subject: tuple.subject.clone(),
            relation: tuple.relation.clone(),
            object: tuple.object.clone(),
            kind,
        }
    }

    pub fn key(&self) -> IndexKey {
        IndexKey::new(self.subject.clone(), &self.relation, self.object.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to read tuples: {0}")]
    Read(#[from] CheckError),

    #[error("failed to write index entry: {0}")]
    Write(String),
}

pub trait IndexWriter: Send + Sync {
    /// Adds `entry.members` to whatever the stored entry already holds.
    fn upsert_union(
        &self,
        entry: &ActorIndexEntry,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Overwrites the stored members with exactly `entry.members`.
    fn replace(&self, entry: &ActorIndexEntry)
    -> impl Future<Output = Result<(), IndexError>> + Send;

    fn remove(&self, key: &IndexKey) -> impl Future<Output = Result<(), IndexError>> + Send;
}
