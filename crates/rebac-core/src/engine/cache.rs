use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::tuple::{ObjectRef, SubjectRef};

const INITIAL_GENERATION: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// A plain key-value store with per-key expiry. No prefix scans, no deletes.
pub trait KeyValueCache: Send + Sync {
    fn get_key(&self, key: &str)
    -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn set_key(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Drops expired keys and returns how many went. Stores that expire
    /// keys on their own keep the default.
    fn purge_expired(&self) -> impl Future<Output = Result<usize, CacheError>> + Send {
        async { Ok(0) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub subject: SubjectRef,
    pub action: String,
    pub object: ObjectRef,
}

impl DecisionKey {
    pub fn new(subject: SubjectRef, action: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            action: action.into(),
            object,
        }
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decision:{}:{}:{}:{}:{}",
            self.subject.subject_type,
            self.subject.subject_id,
            self.action,
            self.object.object_type,
            self.object.object_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    Object(ObjectRef),
    Subject(SubjectRef),
    Exact(DecisionKey),
}

/// The physical key a decision lives under, pinned to the scope generations
/// observed before evaluation started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlot {
    key: String,
}

impl CacheSlot {
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

/// Memo of boolean decisions over a [`KeyValueCache`].
///
/// Object and subject scopes each carry a generation token. Every physical
/// key embeds both tokens, so writing a fresh token orphans all earlier keys
/// in that scope. Orphans expire through their TTL.
pub struct DecisionCache<C: KeyValueCache> {
    store: Arc<C>,
    ttl: Duration,
}

impl<C: KeyValueCache> DecisionCache<C> {
    pub fn new(store: Arc<C>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Resolves the slot for `key`. Call before evaluating so a concurrent
    /// invalidation retires the slot the result will be written to.
    pub async fn slot(&self, key: &DecisionKey) -> Result<CacheSlot, CacheError> {
        let object_gen = self.generation(&object_gen_key(&key.object)).await?;
        let subject_gen = self.generation(&subject_gen_key(&key.subject)).await?;

        Ok(CacheSlot {
            key: format!("{key}:{object_gen}:{subject_gen}"),
        })
    }

    pub async fn get(&self, slot: &CacheSlot) -> Result<Option<bool>, CacheError> {
        let value = self.store.get_key(&slot.key).await?;
        Ok(match value.as_deref() {
            Some("1") => Some(true),
            Some("0") => Some(false),
            _ => None,
        })
    }

    pub async fn set(&self, slot: &CacheSlot, allowed: bool) -> Result<(), CacheError> {
        let value = if allowed { "1" } else { "0" };
        self.store
            .set_key(&slot.key, value, Some(self.ttl))
            .await
    }

    pub async fn invalidate(&self, scope: &InvalidationScope) -> Result<(), CacheError> {
        match scope {
            InvalidationScope::Object(object) => self.bump(&object_gen_key(object)).await,
            InvalidationScope::Subject(subject) => self.bump(&subject_gen_key(subject)).await,
            InvalidationScope::Exact(key) => {
                let slot = self.slot(key).await?;
                self.store.set_key(&slot.key, "", Some(self.ttl)).await
            }
        }
    }

    async fn generation(&self, gen_key: &str) -> Result<String, CacheError> {
        Ok(self
            .store
            .get_key(gen_key)
            .await?
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| INITIAL_GENERATION.to_string()))
    }

    async fn bump(&self, gen_key: &str) -> Result<(), CacheError> {
        let generation = uuid::Uuid::new_v4().simple().to_string();
        // Outlives every entry written under the previous generation, so
        // expiry never resurrects a retired key.
        self.store
            .set_key(gen_key, &generation, Some(self.ttl * 2))
            .await
    }
}

fn object_gen_key(object: &ObjectRef) -> String {
    format!("gen:object:{}:{}", object.object_type, object.object_id)
}

fn subject_gen_key(subject: &SubjectRef) -> String {
    format!("gen:subject:{}:{}", subject.subject_type, subject.subject_id)
}
