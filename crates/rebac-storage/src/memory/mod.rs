mod cache;
mod index;
mod queue;
mod tuples;

pub use cache::InMemoryKvCache;
pub use index::InMemoryIndexStore;
pub use queue::{DeadLetter, InMemoryJobQueue};
pub use tuples::InMemoryTupleStore;

use std::sync::Arc;

use crate::traits::{Backend, QueuePolicy};

/// Every collaborator held in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    tuples: Arc<InMemoryTupleStore>,
    index: Arc<InMemoryIndexStore>,
    queue: Arc<InMemoryJobQueue>,
    cache: Arc<InMemoryKvCache>,
}

impl InMemoryBackend {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            tuples: Arc::new(InMemoryTupleStore::new()),
            index: Arc::new(InMemoryIndexStore::new()),
            queue: Arc::new(InMemoryJobQueue::new(policy)),
            cache: Arc::new(InMemoryKvCache::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

impl Backend for InMemoryBackend {
    type Tuples = InMemoryTupleStore;
    type Index = InMemoryIndexStore;
    type Queue = InMemoryJobQueue;
    type Cache = InMemoryKvCache;

    fn tuples(&self) -> Arc<InMemoryTupleStore> {
        Arc::clone(&self.tuples)
    }

    fn index(&self) -> Arc<InMemoryIndexStore> {
        Arc::clone(&self.index)
    }

    fn queue(&self) -> Arc<InMemoryJobQueue> {
        Arc::clone(&self.queue)
    }

    fn cache(&self) -> Arc<InMemoryKvCache> {
        Arc::clone(&self.cache)
    }
}
