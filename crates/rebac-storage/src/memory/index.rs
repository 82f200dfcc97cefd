use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rebac_core::index::{ActorIndexEntry, IndexKey};
use rebac_core::tuple::{ObjectRef, SubjectRef};

use crate::traits::{ActorIndexStore, Page, StorageError};

type MemberKey = (String, ObjectRef, SubjectRef);

#[derive(Debug, Default)]
struct IndexState {
    entries: BTreeMap<IndexKey, BTreeSet<SubjectRef>>,
    /// How many entries list a subject for `(relation, object)`.
    membership: HashMap<MemberKey, usize>,
}

impl IndexState {
    fn set_members(&mut self, key: &IndexKey, members: BTreeSet<SubjectRef>) {
        let old = self.entries.remove(key).unwrap_or_default();
        for subject in old.difference(&members) {
            self.release(key, subject);
        }
        for subject in members.difference(&old) {
            *self
                .membership
                .entry((key.relation.clone(), key.object.clone(), subject.clone()))
                .or_default() += 1;
        }
        if !members.is_empty() {
            self.entries.insert(key.clone(), members);
        }
    }

    fn release(&mut self, key: &IndexKey, subject: &SubjectRef) {
        let member_key = (key.relation.clone(), key.object.clone(), subject.clone());
        if let Some(count) = self.membership.get_mut(&member_key) {
            *count -= 1;
            if *count == 0 {
                self.membership.remove(&member_key);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryIndexStore {
    state: Arc<Mutex<IndexState>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl ActorIndexStore for InMemoryIndexStore {
    async fn upsert_union(&self, entry: &ActorIndexEntry) -> Result<(), StorageError> {
        let mut state = self.lock();
        let mut members = state.entries.get(&entry.key).cloned().unwrap_or_default();
        members.extend(entry.members.iter().cloned());
        state.set_members(&entry.key, members);
        Ok(())
    }

    async fn replace(&self, entry: &ActorIndexEntry) -> Result<(), StorageError> {
        self.lock().set_members(&entry.key, entry.members.clone());
        Ok(())
    }

    async fn remove(&self, key: &IndexKey) -> Result<(), StorageError> {
        self.lock().set_members(key, BTreeSet::new());
        Ok(())
    }

    async fn get(&self, key: &IndexKey) -> Result<Option<ActorIndexEntry>, StorageError> {
        Ok(self.lock().entries.get(key).map(|members| ActorIndexEntry {
            key: key.clone(),
            members: members.clone(),
        }))
    }

    async fn contains(
        &self,
        relation: &str,
        object: &ObjectRef,
        subject: &SubjectRef,
    ) -> Result<bool, StorageError> {
        let member_key = (relation.to_string(), object.clone(), subject.clone());
        Ok(self.lock().membership.contains_key(&member_key))
    }

    async fn objects_for_member(
        &self,
        subject: &SubjectRef,
        relation: &str,
    ) -> Result<Vec<ObjectRef>, StorageError> {
        let objects: BTreeSet<ObjectRef> = self
            .lock()
            .entries
            .iter()
            .filter(|(key, members)| key.relation == relation && members.contains(subject))
            .map(|(key, _)| key.object.clone())
            .collect();
        Ok(objects.into_iter().collect())
    }

    async fn list_keys(&self, page: Page) -> Result<Vec<IndexKey>, StorageError> {
        Ok(self
            .lock()
            .entries
            .keys()
            .skip(page.skip)
            .take(page.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
