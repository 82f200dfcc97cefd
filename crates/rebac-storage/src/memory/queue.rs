use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rebac_core::index::IndexJob;

use crate::traits::{Delivery, JobQueue, NackOutcome, QueuePolicy, QueueStats, StorageError};

#[derive(Debug, Clone)]
struct QueuedJob {
    id: i64,
    job: IndexJob,
    attempts: u32,
    available_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub job: IndexJob,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    ready: VecDeque<QueuedJob>,
    in_flight: HashMap<i64, QueuedJob>,
    dead: Vec<DeadLetter>,
    closed: bool,
}

/// Process-local job queue. Delivery survives worker failures but not a
/// process restart; the reconciliation sweep repairs what is lost.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    policy: QueuePolicy,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

impl InMemoryJobQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }
}

const VISIBILITY_EXPIRED: &str = "visibility timeout expired";

/// Returns in-flight jobs whose visibility timeout elapsed to the ready
/// queue, or dead-letters them once their last attempt is spent.
fn reclaim_expired(state: &mut QueueState, policy: &QueuePolicy, now: Instant) {
    let expired: Vec<i64> = state
        .in_flight
        .iter()
        .filter(|(_, j)| j.available_at <= now)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        let Some(mut queued) = state.in_flight.remove(&id) else {
            continue;
        };
        if policy.should_dead_letter(queued.attempts) {
            tracing::warn!(
                job_id = id,
                attempts = queued.attempts,
                "dead-lettering abandoned index job"
            );
            state.dead.push(DeadLetter {
                job: queued.job,
                attempts: queued.attempts,
                reason: VISIBILITY_EXPIRED.to_string(),
            });
        } else {
            queued.available_at = now;
            state.ready.push_back(queued);
        }
    }
}

impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &IndexJob) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StorageError::Unavailable("job queue is closed".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.ready.push_back(QueuedJob {
            id,
            job: job.clone(),
            attempts: 0,
            available_at: Instant::now(),
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, StorageError> {
        let mut state = self.lock();
        let now = Instant::now();
        reclaim_expired(&mut state, &self.policy, now);
        let Some(position) = state.ready.iter().position(|j| j.available_at <= now) else {
            return Ok(None);
        };
        let Some(mut queued) = state.ready.remove(position) else {
            return Ok(None);
        };

        queued.attempts += 1;
        queued.available_at = now + self.policy.visibility_timeout;
        let delivery = Delivery {
            id: queued.id,
            job: queued.job.clone(),
            attempt: queued.attempts,
        };
        state.in_flight.insert(queued.id, queued);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.in_flight.remove(&delivery.id).is_none() {
            // Redelivered after the visibility timeout; the late ack still wins.
            state.ready.retain(|j| j.id != delivery.id);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<NackOutcome, StorageError> {
        let mut state = self.lock();
        let mut queued = state
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| StorageError::NotFound(format!("delivery {}", delivery.id)))?;

        if self.policy.should_dead_letter(queued.attempts) {
            state.dead.push(DeadLetter {
                job: queued.job,
                attempts: queued.attempts,
                reason: reason.to_string(),
            });
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = self.policy.backoff(queued.attempts, queued.id);
        queued.available_at = Instant::now() + delay;
        state.ready.push_back(queued);
        Ok(NackOutcome::Retry { delay })
    }

    async fn stats(&self) -> Result<QueueStats, StorageError> {
        let state = self.lock();
        Ok(QueueStats {
            pending: state.ready.len(),
            in_flight: state.in_flight.len(),
            dead: state.dead.len(),
        })
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}
