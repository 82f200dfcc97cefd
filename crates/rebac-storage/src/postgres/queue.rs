use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::PgPool;

use rebac_core::index::IndexJob;

use crate::traits::{Delivery, JobQueue, NackOutcome, QueuePolicy, QueueStats, StorageError};

use super::queries::to_storage_error;

/// Job queue on a table, claimed with `FOR UPDATE SKIP LOCKED` so any
/// number of workers can share it.
#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    schema: String,
    policy: QueuePolicy,
    closed: Arc<AtomicBool>,
}

impl PostgresJobQueue {
    pub(super) fn new(pool: PgPool, schema: String, policy: QueuePolicy) -> Self {
        Self {
            pool,
            schema,
            policy,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn mark_dead(&self, id: i64, reason: &str) -> Result<(), StorageError> {
        let schema = &self.schema;
        let query = format!(
            "UPDATE {schema}.index_jobs SET dead = true, locked_until = NULL, last_error = $2 \
             WHERE id = $1"
        );
        sqlx::query(&query)
            .bind(id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(())
    }

    /// Dead-letters jobs whose lock expired after their last attempt.
    async fn bury_abandoned(&self) -> Result<(), StorageError> {
        let schema = &self.schema;
        let query = format!(
            "UPDATE {schema}.index_jobs \
             SET dead = true, locked_until = NULL, last_error = 'visibility timeout expired' \
             WHERE NOT dead AND locked_until <= now() AND attempts >= $1"
        );
        let result = sqlx::query(&query)
            .bind(i32::try_from(self.policy.max_attempts).unwrap_or(i32::MAX))
            .execute(&self.pool)
            .await
            .map_err(to_storage_error)?;
        if result.rows_affected() > 0 {
            tracing::warn!(jobs = result.rows_affected(), "dead-lettered abandoned index jobs");
        }
        Ok(())
    }
}

impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: &IndexJob) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("job queue is closed".to_string()));
        }
        let payload =
            serde_json::to_string(job).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let schema = &self.schema;
        let query = format!("INSERT INTO {schema}.index_jobs (payload) VALUES ($1::jsonb)");
        sqlx::query(&query)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, StorageError> {
        self.bury_abandoned().await?;
        let schema = &self.schema;
        let query = format!(
            r#"
            UPDATE {schema}.index_jobs
            SET attempts = attempts + 1,
                locked_until = now() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM {schema}.index_jobs
                WHERE NOT dead
                  AND available_at <= now()
                  AND (locked_until IS NULL OR locked_until <= now())
                ORDER BY available_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload::text, attempts
            "#
        );
        let row: Option<(i64, String, i32)> = sqlx::query_as(&query)
            .bind(self.policy.visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_storage_error)?;

        let Some((id, payload, attempts)) = row else {
            return Ok(None);
        };

        let job: IndexJob = match serde_json::from_str(&payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "undecodable index job payload");
                self.mark_dead(id, &e.to_string()).await?;
                return Err(StorageError::Serialization(e.to_string()));
            }
        };

        Ok(Some(Delivery {
            id,
            job,
            attempt: u32::try_from(attempts).unwrap_or(u32::MAX),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), StorageError> {
        let schema = &self.schema;
        let query = format!("DELETE FROM {schema}.index_jobs WHERE id = $1");
        sqlx::query(&query)
            .bind(delivery.id)
            .execute(&self.pool)
            .await
            .map_err(to_storage_error)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<NackOutcome, StorageError> {
        if self.policy.should_dead_letter(delivery.attempt) {
            self.mark_dead(delivery.id, reason).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = self.policy.backoff(delivery.attempt, delivery.id);
        let schema = &self.schema;
        let query = format!(
            r#"
            UPDATE {schema}.index_jobs
            SET available_at = now() + make_interval(secs => $2),
                locked_until = NULL,
                last_error = $3
            WHERE id = $1
            "#
        );
        let result = sqlx::query(&query)
            .bind(delivery.id)
            .bind(delay.as_secs_f64())
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(to_storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("delivery {}", delivery.id)));
        }
        Ok(NackOutcome::Retry { delay })
    }

    async fn stats(&self) -> Result<QueueStats, StorageError> {
        let schema = &self.schema;
        let query = format!(
            r#"
            SELECT
                count(*) FILTER (WHERE NOT dead AND (locked_until IS NULL OR locked_until <= now())),
                count(*) FILTER (WHERE NOT dead AND locked_until > now()),
                count(*) FILTER (WHERE dead)
            FROM {schema}.index_jobs
            "#
        );
        let (pending, in_flight, dead): (i64, i64, i64) = sqlx::query_as(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(to_storage_error)?;

        Ok(QueueStats {
            pending: usize::try_from(pending).unwrap_or_default(),
            in_flight: usize::try_from(in_flight).unwrap_or_default(),
            dead: usize::try_from(dead).unwrap_or_default(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
