use std::sync::Arc;
use std::time::Duration;

use rebac_core::index::{BuildReport, JobKind};
use rebac_storage::{Backend, JobQueue, NackOutcome};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::audit;
use crate::config::AppConfig;
use crate::error::AuthzError;
use crate::service::AuthzService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing was ready.
    Idle,
    Processed(BuildReport),
    Retrying { delay: Duration },
    DeadLettered,
}

/// Takes one job off the queue and applies it to the index.
pub async fn process_next<B: Backend>(
    service: &AuthzService<B>,
) -> Result<JobOutcome, AuthzError> {
    let queue = service.backend().queue();
    let Some(delivery) = queue.dequeue().await? else {
        return Ok(JobOutcome::Idle);
    };

    match service.index_builder().process(&delivery.job).await {
        Ok(report) => {
            // A check between the revoke and this job may have cached an
            // allow from the old entry.
            if matches!(delivery.job.kind, JobKind::Revoke) {
                service.invalidate(&delivery.job.key().tuple()).await;
            }
            queue.ack(&delivery).await?;
            service.metrics().record_job_processed();
            Ok(JobOutcome::Processed(report))
        }
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(
                error = %e,
                key = %delivery.job.key(),
                attempt = delivery.attempt,
                "index job failed"
            );
            match queue.nack(&delivery, &reason).await? {
                NackOutcome::Retry { delay } => {
                    service.metrics().record_job_retried();
                    Ok(JobOutcome::Retrying { delay })
                }
                NackOutcome::DeadLettered => {
                    service.metrics().record_job_dead_lettered();
                    audit::audit_job_dead_lettered(&delivery.job, delivery.attempt, &reason);
                    Ok(JobOutcome::DeadLettered)
                }
            }
        }
    }
}

/// Handles every job that is ready now. Returns how many deliveries were
/// handled, including failed ones.
pub async fn drain<B: Backend>(service: &AuthzService<B>) -> Result<usize, AuthzError> {
    let mut handled = 0;
    while process_next(service).await? != JobOutcome::Idle {
        handled += 1;
    }
    Ok(handled)
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    /// `None` disables the periodic reconciliation sweep.
    pub reconcile_interval: Option<Duration>,
    pub reconcile_page_size: usize,
    /// `None` disables the periodic purge of expired cache keys.
    pub cache_purge_interval: Option<Duration>,
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            workers: config.index.workers,
            poll_interval: Duration::from_millis(config.index.poll_interval_ms),
            reconcile_interval: config.reconcile_interval(),
            reconcile_page_size: config.index.reconcile_page_size,
            cache_purge_interval: config.cache_purge_interval(),
        }
    }
}

/// Index builder workers plus the reconciliation sweep, all stopping on
/// the same shutdown signal.
pub struct WorkerPool<B: Backend> {
    service: Arc<AuthzService<B>>,
    config: WorkerConfig,
}

impl<B: Backend> WorkerPool<B> {
    pub fn new(service: Arc<AuthzService<B>>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(self, shutdown: watch::Receiver<()>) {
        let mut tasks = JoinSet::new();

        for worker_id in 0..self.config.workers.max(1) {
            tasks.spawn(worker_loop(
                Arc::clone(&self.service),
                worker_id,
                self.config.poll_interval,
                shutdown.clone(),
            ));
        }
        if let Some(interval) = self.config.reconcile_interval {
            tasks.spawn(reconcile_loop(
                Arc::clone(&self.service),
                interval,
                self.config.reconcile_page_size,
                shutdown.clone(),
            ));
        }

        if let Some(interval) = self.config.cache_purge_interval {
            tasks.spawn(purge_loop(
                Arc::clone(&self.service),
                interval,
                shutdown.clone(),
            ));
        }

        tracing::info!(
            workers = self.config.workers.max(1),
            reconcile = self.config.reconcile_interval.is_some(),
            cache_purge = self.config.cache_purge_interval.is_some(),
            "index workers started"
        );

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "worker task failed");
            }
        }

        self.service.backend().queue().close().await;
        self.service.metrics().log_snapshot();
        tracing::info!("index workers stopped");
    }
}

async fn worker_loop<B: Backend>(
    service: Arc<AuthzService<B>>,
    worker_id: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        let idle = match process_next(&service).await {
            Ok(JobOutcome::Idle) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "failed to take index job");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        } else if shutdown.has_changed().unwrap_or(true) {
            break;
        }
    }
    tracing::debug!(worker_id, "index worker exiting");
}

async fn reconcile_loop<B: Backend>(
    service: Arc<AuthzService<B>>,
    interval: Duration,
    page_size: usize,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = service.reconcile(page_size).await {
                    tracing::warn!(error = %e, "reconcile cycle failed");
                }
                service.metrics().log_snapshot();
            }
        }
    }
}

async fn purge_loop<B: Backend>(
    service: Arc<AuthzService<B>>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let purged = service.purge_cache().await;
                if purged > 0 {
                    tracing::debug!(purged, "expired cache keys purged");
                }
            }
        }
    }
}
