use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    checks_total: AtomicU64,
    checks_allowed: AtomicU64,
    check_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    index_hits: AtomicU64,
    live_lookups: AtomicU64,
    jobs_processed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead_lettered: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub checks_total: u64,
    pub checks_allowed: u64,
    pub check_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub index_hits: u64,
    pub live_lookups: u64,
    pub jobs_processed: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&self, allowed: bool) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.checks_allowed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_check_error(&self) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        self.check_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation(&self, index_hits: u32, live_lookups: u32) {
        self.index_hits
            .fetch_add(u64::from(index_hits), Ordering::Relaxed);
        self.live_lookups
            .fetch_add(u64::from(live_lookups), Ordering::Relaxed);
    }

    pub fn record_job_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks_total: self.checks_total.load(Ordering::Relaxed),
            checks_allowed: self.checks_allowed.load(Ordering::Relaxed),
            check_errors: self.check_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            index_hits: self.index_hits.load(Ordering::Relaxed),
            live_lookups: self.live_lookups.load(Ordering::Relaxed),
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        tracing::info!(
            checks_total = s.checks_total,
            checks_allowed = s.checks_allowed,
            check_errors = s.check_errors,
            cache_hits = s.cache_hits,
            cache_misses = s.cache_misses,
            cache_errors = s.cache_errors,
            index_hits = s.index_hits,
            live_lookups = s.live_lookups,
            jobs_processed = s.jobs_processed,
            jobs_retried = s.jobs_retried,
            jobs_dead_lettered = s.jobs_dead_lettered,
            "metrics"
        );
    }
}
