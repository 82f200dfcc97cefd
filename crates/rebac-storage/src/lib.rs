pub mod memory;
pub mod normalize;
pub mod postgres;
pub mod reconcile;
pub mod traits;

pub use memory::InMemoryBackend;
pub use normalize::{NormalizeReport, NormalizedBatch, normalize_batch, run_normalizer};
pub use postgres::PostgresBackend;
pub use reconcile::{ReconcileReport, run_reconcile_cycle};
pub use traits::{
    ActorIndexStore, Backend, Delivery, JobQueue, LegacyRow, LegacyTupleStore, NackOutcome, Page,
    QueuePolicy, QueueStats, StorageError, TupleStore,
};
