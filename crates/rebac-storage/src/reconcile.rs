use rebac_core::index::{IndexJob, IndexKey};
use rebac_core::policy::PolicyRegistry;
use rebac_core::tuple::{RelationTuple, TupleFilter};

use crate::traits::{ActorIndexStore, JobQueue, Page, StorageError, TupleStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tuples_scanned: usize,
    pub grants_enqueued: usize,
    pub revokes_enqueued: usize,
    /// Tuples whose type or relation is not registered. Never indexed.
    pub orphans: Vec<RelationTuple>,
}

/// Repairs drift between the tuple store and the actor index, such as a
/// crash between a tuple write and its enqueue.
///
/// Jobs are only enqueued here; the index builder workers apply them.
pub async fn run_reconcile_cycle<S, I, Q>(
    tuples: &S,
    index: &I,
    queue: &Q,
    registry: &PolicyRegistry,
    page_size: usize,
) -> Result<ReconcileReport, StorageError>
where
    S: TupleStore,
    I: ActorIndexStore,
    Q: JobQueue,
{
    let page_size = page_size.max(1);
    let mut report = ReconcileReport::default();

    let mut page = Page::first(page_size);
    loop {
        let batch = tuples.find_many(&TupleFilter::default(), page).await?;
        if batch.is_empty() {
            break;
        }
        report.tuples_scanned += batch.len();

        for tuple in batch {
            if !registry.has_relation(&tuple.object.object_type, &tuple.relation) {
                tracing::warn!(tuple = %tuple, "tuple has no registered relation");
                report.orphans.push(tuple);
                continue;
            }
            if index.get(&IndexKey::from(&tuple)).await?.is_none() {
                queue.enqueue(&IndexJob::grant(&tuple)).await?;
                report.grants_enqueued += 1;
            }
        }
        page = page.next();
    }

    let mut page = Page::first(page_size);
    loop {
        let keys = index.list_keys(page).await?;
        if keys.is_empty() {
            break;
        }
        for key in keys {
            let tuple = key.tuple();
            if !tuples.exists(&tuple).await? {
                queue.enqueue(&IndexJob::revoke(&tuple)).await?;
                report.revokes_enqueued += 1;
            }
        }
        page = page.next();
    }

    tracing::info!(
        scanned = report.tuples_scanned,
        grants = report.grants_enqueued,
        revokes = report.revokes_enqueued,
        orphans = report.orphans.len(),
        "reconcile cycle complete"
    );
    Ok(report)
}
