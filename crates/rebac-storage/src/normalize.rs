use rebac_core::tuple::RelationTuple;

use crate::traits::{LegacyTupleStore, StorageError};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub normalized: usize,
    /// Legacy rows whose tuple already existed in structured form.
    pub duplicates: usize,
    pub quarantined: usize,
    pub batches: usize,
}

/// The outcome of one page of legacy rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Tuples that became visible in structured form with this batch.
    pub tuples: Vec<RelationTuple>,
    pub duplicates: usize,
    pub quarantined: usize,
}

impl NormalizeReport {
    pub fn absorb(&mut self, batch: &NormalizedBatch) {
        self.batches += 1;
        self.normalized += batch.tuples.len();
        self.duplicates += batch.duplicates;
        self.quarantined += batch.quarantined;
    }
}

/// Normalizes the next page of legacy rows. Returns `None` once no legacy
/// rows remain.
pub async fn normalize_batch<S: LegacyTupleStore>(
    store: &S,
    page_size: usize,
) -> Result<Option<NormalizedBatch>, StorageError> {
    let rows = store.find_legacy(page_size.max(1)).await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut batch = NormalizedBatch::default();
    for row in rows {
        match RelationTuple::from_composite(&row.subject, &row.object) {
            Ok(tuple) => {
                if store.update_one(row.id, &tuple).await? {
                    batch.tuples.push(tuple);
                } else {
                    tracing::debug!(row_id = row.id, tuple = %tuple, "merged duplicate legacy row");
                    batch.duplicates += 1;
                }
            }
            Err(e) => {
                tracing::warn!(
                    row_id = row.id,
                    subject = %row.subject,
                    object = %row.object,
                    error = %e,
                    "quarantining unparseable legacy row"
                );
                store.quarantine(row.id, &e.to_string()).await?;
                batch.quarantined += 1;
            }
        }
    }
    Ok(Some(batch))
}

/// Fills the structured fields of every legacy row from its composite
/// columns.
///
/// Each page is re-queried from the legacy predicate rather than offset,
/// so the run can be interrupted and restarted at any point. Rows that do
/// not parse are quarantined and drop out of the predicate; the loop ends
/// on the first empty page.
pub async fn run_normalizer<S: LegacyTupleStore>(
    store: &S,
    page_size: usize,
) -> Result<NormalizeReport, StorageError> {
    let mut report = NormalizeReport::default();

    while let Some(batch) = normalize_batch(store, page_size).await? {
        report.absorb(&batch);
        tracing::info!(
            batch = report.batches,
            normalized = report.normalized,
            duplicates = report.duplicates,
            quarantined = report.quarantined,
            "normalizer batch complete"
        );
    }

    Ok(report)
}
