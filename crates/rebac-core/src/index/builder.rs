use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::engine::{CheckError, EngineConfig, TupleReader};
use crate::tuple::{SubjectRef, TupleFilter};

use super::{ActorIndexEntry, IndexError, IndexJob, IndexKey, IndexWriter, JobKind};

/// Computes the member set of an index entry from current tuples.
pub struct ClosureExpander<T: TupleReader> {
    reader: Arc<T>,
    config: EngineConfig,
}

impl<T: TupleReader> ClosureExpander<T> {
    pub fn new(reader: Arc<T>, config: EngineConfig) -> Self {
        Self { reader, config }
    }

    /// `root` plus every subject reaching `root` through `relation` tuples.
    /// Chains stop one hop short of `max_depth` since the root's own tuple
    /// is the last hop to the object.
    pub async fn members(
        &self,
        root: &SubjectRef,
        relation: &str,
    ) -> Result<BTreeSet<SubjectRef>, CheckError> {
        let mut members = BTreeSet::from([root.clone()]);
        let mut frontier = vec![root.clone()];

        for _ in 1..self.config.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let filter = TupleFilter::subjects_of(relation, &node.as_object());
                for tuple in self.reader.read_tuples(&filter, None).await? {
                    if members.insert(tuple.subject.clone()) {
                        next.push(tuple.subject);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            if members.len() > self.config.max_fanout {
                tracing::debug!(
                    %root,
                    relation,
                    members = members.len(),
                    "closure truncated at fanout limit"
                );
                break;
            }
            frontier = next;
        }

        Ok(members)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub refreshed: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Applies relation changes to the Actor Index.
///
/// Every pass reads current tuples, so reprocessing a job or processing jobs
/// out of order converges on the same index state. Grants only ever add
/// members; revokes recompute the affected entries from scratch.
pub struct IndexBuilder<T: TupleReader, W: IndexWriter> {
    reader: Arc<T>,
    writer: Arc<W>,
    expander: ClosureExpander<T>,
    config: EngineConfig,
}

impl<T: TupleReader, W: IndexWriter> IndexBuilder<T, W> {
    pub fn new(reader: Arc<T>, writer: Arc<W>, config: EngineConfig) -> Self {
        Self {
            expander: ClosureExpander::new(Arc::clone(&reader), config.clone()),
            reader,
            writer,
            config,
        }
    }

    pub async fn process(&self, job: &IndexJob) -> Result<BuildReport, IndexError> {
        let mut report = BuildReport::default();
        self.refresh(&job.key(), job.kind, &mut report).await?;

        // Entries rooted at the job's object (and above it) list the job's
        // subject as a nested member.
        let start = job.object.as_subject();
        let mut visited = HashSet::from([start.clone()]);
        let mut frontier = vec![start];

        for _ in 1..self.config.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let filter = TupleFilter::objects_of(node, &job.relation);
                for tuple in self.reader.read_tuples(&filter, None).await? {
                    self.refresh(&IndexKey::from(&tuple), job.kind, &mut report)
                        .await?;
                    let parent = tuple.object.as_subject();
                    if visited.insert(parent.clone()) {
                        next.push(parent);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        tracing::debug!(
            key = %job.key(),
            kind = ?job.kind,
            refreshed = report.refreshed,
            removed = report.removed,
            skipped = report.skipped,
            "index job processed"
        );
        Ok(report)
    }

    async fn refresh(
        &self,
        key: &IndexKey,
        kind: JobKind,
        report: &mut BuildReport,
    ) -> Result<(), IndexError> {
        if !self.reader.tuple_exists(&key.tuple()).await? {
            match kind {
                JobKind::Grant => report.skipped += 1,
                JobKind::Revoke => {
                    self.writer.remove(key).await?;
                    report.removed += 1;
                }
            }
            return Ok(());
        }

        let members = self.expander.members(&key.root, &key.relation).await?;
        let entry = ActorIndexEntry {
            key: key.clone(),
            members,
        };
        match kind {
            JobKind::Grant => self.writer.upsert_union(&entry).await?,
            JobKind::Revoke => self.writer.replace(&entry).await?,
        }
        report.refreshed += 1;
        Ok(())
    }
}
