use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::policy::{PolicyRegistry, Term};
use crate::tuple::{ObjectRef, RelationTuple, SubjectRef, TupleFilter};

use super::{CheckError, EngineConfig, IndexLookup, IndexReader, NoIndex, TupleReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub subject: SubjectRef,
    pub action: String,
    pub object: ObjectRef,
}

impl CheckRequest {
    pub fn new(subject: SubjectRef, action: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            action: action.into(),
            object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub index_hits: u32,
    pub live_lookups: u32,
}

/// Per-check state. `visited` maps each `(subject, action)` pair to the
/// shallowest depth it was entered at; the object never changes within one
/// check.
#[derive(Default)]
struct CheckContext {
    visited: Mutex<HashMap<(SubjectRef, String), usize>>,
    index_hits: AtomicU32,
    live_lookups: AtomicU32,
}

impl CheckContext {
    /// Re-entry is only allowed from a shallower depth, where the remaining
    /// depth budget is larger. Equal or deeper re-entry is a cycle or a
    /// repeat that cannot reach anything new.
    fn enter(&self, subject: &SubjectRef, action: &str, depth: usize) -> bool {
        let mut visited = self.visited.lock().unwrap_or_else(PoisonError::into_inner);
        match visited.entry((subject.clone(), action.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(depth);
                true
            }
            Entry::Occupied(mut slot) if depth < *slot.get() => {
                slot.insert(depth);
                true
            }
            Entry::Occupied(_) => false,
        }
    }
}

pub struct CheckEngine<T: TupleReader, I: IndexReader = NoIndex> {
    reader: Arc<T>,
    index: Arc<I>,
    registry: Arc<PolicyRegistry>,
    config: EngineConfig,
}

impl<T: TupleReader> CheckEngine<T, NoIndex> {
    /// An engine that always evaluates against live tuples.
    pub fn live(reader: Arc<T>, registry: Arc<PolicyRegistry>, config: EngineConfig) -> Self {
        Self::new(reader, Arc::new(NoIndex), registry, config)
    }
}

impl<T: TupleReader, I: IndexReader> CheckEngine<T, I> {
    pub fn new(
        reader: Arc<T>,
        index: Arc<I>,
        registry: Arc<PolicyRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            reader,
            index,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
        let ctx = CheckContext::default();

        let allowed = self
            .evaluate_action(&request.subject, &request.action, &request.object, 0, &ctx)
            .await?;

        Ok(CheckResult {
            allowed,
            index_hits: ctx.index_hits.load(Ordering::Relaxed),
            live_lookups: ctx.live_lookups.load(Ordering::Relaxed),
        })
    }

    fn evaluate_action<'a>(
        &'a self,
        subject: &'a SubjectRef,
        action: &'a str,
        object: &'a ObjectRef,
        depth: usize,
        ctx: &'a CheckContext,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CheckError>> + Send + 'a>> {
        Box::pin(async move {
            let rule = self.registry.get_rule(&object.object_type, action)?;

            if depth > self.config.max_depth {
                tracing::debug!(%subject, action, %object, depth, "max depth reached");
                return Ok(false);
            }
            if !ctx.enter(subject, action, depth) {
                tracing::debug!(%subject, action, %object, "cycle detected");
                return Ok(false);
            }

            for term in rule {
                let matched = match term {
                    Term::Direct(relation) => {
                        self.evaluate_relation(subject, relation, object, ctx)
                            .await?
                    }
                    Term::Indirect(via, target) => {
                        self.evaluate_indirect(subject, via, target, object, depth, ctx)
                            .await?
                    }
                };
                if matched {
                    tracing::trace!(%subject, action, %object, %term, "term matched");
                    return Ok(true);
                }
            }

            Ok(false)
        })
    }

    /// `subject` holds `relation` on `object`, directly or through a chain of
    /// `relation` tuples no longer than `max_depth`.
    async fn evaluate_relation(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object: &ObjectRef,
        ctx: &CheckContext,
    ) -> Result<bool, CheckError> {
        if self.index.lookup(relation, object, subject).await == IndexLookup::Member {
            ctx.index_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(true);
        }
        ctx.live_lookups.fetch_add(1, Ordering::Relaxed);

        let direct = RelationTuple::new(subject.clone(), relation, object.clone());
        if self.reader.tuple_exists(&direct).await? {
            return Ok(true);
        }

        let mut visited = HashSet::from([subject.clone()]);
        let mut frontier = vec![subject.clone()];

        for _ in 0..self.config.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let filter = TupleFilter::objects_of(node, relation);
                for tuple in self.reader.read_tuples(&filter, None).await? {
                    if tuple.object == *object {
                        return Ok(true);
                    }
                    let hop = tuple.object.as_subject();
                    if visited.insert(hop.clone()) {
                        next.push(hop);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            if visited.len() > self.config.max_fanout {
                tracing::debug!(%subject, relation, %object, "relation chain exceeds fanout");
                break;
            }
            frontier = next;
        }

        Ok(false)
    }

    async fn evaluate_indirect(
        &self,
        subject: &SubjectRef,
        via: &str,
        target: &str,
        object: &ObjectRef,
        depth: usize,
        ctx: &CheckContext,
    ) -> Result<bool, CheckError> {
        let entities = self.intermediates(subject, via, ctx).await?;
        let target_is_action = self.registry.has_action(&object.object_type, target);

        for entity in &entities {
            let matched = if target_is_action {
                self.evaluate_action(entity, target, object, depth + 1, ctx)
                    .await?
            } else {
                self.evaluate_relation(entity, target, object, ctx).await?
            };
            if matched {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Every entity `subject` reaches through `via`, from the index and from
    /// live tuples, capped at `max_fanout`.
    async fn intermediates(
        &self,
        subject: &SubjectRef,
        via: &str,
        ctx: &CheckContext,
    ) -> Result<BTreeSet<SubjectRef>, CheckError> {
        let mut found: BTreeSet<SubjectRef> = self
            .index
            .objects_for_member(subject, via)
            .await
            .iter()
            .map(ObjectRef::as_subject)
            .collect();
        ctx.live_lookups.fetch_add(1, Ordering::Relaxed);

        let mut seen = HashSet::from([subject.clone()]);
        let mut frontier = vec![subject.clone()];

        for _ in 0..self.config.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let filter = TupleFilter::objects_of(node, via);
                for tuple in self.reader.read_tuples(&filter, None).await? {
                    let entity = tuple.object.as_subject();
                    if seen.insert(entity.clone()) {
                        found.insert(entity.clone());
                        next.push(entity);
                    }
                }
            }
            if next.is_empty() || found.len() >= self.config.max_fanout {
                break;
            }
            frontier = next;
        }

        if found.len() > self.config.max_fanout {
            tracing::debug!(
                %subject,
                relation = via,
                found = found.len(),
                limit = self.config.max_fanout,
                "indirection fanout truncated"
            );
            found = found.into_iter().take(self.config.max_fanout).collect();
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::parse_policy;
    use proptest::prelude::*;

    struct TestStore {
        tuples: Vec<RelationTuple>,
    }

    impl TupleReader for TestStore {
        async fn tuple_exists(&self, tuple: &RelationTuple) -> Result<bool, CheckError> {
            Ok(self.tuples.contains(tuple))
        }

        async fn read_tuples(
            &self,
            filter: &TupleFilter,
            limit: Option<usize>,
        ) -> Result<Vec<RelationTuple>, CheckError> {
            Ok(self
                .tuples
                .iter()
                .filter(|t| filter.matches(t))
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect())
        }
    }

    struct FailingStore;

    impl TupleReader for FailingStore {
        async fn tuple_exists(&self, _: &RelationTuple) -> Result<bool, CheckError> {
            Err(CheckError::StorageError("connection refused".to_string()))
        }

        async fn read_tuples(
            &self,
            _: &TupleFilter,
            _: Option<usize>,
        ) -> Result<Vec<RelationTuple>, CheckError> {
            Err(CheckError::StorageError("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        members: HashSet<(String, ObjectRef, SubjectRef)>,
        objects: HashMap<(SubjectRef, String), Vec<ObjectRef>>,
    }

    impl IndexReader for FakeIndex {
        async fn lookup(
            &self,
            relation: &str,
            object: &ObjectRef,
            subject: &SubjectRef,
        ) -> IndexLookup {
            if self
                .members
                .contains(&(relation.to_string(), object.clone(), subject.clone()))
            {
                IndexLookup::Member
            } else {
                IndexLookup::Unknown
            }
        }

        async fn objects_for_member(&self, subject: &SubjectRef, relation: &str) -> Vec<ObjectRef> {
            self.objects
                .get(&(subject.clone(), relation.to_string()))
                .cloned()
                .unwrap_or_default()
        }
    }

    const FILE_POLICY: &str = r#"
        resource file {
            relation owner: *
            relation reader: *
            relation editor: *

            action read = owner + reader + editor + reader->read + editor->edit + owner->read + owner->edit
            action edit = owner + editor + editor->edit + owner->edit
            action delete = owner + owner->edit
        }

        resource doc {
            relation member: *
            relation viewer: *
            action view = viewer + member->viewer
        }
    "#;

    fn registry() -> Arc<PolicyRegistry> {
        let mut registry = PolicyRegistry::new();
        registry
            .register_policy(parse_policy(FILE_POLICY).unwrap())
            .unwrap();
        Arc::new(registry)
    }

    fn tuple(subject: &str, relation: &str, object: &str) -> RelationTuple {
        RelationTuple::new(
            subject.parse().unwrap(),
            relation,
            object.parse().unwrap(),
        )
    }

    fn request(subject: &str, action: &str, object: &str) -> CheckRequest {
        CheckRequest::new(subject.parse().unwrap(), action, object.parse().unwrap())
    }

    fn make_engine(tuples: Vec<RelationTuple>) -> CheckEngine<TestStore> {
        make_engine_with_config(tuples, EngineConfig::default())
    }

    fn make_engine_with_config(
        tuples: Vec<RelationTuple>,
        config: EngineConfig,
    ) -> CheckEngine<TestStore> {
        CheckEngine::live(Arc::new(TestStore { tuples }), registry(), config)
    }

    fn make_indexed_engine(
        tuples: Vec<RelationTuple>,
        index: FakeIndex,
    ) -> CheckEngine<TestStore, FakeIndex> {
        CheckEngine::new(
            Arc::new(TestStore { tuples }),
            Arc::new(index),
            registry(),
            EngineConfig::default(),
        )
    }

    // --- Configuration errors ---

    #[tokio::test]
    async fn check_rejects_unknown_type() {
        let engine = make_engine(vec![]);

        let err = engine
            .check(&request("user:1", "read", "folder:1"))
            .await
            .unwrap_err();

        assert!(
            matches!(err, CheckError::Policy(crate::policy::PolicyError::TypeNotFound(ref t)) if t == "folder"),
            "expected TypeNotFound, got: {err}"
        );
    }

    #[tokio::test]
    async fn check_rejects_unknown_action() {
        let engine = make_engine(vec![tuple("user:1", "owner", "file:7")]);

        let err = engine
            .check(&request("user:1", "share", "file:7"))
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                CheckError::Policy(crate::policy::PolicyError::ActionNotFound { ref action, .. })
                    if action == "share"
            ),
            "expected ActionNotFound, got: {err}"
        );
    }

    // --- Direct terms ---

    #[tokio::test]
    async fn direct_relation_grants_access() {
        let engine = make_engine(vec![tuple("user:1", "owner", "file:7")]);

        let result = engine
            .check(&request("user:1", "delete", "file:7"))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    #[tokio::test]
    async fn no_tuple_denies() {
        let engine = make_engine(vec![]);

        let result = engine
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn other_subject_denies() {
        let engine = make_engine(vec![tuple("user:2", "owner", "file:7")]);

        let result = engine
            .check(&request("user:1", "delete", "file:7"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn other_object_denies() {
        let engine = make_engine(vec![tuple("user:1", "owner", "file:8")]);

        let result = engine
            .check(&request("user:1", "delete", "file:7"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn any_matching_term_grants_access() {
        let engine = make_engine(vec![tuple("user:1", "editor", "file:7")]);

        assert!(
            engine
                .check(&request("user:1", "read", "file:7"))
                .await
                .unwrap()
                .allowed
        );
        assert!(
            !engine
                .check(&request("user:1", "delete", "file:7"))
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn same_relation_chain_grants_access() {
        let engine = make_engine(vec![
            tuple("user:1", "reader", "group:eng"),
            tuple("group:eng", "reader", "group:all"),
            tuple("group:all", "reader", "file:7"),
        ]);

        let result = engine
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    #[tokio::test]
    async fn chain_longer_than_max_depth_denies() {
        let tuples = vec![
            tuple("user:1", "viewer", "team:a"),
            tuple("team:a", "viewer", "team:b"),
            tuple("team:b", "viewer", "doc:1"),
        ];
        let config = EngineConfig {
            max_depth: 2,
            ..Default::default()
        };
        let engine = make_engine_with_config(tuples, config);

        let result = engine
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    // --- Indirection ---

    #[tokio::test]
    async fn indirection_through_relation_target() {
        let engine = make_engine(vec![
            tuple("user:1", "member", "team:a"),
            tuple("team:a", "viewer", "doc:1"),
        ]);

        let result = engine
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    #[tokio::test]
    async fn indirection_through_action_target() {
        let engine = make_engine(vec![
            tuple("user:1", "editor", "team:a"),
            tuple("team:a", "owner", "file:7"),
        ]);

        let result = engine
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    #[tokio::test]
    async fn indirection_requires_both_hops() {
        let engine = make_engine(vec![
            tuple("user:1", "member", "team:a"),
            tuple("team:b", "viewer", "doc:1"),
        ]);

        let result = engine
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn indirection_stops_at_max_depth() {
        let tuples = vec![
            tuple("user:1", "editor", "team:a"),
            tuple("team:a", "editor", "team:b"),
            tuple("team:b", "owner", "file:7"),
        ];
        let shallow = EngineConfig {
            max_depth: 1,
            ..Default::default()
        };

        let denied = make_engine_with_config(tuples.clone(), shallow)
            .check(&request("user:1", "edit", "file:7"))
            .await
            .unwrap();
        let allowed = make_engine(tuples)
            .check(&request("user:1", "edit", "file:7"))
            .await
            .unwrap();

        assert!(!denied.allowed);
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn cyclic_tuples_terminate_and_deny() {
        let engine = make_engine(vec![
            tuple("user:1", "reader", "user:2"),
            tuple("user:2", "reader", "user:1"),
        ]);

        let result = engine
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap();

        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn deep_first_visit_does_not_block_shallow_path() {
        let mut registry = PolicyRegistry::new();
        registry
            .register_policy(
                parse_policy(
                    "resource file { relation a: * relation b: * relation owner: * \
                     action read = a->read + b->read + owner }",
                )
                .unwrap(),
            )
            .unwrap();
        let registry = Arc::new(registry);
        let config = EngineConfig {
            max_depth: 2,
            ..Default::default()
        };
        let base = vec![
            tuple("user:1", "b", "team:t"),
            tuple("team:t", "a", "team:q"),
            tuple("team:q", "owner", "file:7"),
        ];
        let mut extended = base.clone();
        // Reaches team:t again one level deeper, through the first term.
        extended.push(tuple("user:1", "a", "team:m"));
        extended.push(tuple("team:m", "b", "team:t"));

        let before = CheckEngine::live(
            Arc::new(TestStore { tuples: base }),
            Arc::clone(&registry),
            config.clone(),
        )
        .check(&request("user:1", "read", "file:7"))
        .await
        .unwrap();
        let after = CheckEngine::live(Arc::new(TestStore { tuples: extended }), registry, config)
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap();

        assert!(before.allowed);
        assert!(after.allowed, "adding tuples must never revoke access");
    }

    #[tokio::test]
    async fn fanout_limit_ignores_extra_intermediates() {
        let tuples = vec![
            tuple("user:1", "member", "team:a"),
            tuple("user:1", "member", "team:b"),
            tuple("team:b", "viewer", "doc:1"),
        ];
        let limited = EngineConfig {
            max_fanout: 1,
            ..Default::default()
        };

        let denied = make_engine_with_config(tuples.clone(), limited)
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();
        let allowed = make_engine(tuples)
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();

        assert!(!denied.allowed);
        assert!(allowed.allowed);
    }

    // --- Actor Index ---

    #[tokio::test]
    async fn index_member_short_circuits_live_evaluation() {
        let mut index = FakeIndex::default();
        index.members.insert((
            "owner".to_string(),
            ObjectRef::new("file", "7"),
            SubjectRef::new("user", "1"),
        ));
        let engine = make_indexed_engine(vec![], index);

        let result = engine
            .check(&request("user:1", "delete", "file:7"))
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(result.index_hits, 1);
        assert_eq!(result.live_lookups, 0);
    }

    #[tokio::test]
    async fn index_unknown_falls_back_to_live_tuples() {
        let engine = make_indexed_engine(
            vec![tuple("user:1", "owner", "file:7")],
            FakeIndex::default(),
        );

        let result = engine
            .check(&request("user:1", "delete", "file:7"))
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(result.index_hits, 0);
        assert!(result.live_lookups > 0);
    }

    #[tokio::test]
    async fn index_objects_feed_indirection() {
        let mut index = FakeIndex::default();
        index.objects.insert(
            (SubjectRef::new("user", "1"), "member".to_string()),
            vec![ObjectRef::new("team", "a")],
        );
        let engine = make_indexed_engine(vec![tuple("team:a", "viewer", "doc:1")], index);

        let result = engine
            .check(&request("user:1", "view", "doc:1"))
            .await
            .unwrap();

        assert!(result.allowed);
    }

    // --- Store failures ---

    #[tokio::test]
    async fn storage_error_aborts_check() {
        let engine = CheckEngine::live(
            Arc::new(FailingStore),
            registry(),
            EngineConfig::default(),
        );

        let err = engine
            .check(&request("user:1", "read", "file:7"))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::StorageError(_)));
    }

    // --- Composition ---

    const RELATIONS: [&str; 2] = ["a", "b"];
    const ACTIONS: [&str; 2] = ["act", "alt"];
    /// Entities are `node:0` to `node:4`; checks always target `node:4`,
    /// which never appears as a tuple subject.
    const NODES: usize = 5;
    const TARGET: usize = 4;

    /// `(via, target)`: a bare relation when `target` is `None`.
    const TERM_POOL: [(&str, Option<&str>); 8] = [
        ("a", None),
        ("b", None),
        ("a", Some("act")),
        ("b", Some("act")),
        ("a", Some("alt")),
        ("b", Some("alt")),
        ("a", Some("b")),
        ("b", Some("a")),
    ];

    fn term_text(index: usize) -> String {
        match TERM_POOL[index] {
            (relation, None) => relation.to_string(),
            (via, Some(target)) => format!("{via}->{target}"),
        }
    }

    /// Every node reachable from `from` over one or more `relation` edges.
    fn reach(edges: &[(usize, usize, usize)], from: usize, relation: &str) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![from];
        while let Some(node) = frontier.pop() {
            for &(s, r, o) in edges {
                if s == node && RELATIONS[r] == relation && seen.insert(o) {
                    frontier.push(o);
                }
            }
        }
        seen
    }

    /// Least fixpoint of both rules over all nodes, computed by iteration.
    fn model_decisions(
        edges: &[(usize, usize, usize)],
        rules: [&[usize]; 2],
    ) -> [[bool; NODES]; 2] {
        let holds =
            |subject: usize, relation: &str| reach(edges, subject, relation).contains(&TARGET);
        let mut allowed = [[false; NODES]; 2];
        loop {
            let mut changed = false;
            for action in 0..ACTIONS.len() {
                for subject in 0..NODES {
                    if allowed[action][subject] {
                        continue;
                    }
                    let matched = rules[action].iter().any(|&term| match TERM_POOL[term] {
                        (relation, None) => holds(subject, relation),
                        (via, Some(target)) => reach(edges, subject, via)
                            .into_iter()
                            .filter(|&entity| entity != subject)
                            .any(|entity| match ACTIONS.iter().position(|a| *a == target) {
                                Some(next) => allowed[next][entity],
                                None => holds(entity, target),
                            }),
                    });
                    if matched {
                        allowed[action][subject] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                return allowed;
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn decision_matches_fixpoint_of_rules(
            edges in proptest::collection::vec(
                (0usize..TARGET, 0usize..2, 0usize..NODES),
                0..10,
            ),
            act in proptest::sample::subsequence((0..TERM_POOL.len()).collect::<Vec<_>>(), 1..=4),
            alt in proptest::sample::subsequence((0..TERM_POOL.len()).collect::<Vec<_>>(), 1..=4),
            subject in 0usize..TARGET,
            action in 0usize..2,
        ) {
            let rule = |terms: &[usize]| {
                terms.iter().map(|t| term_text(*t)).collect::<Vec<_>>().join(" + ")
            };
            let source = format!(
                "resource node {{ relation a: * relation b: * \
                 action act = {} action alt = {} }}",
                rule(act.as_slice()),
                rule(alt.as_slice()),
            );
            let mut registry = PolicyRegistry::new();
            registry.register_policy(parse_policy(&source).unwrap()).unwrap();

            let tuples = edges
                .iter()
                .map(|&(s, r, o)| {
                    tuple(&format!("node:{s}"), RELATIONS[r], &format!("node:{o}"))
                })
                .collect();
            let config = EngineConfig {
                max_depth: 16,
                max_fanout: 1000,
            };
            let engine =
                CheckEngine::live(Arc::new(TestStore { tuples }), Arc::new(registry), config);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let result = runtime
                .block_on(engine.check(&request(
                    &format!("node:{subject}"),
                    ACTIONS[action],
                    &format!("node:{TARGET}"),
                )))
                .unwrap();

            let expected =
                model_decisions(&edges, [act.as_slice(), alt.as_slice()])[action][subject];
            prop_assert_eq!(result.allowed, expected, "policy: {}, tuples: {:?}", source, edges);
        }
    }
}
