use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rebac_core::engine::{
    CheckEngine, CheckRequest, DecisionCache, DecisionKey, EngineConfig, InvalidationScope,
    KeyValueCache,
};
use rebac_core::index::{IndexBuilder, IndexJob};
use rebac_core::policy::{Policy, PolicyLimits, PolicyRegistry, ResourceDefinition, parse_policy};
use rebac_core::tuple::{ObjectRef, PermissionTuple, RelationTuple, SubjectRef};
use rebac_storage::normalize::normalize_batch;
use rebac_storage::reconcile::run_reconcile_cycle;
use rebac_storage::{
    Backend, JobQueue, NormalizeReport, ReconcileReport, StorageError, TupleStore,
};

use crate::adapter::{StoreIndex, StoreTupleReader};
use crate::audit;
use crate::error::AuthzError;
use crate::metrics::Metrics;

pub type ServiceEngine<B> = CheckEngine<
    StoreTupleReader<<B as Backend>::Tuples>,
    StoreIndex<<B as Backend>::Index>,
>;

pub type ServiceIndexBuilder<B> =
    IndexBuilder<StoreTupleReader<<B as Backend>::Tuples>, StoreIndex<<B as Backend>::Index>>;

/// The authorization context: policy registry, stores and decision cache.
/// Built once per process and shared behind an `Arc`.
pub struct AuthzService<B: Backend> {
    backend: B,
    registry: RwLock<Arc<PolicyRegistry>>,
    engine_config: EngineConfig,
    cache: Option<DecisionCache<B::Cache>>,
    metrics: Arc<Metrics>,
}

impl<B: Backend> AuthzService<B> {
    pub fn new(backend: B, engine_config: EngineConfig, limits: PolicyLimits) -> Self {
        Self {
            backend,
            registry: RwLock::new(Arc::new(PolicyRegistry::with_limits(limits))),
            engine_config,
            cache: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(DecisionCache::new(self.backend.cache(), ttl));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    /// The registry as of now. Later registrations do not affect the
    /// returned snapshot.
    pub fn registry(&self) -> Arc<PolicyRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn register_resource(&self, definition: ResourceDefinition) -> Result<(), AuthzError> {
        let (resource_type, relations, actions) = (
            definition.resource_type.clone(),
            definition.relations.len(),
            definition.actions.len(),
        );
        self.update_registry(|registry| registry.register_resource(definition))?;
        audit::audit_resource_registered(&resource_type, relations, actions);
        Ok(())
    }

    /// Registers every resource of `policy`, or none of them.
    pub fn register_policy(&self, policy: Policy) -> Result<(), AuthzError> {
        let summary: Vec<(String, usize, usize)> = policy
            .resources
            .iter()
            .map(|r| (r.resource_type.clone(), r.relations.len(), r.actions.len()))
            .collect();
        self.update_registry(|registry| registry.register_policy(policy))?;
        for (resource_type, relations, actions) in &summary {
            audit::audit_resource_registered(resource_type, *relations, *actions);
        }
        Ok(())
    }

    pub fn load_policy(&self, source: &str) -> Result<(), AuthzError> {
        self.register_policy(parse_policy(source)?)
    }

    fn update_registry<F>(&self, f: F) -> Result<(), AuthzError>
    where
        F: FnOnce(&mut PolicyRegistry) -> Result<(), rebac_core::policy::PolicyError>,
    {
        let mut guard = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut staged = PolicyRegistry::clone(&guard);
        f(&mut staged)?;
        *guard = Arc::new(staged);
        Ok(())
    }

    pub fn engine(&self) -> ServiceEngine<B> {
        CheckEngine::new(
            Arc::new(StoreTupleReader::new(self.backend.tuples())),
            Arc::new(StoreIndex::new(self.backend.index())),
            self.registry(),
            self.engine_config.clone(),
        )
    }

    pub fn index_builder(&self) -> ServiceIndexBuilder<B> {
        IndexBuilder::new(
            Arc::new(StoreTupleReader::new(self.backend.tuples())),
            Arc::new(StoreIndex::new(self.backend.index())),
            self.engine_config.clone(),
        )
    }

    pub async fn check_permission(
        &self,
        subject: &SubjectRef,
        action: &str,
        object: &ObjectRef,
    ) -> Result<bool, AuthzError> {
        let result = self.evaluate(subject, action, object).await;
        match &result {
            Ok(allowed) => self.metrics.record_check(*allowed),
            Err(e) => {
                self.metrics.record_check_error();
                tracing::warn!(error = %e, %subject, action, %object, "permission check failed");
            }
        }
        result
    }

    async fn evaluate(
        &self,
        subject: &SubjectRef,
        action: &str,
        object: &ObjectRef,
    ) -> Result<bool, AuthzError> {
        subject.validate()?;
        object.validate()?;
        let engine = self.engine();
        engine.registry().get_rule(&object.object_type, action)?;

        let key = DecisionKey::new(subject.clone(), action, object.clone());
        let slot = match &self.cache {
            Some(cache) => match cache.slot(&key).await {
                Ok(slot) => {
                    match cache.get(&slot).await {
                        Ok(Some(allowed)) => {
                            self.metrics.record_cache_hit();
                            return Ok(allowed);
                        }
                        Ok(None) => self.metrics.record_cache_miss(),
                        Err(e) => {
                            self.metrics.record_cache_error();
                            tracing::warn!(error = %e, %key, "decision cache read failed");
                        }
                    }
                    Some(slot)
                }
                Err(e) => {
                    self.metrics.record_cache_error();
                    tracing::warn!(error = %e, %key, "decision cache unavailable");
                    None
                }
            },
            None => None,
        };

        let request = CheckRequest::new(subject.clone(), action, object.clone());
        let result = engine.check(&request).await?;
        self.metrics
            .record_evaluation(result.index_hits, result.live_lookups);

        if let (Some(cache), Some(slot)) = (&self.cache, slot)
            && let Err(e) = cache.set(&slot, result.allowed).await
        {
            self.metrics.record_cache_error();
            tracing::warn!(error = %e, %key, "decision cache write failed");
        }

        tracing::debug!(
            %subject,
            action,
            %object,
            allowed = result.allowed,
            index_hits = result.index_hits,
            live_lookups = result.live_lookups,
            "permission evaluated"
        );
        Ok(result.allowed)
    }

    pub async fn grant_relation(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object: &ObjectRef,
    ) -> Result<(), AuthzError> {
        subject.validate()?;
        object.validate()?;
        let registry = self.registry();
        if !registry.allows_subject(&object.object_type, relation, &subject.subject_type)? {
            return Err(AuthzError::InvalidSubject {
                resource_type: object.object_type.clone(),
                relation: relation.to_string(),
                subject_type: subject.subject_type.clone(),
            });
        }

        let tuple = RelationTuple::new(subject.clone(), relation, object.clone());
        let created = match self.backend.tuples().create(&tuple).await {
            Ok(()) => true,
            Err(StorageError::DuplicateTuple) => false,
            Err(e) => return Err(e.into()),
        };

        self.invalidate(&tuple).await;
        self.enqueue(IndexJob::grant(&tuple)).await;
        audit::audit_relation_granted(&tuple, created);
        Ok(())
    }

    pub async fn revoke_relation(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object: &ObjectRef,
    ) -> Result<(), AuthzError> {
        subject.validate()?;
        object.validate()?;
        self.registry()
            .get_relation(&object.object_type, relation)?;

        let tuple = RelationTuple::new(subject.clone(), relation, object.clone());
        let removed = self.backend.tuples().delete_one(&tuple).await?;

        if removed {
            self.invalidate(&tuple).await;
            self.enqueue(IndexJob::revoke(&tuple)).await;
        }
        audit::audit_relation_revoked(&tuple, removed);
        Ok(())
    }

    pub async fn grant_permission(&self, permission: &PermissionTuple) -> Result<(), AuthzError> {
        self.grant_relation(
            &permission.subject,
            permission.role.as_str(),
            &permission.object,
        )
        .await
    }

    pub async fn revoke_permission(&self, permission: &PermissionTuple) -> Result<(), AuthzError> {
        self.revoke_relation(
            &permission.subject,
            permission.role.as_str(),
            &permission.object,
        )
        .await
    }

    pub async fn reconcile(&self, page_size: usize) -> Result<ReconcileReport, AuthzError> {
        let report = run_reconcile_cycle(
            &*self.backend.tuples(),
            &*self.backend.index(),
            &*self.backend.queue(),
            &self.registry(),
            page_size,
        )
        .await?;
        Ok(report)
    }

    /// Normalizes legacy rows a page at a time. Every tuple that becomes
    /// visible is treated like a fresh grant: cached decisions touching it
    /// are retired and an index job is enqueued.
    pub async fn normalize_tuples(&self, page_size: usize) -> Result<NormalizeReport, AuthzError> {
        let tuples = self.backend.tuples();
        let mut report = NormalizeReport::default();

        while let Some(batch) = normalize_batch(&*tuples, page_size).await? {
            for tuple in &batch.tuples {
                self.invalidate(tuple).await;
                self.enqueue(IndexJob::grant(tuple)).await;
            }
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

    /// Drops expired decision and generation keys. Failures are logged and
    /// count as nothing purged.
    pub async fn purge_cache(&self) -> usize {
        match self.backend.cache().purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                self.metrics.record_cache_error();
                tracing::warn!(error = %e, "decision cache purge failed");
                0
            }
        }
    }

    // Runs after the store write so any decision computed before it lands
    // under a retired generation.
    pub(crate) async fn invalidate(&self, tuple: &RelationTuple) {
        let Some(cache) = &self.cache else {
            return;
        };
        let scopes = [
            InvalidationScope::Object(tuple.object.clone()),
            InvalidationScope::Subject(tuple.subject.clone()),
        ];
        for scope in &scopes {
            if let Err(e) = cache.invalidate(scope).await {
                self.metrics.record_cache_error();
                tracing::warn!(error = %e, ?scope, tuple = %tuple, "decision cache invalidation failed");
            }
        }
    }

    // A lost job only delays indexing; the reconciliation sweep re-enqueues it.
    async fn enqueue(&self, job: IndexJob) {
        if let Err(e) = self.backend.queue().enqueue(&job).await {
            tracing::error!(error = %e, key = %job.key(), kind = ?job.kind, "failed to enqueue index job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::drain;
    use proptest::prelude::*;
    use rebac_core::policy::{PolicyError, RelationDef, Term};
    use rebac_core::tuple::Role;
    use rebac_storage::memory::InMemoryBackend;
    use rebac_storage::{ActorIndexStore, Page};

    const FILE_POLICY: &str = r#"
        resource file {
            relation owner: user
            relation editor: user | group
            relation reader: user | group
            action delete = owner
            action edit = editor + owner
            action read = owner + reader + editor + reader->read
        }

        resource group {
            relation member: user | group
            action participate = member
        }
    "#;

    fn user(id: &str) -> SubjectRef {
        SubjectRef::new("user", id)
    }

    fn file(id: &str) -> ObjectRef {
        ObjectRef::new("file", id)
    }

    fn service() -> AuthzService<InMemoryBackend> {
        let service = AuthzService::new(
            InMemoryBackend::default(),
            EngineConfig::default(),
            PolicyLimits::default(),
        )
        .with_cache(Duration::from_secs(300));
        service.load_policy(FILE_POLICY).unwrap();
        service
    }

    // --- Registration ---

    #[test]
    fn registering_the_same_type_twice_fails() {
        let service = service();

        let result = service.register_resource(
            ResourceDefinition::new("file").with_relation(RelationDef::any("owner")),
        );

        assert!(matches!(
            result,
            Err(AuthzError::Configuration(PolicyError::AlreadyRegistered(ref t))) if t == "file"
        ));
    }

    #[test]
    fn failed_policy_registers_nothing() {
        let service = service();

        let result = service.load_policy(
            "resource folder { relation owner: user action view = owner } \
             resource bad { relation owner: user action view = viewer }",
        );

        assert!(result.is_err());
        assert!(service.registry().get("folder").is_err());
    }

    #[test]
    fn registry_snapshot_is_stable_across_registration() {
        let service = service();
        let before = service.registry();

        service
            .register_resource(
                ResourceDefinition::new("folder")
                    .with_relation(RelationDef::any("owner"))
                    .with_action("view", vec![Term::direct("owner")]),
            )
            .unwrap();

        assert!(before.get("folder").is_err());
        assert!(service.registry().get("folder").is_ok());
    }

    // --- Checks ---

    #[tokio::test]
    async fn unknown_type_or_action_is_configuration_error() {
        let service = service();

        let unknown_type = service
            .check_permission(&user("1"), "read", &ObjectRef::new("folder", "1"))
            .await;
        let unknown_action = service
            .check_permission(&user("1"), "share", &file("1"))
            .await;

        assert!(unknown_type.unwrap_err().is_configuration());
        assert!(unknown_action.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn file_scenario_end_to_end() {
        let service = service();

        service
            .grant_permission(&PermissionTuple::new(user("42"), Role::Owner, file("7")))
            .await
            .unwrap();

        for action in ["read", "edit", "delete"] {
            assert!(
                service
                    .check_permission(&user("42"), action, &file("7"))
                    .await
                    .unwrap(),
                "owner should be able to {action}"
            );
        }
        assert!(
            !service
                .check_permission(&user("99"), "read", &file("7"))
                .await
                .unwrap()
        );

        service
            .grant_relation(&user("99"), "reader", &file("7"))
            .await
            .unwrap();
        assert!(
            service
                .check_permission(&user("99"), "read", &file("7"))
                .await
                .unwrap()
        );
        assert!(
            !service
                .check_permission(&user("99"), "edit", &file("7"))
                .await
                .unwrap()
        );

        service
            .revoke_relation(&user("99"), "reader", &file("7"))
            .await
            .unwrap();
        assert!(
            !service
                .check_permission(&user("99"), "read", &file("7"))
                .await
                .unwrap()
        );
    }

    const FULL_FILE_POLICY: &str = r#"
        resource file {
            relation owner: user
            relation reader: user
            relation editor: user
            action read = owner + reader + editor + reader->read + editor->edit + owner->read + owner->edit
            action edit = owner + editor + editor->edit + owner->edit
            action delete = owner + owner->edit
        }
    "#;

    #[tokio::test]
    async fn owner_reader_lifecycle_on_full_file_rules() {
        let service = AuthzService::new(
            InMemoryBackend::default(),
            EngineConfig::default(),
            PolicyLimits::default(),
        )
        .with_cache(Duration::from_secs(300));
        service.load_policy(FULL_FILE_POLICY).unwrap();
        service
            .grant_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();

        let service = &service;
        let check = move |subject: &'static str, action: &'static str| async move {
            service
                .check_permission(&user(subject), action, &file("7"))
                .await
                .unwrap()
        };

        assert!(check("42", "delete").await);
        assert!(!check("43", "delete").await);

        service
            .grant_relation(&user("43"), "reader", &file("7"))
            .await
            .unwrap();
        assert!(check("43", "read").await);
        assert!(!check("43", "edit").await);
        assert!(!check("43", "delete").await);

        service
            .revoke_relation(&user("43"), "reader", &file("7"))
            .await
            .unwrap();
        assert!(!check("43", "read").await);
        assert!(check("42", "delete").await, "other grants are untouched");
    }

    #[tokio::test]
    async fn nested_group_membership_grants_read() {
        let service = service();
        let eng = SubjectRef::new("group", "eng");
        service
            .grant_relation(&eng, "reader", &file("7"))
            .await
            .unwrap();
        service
            .grant_relation(&user("5"), "member", &ObjectRef::new("group", "eng"))
            .await
            .unwrap();

        assert!(
            service
                .check_permission(&eng, "read", &file("7"))
                .await
                .unwrap()
        );
        assert!(
            !service
                .check_permission(&user("5"), "read", &file("7"))
                .await
                .unwrap(),
            "membership is a different relation than reader"
        );
    }

    #[tokio::test]
    async fn grant_rejects_disallowed_subject_type() {
        let service = service();

        let result = service
            .grant_relation(&SubjectRef::new("group", "eng"), "owner", &file("7"))
            .await;

        assert!(matches!(result, Err(AuthzError::InvalidSubject { .. })));
        assert!(
            !service
                .backend()
                .tuples()
                .exists(&RelationTuple::new(
                    SubjectRef::new("group", "eng"),
                    "owner",
                    file("7")
                ))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn ids_containing_key_separators_are_rejected() {
        let service = service();
        let tricky = user("1:read:file");

        let grant = service.grant_relation(&tricky, "reader", &file("7")).await;
        let revoke = service.revoke_relation(&tricky, "reader", &file("7")).await;
        let check = service
            .check_permission(&user("1"), "read", &ObjectRef::new("file", "7#x"))
            .await;

        assert!(matches!(grant, Err(AuthzError::InvalidTuple(_))));
        assert!(matches!(revoke, Err(AuthzError::InvalidTuple(_))));
        assert!(matches!(check, Err(AuthzError::InvalidTuple(_))));
        assert_eq!(service.backend().queue().stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn colliding_subject_never_reads_another_subjects_decision() {
        let service = service();
        // Written behind the service, so only the check boundary stands
        // between this row and the cache key of user:1 on file:7.
        service
            .backend()
            .tuples()
            .create(&RelationTuple::new(user("1:read:file"), "owner", file("7")))
            .await
            .unwrap();

        let colliding = service
            .check_permission(&user("1:read:file"), "read", &file("7"))
            .await;
        assert!(matches!(colliding, Err(AuthzError::InvalidTuple(_))));
        assert!(service.backend().cache().is_empty(), "nothing was cached");

        let honest = service
            .check_permission(&user("1"), "read", &file("7"))
            .await
            .unwrap();
        assert!(!honest);
    }

    #[tokio::test]
    async fn grant_unknown_relation_is_configuration_error() {
        let service = service();

        let result = service.grant_relation(&user("1"), "admin", &file("7")).await;

        assert!(result.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn duplicate_grant_is_idempotent() {
        let service = service();

        service
            .grant_relation(&user("1"), "owner", &file("7"))
            .await
            .unwrap();
        service
            .grant_relation(&user("1"), "owner", &file("7"))
            .await
            .unwrap();

        let tuples = service
            .backend()
            .tuples()
            .find_many(&Default::default(), Page::all())
            .await
            .unwrap();
        assert_eq!(tuples.len(), 1);
    }

    #[tokio::test]
    async fn revoke_of_missing_tuple_enqueues_nothing() {
        let service = service();

        service
            .revoke_relation(&user("1"), "owner", &file("7"))
            .await
            .unwrap();

        let stats = service.backend().queue().stats().await.unwrap();
        assert_eq!(stats.pending, 0);
    }

    // --- Index ---

    #[tokio::test]
    async fn grant_enqueues_job_that_builds_the_index() {
        let service = service();
        service
            .grant_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();

        let processed = drain(&service).await.unwrap();

        assert_eq!(processed, 1);
        assert!(
            service
                .backend()
                .index()
                .contains("owner", &file("7"), &user("42"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn revoke_removes_index_entry_once_processed() {
        let service = service();
        service
            .grant_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();
        drain(&service).await.unwrap();

        service
            .revoke_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();
        drain(&service).await.unwrap();

        assert!(service.backend().index().is_empty());
        assert!(
            !service
                .check_permission(&user("42"), "read", &file("7"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn checks_use_the_index_once_built() {
        let service = service();
        service
            .grant_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();
        drain(&service).await.unwrap();

        let engine = service.engine();
        let result = engine
            .check(&CheckRequest::new(user("42"), "delete", file("7")))
            .await
            .unwrap();

        assert!(result.allowed);
        assert_eq!(result.index_hits, 1);
        assert_eq!(result.live_lookups, 0);
    }

    #[tokio::test]
    async fn reconcile_repairs_lost_index_job() {
        let service = service();
        let tuple = RelationTuple::new(user("3"), "reader", file("9"));
        // Written straight to the store, as if the process died before enqueueing.
        service.backend().tuples().create(&tuple).await.unwrap();

        let report = service.reconcile(100).await.unwrap();
        drain(&service).await.unwrap();

        assert_eq!(report.grants_enqueued, 1);
        assert!(
            service
                .backend()
                .index()
                .get(&rebac_core::index::IndexKey::from(&tuple))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn processed_revoke_retires_allow_cached_from_the_old_index() {
        let service = service();
        service
            .grant_relation(&user("43"), "reader", &file("7"))
            .await
            .unwrap();
        drain(&service).await.unwrap();

        service
            .revoke_relation(&user("43"), "reader", &file("7"))
            .await
            .unwrap();
        // The revoke job is still queued, so the index answers for the
        // removed tuple and the allow is cached.
        assert!(
            service
                .check_permission(&user("43"), "read", &file("7"))
                .await
                .unwrap()
        );

        drain(&service).await.unwrap();

        assert!(
            !service
                .check_permission(&user("43"), "read", &file("7"))
                .await
                .unwrap()
        );
    }

    // --- Decision cache ---

    #[tokio::test]
    async fn repeated_check_is_served_from_cache() {
        let service = service();
        service
            .grant_relation(&user("42"), "owner", &file("7"))
            .await
            .unwrap();

        service
            .check_permission(&user("42"), "read", &file("7"))
            .await
            .unwrap();
        service
            .check_permission(&user("42"), "read", &file("7"))
            .await
            .unwrap();

        let metrics = service.metrics().snapshot();
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.cache_hits, 1);
    }

    #[tokio::test]
    async fn stale_allow_is_invalidated_by_revoke() {
        let service = service();
        let cache = DecisionCache::new(service.backend().cache(), Duration::from_secs(300));
        let key = DecisionKey::new(user("99"), "read", file("7"));

        // Force a wrong "allowed" into the cache.
        let slot = cache.slot(&key).await.unwrap();
        cache.set(&slot, true).await.unwrap();
        assert!(
            service
                .check_permission(&user("99"), "read", &file("7"))
                .await
                .unwrap()
        );

        service
            .grant_relation(&user("99"), "reader", &file("7"))
            .await
            .unwrap();
        service
            .revoke_relation(&user("99"), "reader", &file("7"))
            .await
            .unwrap();

        assert!(
            !service
                .check_permission(&user("99"), "read", &file("7"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn grant_invalidates_cached_denial() {
        let service = service();
        assert!(
            !service
                .check_permission(&user("5"), "read", &file("7"))
                .await
                .unwrap()
        );

        service
            .grant_relation(&user("5"), "reader", &file("7"))
            .await
            .unwrap();

        assert!(
            service
                .check_permission(&user("5"), "read", &file("7"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn cache_values_use_canonical_key_prefix() {
        let service = service();
        service
            .check_permission(&user("5"), "read", &file("7"))
            .await
            .unwrap();

        let value = service
            .backend()
            .cache()
            .get_key("decision:user:5:read:file:7:0:0")
            .await
            .unwrap();

        assert_eq!(value, Some("0".to_string()));
    }

    #[tokio::test]
    async fn disabled_cache_always_evaluates() {
        let service = AuthzService::new(
            InMemoryBackend::default(),
            EngineConfig::default(),
            PolicyLimits::default(),
        );
        service.load_policy(FILE_POLICY).unwrap();

        service
            .check_permission(&user("5"), "read", &file("7"))
            .await
            .unwrap();
        service
            .check_permission(&user("5"), "read", &file("7"))
            .await
            .unwrap();

        let metrics = service.metrics().snapshot();
        assert_eq!(metrics.cache_hits + metrics.cache_misses, 0);
        assert_eq!(metrics.checks_total, 2);
        assert!(service.backend().cache().is_empty());
    }

    // --- Normalizer ---

    #[tokio::test]
    async fn normalized_legacy_rows_are_visible_to_checks() {
        use rebac_storage::LegacyTupleStore;

        let service = service();
        service
            .backend()
            .tuples()
            .insert_legacy("user:42#owner", "file:7")
            .await
            .unwrap();

        let report = service.normalize_tuples(100).await.unwrap();

        assert_eq!(report.normalized, 1);
        assert!(
            service
                .check_permission(&user("42"), "delete", &file("7"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn normalization_retires_cached_denials_and_enqueues_index_jobs() {
        use rebac_storage::LegacyTupleStore;

        let service = service();
        assert!(
            !service
                .check_permission(&user("42"), "delete", &file("7"))
                .await
                .unwrap()
        );
        service
            .backend()
            .tuples()
            .insert_legacy("user:42#owner", "file:7")
            .await
            .unwrap();

        service.normalize_tuples(100).await.unwrap();

        assert!(
            service
                .check_permission(&user("42"), "delete", &file("7"))
                .await
                .unwrap()
        );
        assert_eq!(service.backend().queue().stats().await.unwrap().pending, 1);

        drain(&service).await.unwrap();
        assert!(
            service
                .backend()
                .index()
                .contains("owner", &file("7"), &user("42"))
                .await
                .unwrap()
        );
    }

    // --- OR semantics ---

    const RELATIONS: [&str; 3] = ["owner", "editor", "reader"];

    fn or_policy(terms: &[usize]) -> String {
        let rule = terms
            .iter()
            .map(|i| RELATIONS[*i])
            .collect::<Vec<_>>()
            .join(" + ");
        format!(
            "resource doc {{ relation owner: user relation editor: user relation reader: user \
             action act = {rule} }}"
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn decision_is_or_of_direct_terms(
            held in proptest::collection::vec(any::<bool>(), 3),
            terms in proptest::sample::subsequence(vec![0usize, 1, 2], 1..=3),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let allowed = runtime.block_on(async {
                let service = AuthzService::new(
                    InMemoryBackend::default(),
                    EngineConfig::default(),
                    PolicyLimits::default(),
                );
                service.load_policy(&or_policy(&terms)).unwrap();
                let doc = ObjectRef::new("doc", "1");
                for (i, relation) in RELATIONS.iter().enumerate() {
                    if held[i] {
                        service.grant_relation(&user("1"), relation, &doc).await.unwrap();
                    }
                }
                service.check_permission(&user("1"), "act", &doc).await.unwrap()
            });

            let expected = terms.iter().any(|i| held[*i]);
            prop_assert_eq!(allowed, expected);
        }
    }
}
