use rebac_core::index::IndexJob;
use rebac_core::tuple::RelationTuple;

pub fn audit_resource_registered(resource_type: &str, relations: usize, actions: usize) {
    tracing::info!(
        target: "audit",
        event = "resource_registered",
        resource_type = resource_type,
        relations = relations,
        actions = actions,
        "resource type registered"
    );
}

pub fn audit_relation_granted(tuple: &RelationTuple, created: bool) {
    tracing::info!(
        target: "audit",
        event = "relation_granted",
        subject = %tuple.subject,
        relation = %tuple.relation,
        object = %tuple.object,
        created = created,
        "relation granted"
    );
}

pub fn audit_relation_revoked(tuple: &RelationTuple, removed: bool) {
    tracing::info!(
        target: "audit",
        event = "relation_revoked",
        subject = %tuple.subject,
        relation = %tuple.relation,
        object = %tuple.object,
        removed = removed,
        "relation revoked"
    );
}

pub fn audit_job_dead_lettered(job: &IndexJob, attempts: u32, reason: &str) {
    tracing::error!(
        target: "audit",
        event = "index_job_dead_lettered",
        key = %job.key(),
        kind = ?job.kind,
        attempts = attempts,
        reason = reason,
        "index job dead-lettered"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebac_core::tuple::{ObjectRef, SubjectRef};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Debug)]
    struct CapturedEvent {
        target: String,
        level: tracing::Level,
        fields: Vec<(String, String)>,
    }

    struct TestLayer {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TestLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = Vec::new();
            let mut visitor = FieldVisitor(&mut fields);
            event.record(&mut visitor);

            self.events.lock().unwrap().push(CapturedEvent {
                target: event.metadata().target().to_string(),
                level: *event.metadata().level(),
                fields,
            });
        }
    }

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0
                .push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    fn with_test_subscriber<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = TestLayer {
            events: Arc::clone(&events),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        Arc::try_unwrap(events).unwrap().into_inner().unwrap()
    }

    fn has_field(event: &CapturedEvent, key: &str, value: &str) -> bool {
        event.fields.iter().any(|(k, v)| k == key && v == value)
    }

    fn tuple() -> RelationTuple {
        RelationTuple::new(
            SubjectRef::new("user", "42"),
            "owner",
            ObjectRef::new("file", "7"),
        )
    }

    #[test]
    fn relation_granted_carries_tuple_parts() {
        let events = with_test_subscriber(|| audit_relation_granted(&tuple(), true));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "relation_granted"));
        assert!(has_field(&events[0], "subject", "user:42"));
        assert!(has_field(&events[0], "relation", "owner"));
        assert!(has_field(&events[0], "object", "file:7"));
        assert!(has_field(&events[0], "created", "true"));
    }

    #[test]
    fn relation_revoked_reports_whether_removed() {
        let events = with_test_subscriber(|| audit_relation_revoked(&tuple(), false));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "relation_revoked"));
        assert!(has_field(&events[0], "removed", "false"));
    }

    #[test]
    fn resource_registered_counts_relations_and_actions() {
        let events = with_test_subscriber(|| audit_resource_registered("file", 3, 2));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "resource_type", "file"));
        assert!(has_field(&events[0], "relations", "3"));
        assert!(has_field(&events[0], "actions", "2"));
    }

    #[test]
    fn dead_letter_is_logged_at_error() {
        let job = IndexJob::grant(&tuple());
        let events = with_test_subscriber(|| audit_job_dead_lettered(&job, 5, "store down"));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, tracing::Level::ERROR);
        assert!(has_field(&events[0], "key", "user:42#owner@file:7"));
        assert!(has_field(&events[0], "attempts", "5"));
        assert!(has_field(&events[0], "reason", "store down"));
    }

    #[test]
    fn audit_events_use_target_audit() {
        let job = IndexJob::revoke(&tuple());
        let events = with_test_subscriber(|| {
            audit_resource_registered("file", 1, 1);
            audit_relation_granted(&tuple(), true);
            audit_relation_revoked(&tuple(), true);
            audit_job_dead_lettered(&job, 1, "boom");
        });

        assert_eq!(events.len(), 4);
        for event in &events {
            assert_eq!(
                event.target, "audit",
                "event target should be 'audit', got '{}'",
                event.target
            );
        }
    }
}
