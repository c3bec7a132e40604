//! The append-only fact store and its cascade engine.
//!
//! Storing an attribute fact re-evaluates every derived rule that consumes
//! its key, for the same entity id. Derived facts are stored the same way, so
//! a single put walks down the dependency graph until no consumer is left or
//! a consumer is still missing one of its dependencies.

pub mod backend;

use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::fact::{AttributeFact, EntityId, Fact, FactId, FactOrigin};
use crate::registry::Registry;
use crate::rules::AttributeKey;
use crate::serialization::{NdjsonWriter, SerializationError};
use crate::value::Value;

pub use backend::{FactBackend, MemoryBackend};

/// What to do with an attribute put whose identity hash matches the current
/// latest fact for the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePolicy {
    /// Append every put, keeping a full audit trail.
    #[default]
    AppendAll,
    /// Skip the put, and its cascade, when nothing changed.
    DedupByIdentity,
}

/// Outcome of one [`FactStore::put`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PutReport {
    /// Facts stored by the caller's put (zero or one).
    pub stored: Vec<FactId>,
    /// Facts stored by the cascade, in the order they were appended.
    pub derived: Vec<FactId>,
    /// Derived rules skipped because a dependency has no value yet.
    pub deferred: Vec<AttributeKey>,
    /// Puts skipped under [`StorePolicy::DedupByIdentity`].
    pub deduplicated: usize,
    /// Deepest cascade level reached; 0 when nothing was derived.
    pub max_depth: usize,
}

impl PutReport {
    /// Number of facts appended, including derived ones.
    pub fn appended(&self) -> usize {
        self.stored.len() + self.derived.len()
    }
}

/// Append-only store of facts with last-write-wins reads.
pub struct FactStore<B: FactBackend = MemoryBackend> {
    registry: Arc<Registry>,
    backend: B,
    policy: StorePolicy,
    // One entry per entity id ever written; grows with the log.
    entity_locks: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl FactStore<MemoryBackend> {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_backend(registry, MemoryBackend::new())
    }
}

impl<B: FactBackend> FactStore<B> {
    pub fn with_backend(registry: Arc<Registry>, backend: B) -> Self {
        Self {
            registry,
            backend,
            policy: StorePolicy::default(),
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: StorePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    /// Store a fact. Attribute facts trigger the cascade; relationship facts
    /// never do.
    ///
    /// # Errors
    ///
    /// A derived rule whose compute function fails, or whose result does not
    /// validate, aborts the cascade. Facts appended before the failure stay in
    /// the log.
    pub fn put(&self, fact: impl Into<Fact>) -> Result<PutReport, StoreError> {
        let mut report = PutReport::default();
        self.put_into(fact.into(), &mut report)?;
        Ok(report)
    }

    /// Like [`put`](Self::put), accumulating into `report` so that a caller
    /// still sees what was appended when the cascade fails part way.
    pub(crate) fn put_into(&self, fact: Fact, report: &mut PutReport) -> Result<(), StoreError> {
        match fact {
            Fact::Relationship(fact) => {
                tracing::debug!(fact = %fact, "storing relationship");
                report.stored.push(fact.id());
                self.backend.append(fact.into());
            }
            Fact::Attribute(fact) => {
                let lock = self.entity_lock(fact.entity_id());
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                self.put_attribute_locked(fact, 0, report)?;
            }
        }
        Ok(())
    }

    fn put_attribute_locked(
        &self,
        fact: AttributeFact,
        depth: usize,
        report: &mut PutReport,
    ) -> Result<(), StoreError> {
        let key = AttributeKey::new(fact.entity_type(), fact.attribute());

        if self.policy == StorePolicy::DedupByIdentity {
            let unchanged = self
                .backend
                .latest_attribute(&key, fact.entity_id())
                .is_some_and(|latest| latest.identity_hash() == fact.identity_hash());
            if unchanged {
                tracing::debug!(fact = %fact, "identical to latest, skipping");
                report.deduplicated += 1;
                return Ok(());
            }
        }

        let trigger = fact.id();
        let entity_id = fact.entity_id().clone();
        tracing::debug!(fact = %fact, depth, "storing attribute");
        if depth == 0 {
            report.stored.push(trigger);
        } else {
            report.derived.push(trigger);
            report.max_depth = report.max_depth.max(depth);
        }
        self.backend.append(fact.into());

        let registry = Arc::clone(&self.registry);
        for rule in registry.rules().consumers_of(&key) {
            let target = rule.target();
            let mut args = Vec::with_capacity(rule.dependencies().len());
            for dep in rule.dependencies() {
                match self.backend.latest_attribute(dep, &entity_id) {
                    Some(latest) => args.push(latest.value().clone()),
                    None => break,
                }
            }
            if args.len() < rule.dependencies().len() {
                tracing::debug!(rule = %target, entity_id = %entity_id, "dependency missing, deferring");
                report.deferred.push(target.clone());
                continue;
            }

            let value = rule.compute(&args).map_err(|source| StoreError::Compute {
                rule: target.to_string(),
                source,
            })?;
            let derived = AttributeFact::new(
                registry.types(),
                &target.entity_type,
                entity_id.clone(),
                &target.attribute,
                value,
            )?
            .with_origin(FactOrigin::Cascade {
                rule: target.to_string(),
                trigger,
            });
            self.put_attribute_locked(derived, depth + 1, report)?;
        }
        Ok(())
    }

    fn entity_lock(&self, entity_id: &EntityId) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(entity_id.clone()).or_default())
    }

    /// Latest value of `attribute` for the entity, if any.
    pub fn get_latest_attribute(&self, entity_type: &str, attribute: &str, entity_id: &EntityId) -> Option<Value> {
        self.latest_attribute_fact(entity_type, attribute, entity_id)
            .map(|fact| fact.value().clone())
    }

    pub fn latest_attribute_fact(&self, entity_type: &str, attribute: &str, entity_id: &EntityId) -> Option<AttributeFact> {
        self.backend
            .latest_attribute(&AttributeKey::new(entity_type, attribute), entity_id)
    }

    /// Every fact stored for the key, oldest first.
    pub fn attribute_history(&self, entity_type: &str, attribute: &str, entity_id: &EntityId) -> Vec<AttributeFact> {
        self.backend
            .attribute_history(&AttributeKey::new(entity_type, attribute), entity_id)
    }

    /// Snapshot of the log in insertion order.
    pub fn facts(&self) -> Vec<Fact> {
        self.backend.facts()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Write the log as NDJSON, one fact per line. Returns the number of facts
    /// written.
    pub fn export_ndjson<W: Write>(&self, writer: W) -> Result<usize, SerializationError> {
        let mut writer = NdjsonWriter::new(writer);
        writer.write_all(&self.facts())?;
        writer.flush()?;
        Ok(writer.written())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;
    use crate::fact::RelationshipFact;
    use crate::rules::DerivedRule;
    use crate::value::ValueType;

    fn upper(args: &[Value]) -> Result<Value, ComputeError> {
        let s = args[0].as_str().ok_or(ComputeError::InvalidArgument { index: 0, expected: "string" })?;
        Ok(Value::from(s.to_uppercase()))
    }

    /// Person with FirstName -> UpperFirstName -> Shout, and
    /// Greeting depending on both FirstName and Title.
    fn registry() -> Arc<Registry> {
        let mut builder = Registry::builder();
        builder
            .register_entity_type("Person")
            .unwrap()
            .register_entity_type("State")
            .unwrap()
            .register_relationship("LivesIn", "Person", "State")
            .unwrap();
        for attr in ["FirstName", "UpperFirstName", "Shout", "Title", "Greeting"] {
            builder.register_attribute(attr, &["Person"], ValueType::String).unwrap();
        }
        builder
            .register_derived_rule(DerivedRule::new("Person", "UpperFirstName", upper).depends_on("Person", "FirstName"))
            .unwrap()
            .register_derived_rule(
                DerivedRule::new("Person", "Shout", |args: &[Value]| Ok(Value::from(format!("{}!", args[0]))))
                    .depends_on("Person", "UpperFirstName"),
            )
            .unwrap()
            .register_derived_rule(
                DerivedRule::new("Person", "Greeting", |args: &[Value]| {
                    Ok(Value::from(format!("{} {}", args[0], args[1])))
                })
                .depends_on("Person", "Title")
                .depends_on("Person", "FirstName"),
            )
            .unwrap();
        Arc::new(builder.build())
    }

    fn first_name(store: &FactStore, id: i64, name: &str) -> AttributeFact {
        AttributeFact::new(store.registry().types(), "Person", EntityId::from(id), "FirstName", Value::from(name)).unwrap()
    }

    #[test]
    fn test_put_cascades_through_chain() {
        let store = FactStore::new(registry());
        let report = store.put(first_name(&store, 4, "Bob")).unwrap();

        let id = EntityId::from(4);
        assert_eq!(store.get_latest_attribute("Person", "UpperFirstName", &id), Some(Value::from("BOB")));
        assert_eq!(store.get_latest_attribute("Person", "Shout", &id), Some(Value::from("BOB!")));
        assert_eq!(report.stored.len(), 1);
        assert_eq!(report.derived.len(), 2);
        assert_eq!(report.max_depth, 2);
        assert!(report.max_depth <= store.registry().rules().graph().max_chain_length());
        assert_eq!(report.deferred, vec![AttributeKey::new("Person", "Greeting")]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_cascade_origin_points_at_trigger() {
        let store = FactStore::new(registry());
        let fact = first_name(&store, 4, "Bob");
        let trigger = fact.id();
        store.put(fact).unwrap();

        let upper = store
            .latest_attribute_fact("Person", "UpperFirstName", &EntityId::from(4))
            .unwrap();
        assert_eq!(
            upper.origin(),
            &FactOrigin::Cascade {
                rule: "Person.UpperFirstName".to_string(),
                trigger,
            }
        );
    }

    #[test]
    fn test_derived_waits_for_all_dependencies() {
        let store = FactStore::new(registry());
        let id = EntityId::from(7);
        store.put(first_name(&store, 7, "Ann")).unwrap();
        assert_eq!(store.get_latest_attribute("Person", "Greeting", &id), None);

        let title = AttributeFact::new(store.registry().types(), "Person", id.clone(), "Title", Value::from("Dr")).unwrap();
        let report = store.put(title).unwrap();
        assert_eq!(report.derived.len(), 1);
        assert!(report.deferred.is_empty());
        assert_eq!(store.get_latest_attribute("Person", "Greeting", &id), Some(Value::from("Dr Ann")));
    }

    #[test]
    fn test_last_write_wins_with_history() {
        let store = FactStore::new(registry());
        let id = EntityId::from(4);
        store.put(first_name(&store, 4, "Bob")).unwrap();
        store.put(first_name(&store, 4, "Rob")).unwrap();

        assert_eq!(store.get_latest_attribute("Person", "FirstName", &id), Some(Value::from("Rob")));
        assert_eq!(store.get_latest_attribute("Person", "UpperFirstName", &id), Some(Value::from("ROB")));
        let history = store.attribute_history("Person", "FirstName", &id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value(), &Value::from("Bob"));
    }

    #[test]
    fn test_entities_do_not_mix() {
        let store = FactStore::new(registry());
        store.put(first_name(&store, 1, "Ann")).unwrap();
        store.put(first_name(&store, 2, "Bob")).unwrap();
        assert_eq!(
            store.get_latest_attribute("Person", "UpperFirstName", &EntityId::from(1)),
            Some(Value::from("ANN"))
        );
        assert_eq!(
            store.get_latest_attribute("Person", "UpperFirstName", &EntityId::from(2)),
            Some(Value::from("BOB"))
        );
    }

    #[test]
    fn test_entity_locks_one_per_entity() {
        let store = FactStore::new(registry());
        store.put(first_name(&store, 1, "Ann")).unwrap();
        store.put(first_name(&store, 1, "Annie")).unwrap();
        store.put(first_name(&store, 2, "Bob")).unwrap();
        assert_eq!(store.entity_locks.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_append_all_logs_repeated_values() {
        let store = FactStore::new(registry());
        store.put(first_name(&store, 4, "Bob")).unwrap();
        store.put(first_name(&store, 4, "Bob")).unwrap();
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn test_dedup_by_identity_skips_unchanged() {
        let store = FactStore::new(registry()).with_policy(StorePolicy::DedupByIdentity);
        store.put(first_name(&store, 4, "Bob")).unwrap();
        let report = store.put(first_name(&store, 4, "Bob")).unwrap();

        assert_eq!(report.deduplicated, 1);
        assert!(report.stored.is_empty());
        assert!(report.derived.is_empty());
        assert_eq!(store.len(), 3);

        // a changed value runs the whole chain again
        let report = store.put(first_name(&store, 4, "Rob")).unwrap();
        assert_eq!(report.derived.len(), 2);
    }

    #[test]
    fn test_compute_failure_keeps_trigger() {
        let mut builder = Registry::builder();
        builder
            .register_entity_type("Person")
            .unwrap()
            .register_attribute("FirstName", &["Person"], ValueType::String)
            .unwrap()
            .register_attribute("Score", &["Person"], ValueType::Int)
            .unwrap()
            .register_derived_rule(
                DerivedRule::new("Person", "Score", |_: &[Value]| Err(ComputeError::Failed("no score".to_string())))
                    .depends_on("Person", "FirstName"),
            )
            .unwrap();
        let store = FactStore::new(Arc::new(builder.build()));

        let err = store.put(first_name(&store, 1, "Ann")).unwrap_err();
        assert!(matches!(err, StoreError::Compute { ref rule, .. } if rule == "Person.Score"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_derived_type_mismatch_is_validation_error() {
        let mut builder = Registry::builder();
        builder
            .register_entity_type("Person")
            .unwrap()
            .register_attribute("FirstName", &["Person"], ValueType::String)
            .unwrap()
            .register_attribute("Score", &["Person"], ValueType::Int)
            .unwrap()
            .register_derived_rule(DerivedRule::new("Person", "Score", upper).depends_on("Person", "FirstName"))
            .unwrap();
        let store = FactStore::new(Arc::new(builder.build()));

        let err = store.put(first_name(&store, 1, "Ann")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_relationship_put_does_not_cascade() {
        let store = FactStore::new(registry());
        let fact = RelationshipFact::new(
            store.registry().types(),
            "LivesIn",
            "Person",
            EntityId::from(4),
            "State",
            EntityId::from("FL"),
        )
        .unwrap();
        let report = store.put(fact).unwrap();
        assert_eq!(report.stored.len(), 1);
        assert!(report.derived.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_export_ndjson() {
        let store = FactStore::new(registry());
        store.put(first_name(&store, 4, "Bob")).unwrap();

        let mut buf = Vec::new();
        let written = store.export_ndjson(&mut buf).unwrap();
        assert_eq!(written, 3);

        let lines: Vec<serde_json::Value> = String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["attribute"], "FirstName");
        assert_eq!(lines[1]["origin"]["kind"], "cascade");
    }
}
