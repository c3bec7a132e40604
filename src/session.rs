//! Message ingestion.
//!
//! A [`Session`] turns one raw CDC message into facts:
//!
//! 1. classify it with the router,
//! 2. extract every field of the routed message kind,
//! 3. run each message rule bound to the kind and store its fact (which may
//!    cascade through derived rules),
//! 4. store one relationship fact per relationship mapping.
//!
//! Routing and argument-mapping extraction happen before anything is stored,
//! so a message that fails there leaves the store untouched. Rule entity ids
//! and relationship endpoint ids are resolved as each fact is built, so a
//! failure there (or any later one) stops the message but keeps whatever was
//! already stored.
//!
//! # Example
//! ```ignore
//! let session = Session::new(Arc::new(registry));
//! let report = session.ingest(&json!({
//!     "cdc": {"columns": {"id": 4, "name": "Bob Smith", "state": "FL"}},
//!     "metadata": {"table": "users"}
//! }))?;
//! assert_eq!(report.relationship_facts.len(), 1);
//! ```

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{IngestError, IngestFailure, IngestStep, RouteError};
use crate::extraction::{ExtractedFields, KeyPath, MessageKind, RelationshipMapping};
use crate::fact::{AttributeFact, Fact, FactId, FactOrigin, RelationshipFact};
use crate::registry::Registry;
use crate::rules::{AttributeKey, MessageRule};
use crate::store::{FactBackend, FactStore, MemoryBackend, PutReport, StorePolicy};

/// What one successful [`Session::ingest`] stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub message_kind: String,
    /// Facts computed by message rules, in rule registration order.
    pub attribute_facts: Vec<FactId>,
    /// Facts computed by derived rules during the cascades.
    pub derived_facts: Vec<FactId>,
    pub relationship_facts: Vec<FactId>,
    /// Derived rules that were skipped for a missing dependency.
    pub deferred: Vec<AttributeKey>,
    pub deduplicated: usize,
    /// Deepest cascade level reached by any put of this message.
    pub max_depth: usize,
}

impl IngestReport {
    pub fn total_facts(&self) -> usize {
        self.attribute_facts.len() + self.derived_facts.len() + self.relationship_facts.len()
    }
}

/// Ingests messages into a fact store. Safe to share between threads.
pub struct Session<B: FactBackend = MemoryBackend> {
    store: FactStore<B>,
}

impl Session<MemoryBackend> {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_store(FactStore::new(registry))
    }

    pub fn with_policy(registry: Arc<Registry>, policy: StorePolicy) -> Self {
        Self::with_store(FactStore::new(registry).with_policy(policy))
    }
}

impl<B: FactBackend> Session<B> {
    pub fn with_store(store: FactStore<B>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FactStore<B> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        self.store.registry()
    }

    /// Ingest one message.
    ///
    /// # Errors
    ///
    /// Returns an [`IngestError`] naming the failed step. Facts stored before
    /// that step are kept and counted in `facts_retained`.
    pub fn ingest(&self, message: &JsonValue) -> Result<IngestReport, IngestError> {
        let registry = self.store.registry();

        let kind_name = registry
            .router()
            .classify(message)
            .map_err(|e| IngestError {
                message_kind: None,
                step: IngestStep::Route,
                facts_retained: 0,
                source: e.into(),
            })?;
        // classify only returns names of registered kinds
        let kind = registry.message_kind(kind_name).ok_or_else(|| IngestError {
            message_kind: Some(kind_name.to_string()),
            step: IngestStep::Route,
            facts_retained: 0,
            source: RouteError::Unroutable.into(),
        })?;

        let fields = kind.extract(message).map_err(|e| IngestError {
            message_kind: Some(kind.name.clone()),
            step: IngestStep::Extract,
            facts_retained: 0,
            source: e.into(),
        })?;

        let mut puts = PutReport::default();
        let mut relationship_facts = Vec::new();
        let fail = |step: IngestStep, retained: usize, source: IngestFailure| IngestError {
            message_kind: Some(kind.name.clone()),
            step,
            facts_retained: retained,
            source,
        };

        for rule in registry.rules().message_rules_for(&kind.name) {
            let Some(id_path) = rule.id_keypath(&kind.name) else {
                continue;
            };
            self.apply_message_rule(kind, rule, id_path, message, &fields, &mut puts)
                .map_err(|e| fail(IngestStep::Rule(rule.target().to_string()), puts.appended(), e))?;
        }

        for (name, mapping) in &kind.relationship_mapping {
            let retained = puts.appended() + relationship_facts.len();
            let fact = self
                .relationship_fact(kind, name, mapping, message, &fields)
                .map_err(|e| fail(IngestStep::Relationship(name.clone()), retained, e))?;
            let id = fact.id();
            self.store
                .put_into(fact.into(), &mut PutReport::default())
                .map_err(|e| fail(IngestStep::Relationship(name.clone()), retained, e.into()))?;
            relationship_facts.push(id);
        }

        let report = IngestReport {
            message_kind: kind.name.clone(),
            attribute_facts: puts.stored,
            derived_facts: puts.derived,
            relationship_facts,
            deferred: puts.deferred,
            deduplicated: puts.deduplicated,
            max_depth: puts.max_depth,
        };
        tracing::info!(
            message_kind = %report.message_kind,
            attribute_facts = report.attribute_facts.len(),
            derived_facts = report.derived_facts.len(),
            relationship_facts = report.relationship_facts.len(),
            deferred = report.deferred.len(),
            "ingested message"
        );
        Ok(report)
    }

    fn apply_message_rule(
        &self,
        kind: &MessageKind,
        rule: &MessageRule,
        id_path: &KeyPath,
        message: &JsonValue,
        fields: &ExtractedFields,
        puts: &mut PutReport,
    ) -> Result<(), IngestFailure> {
        let target = rule.target();
        let args = fields.select(rule.input_fields())?;
        let entity_id = id_path.extract_entity_id(message)?;

        let value = rule.compute(&args)?;
        let fact = AttributeFact::new(
            self.store.registry().types(),
            &target.entity_type,
            entity_id,
            &target.attribute,
            value,
        )?
        .with_origin(FactOrigin::Message {
            message_kind: kind.name.clone(),
            rule: target.to_string(),
        });
        self.store.put_into(Fact::Attribute(fact), puts)?;
        Ok(())
    }

    fn relationship_fact(
        &self,
        kind: &MessageKind,
        name: &str,
        mapping: &RelationshipMapping,
        message: &JsonValue,
        fields: &ExtractedFields,
    ) -> Result<RelationshipFact, IngestFailure> {
        let source_id = kind.resolve_id(&mapping.source.id, message, fields)?;
        let target_id = kind.resolve_id(&mapping.target.id, message, fields)?;
        let fact = RelationshipFact::new(
            self.store.registry().types(),
            name,
            &mapping.source.entity_type,
            source_id,
            &mapping.target.entity_type,
            target_id,
        )?
        .with_origin(FactOrigin::Relationship {
            message_kind: kind.name.clone(),
        });
        Ok(fact)
    }
}
