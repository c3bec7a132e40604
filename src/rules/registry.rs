//! Registry of message rules and derived rules.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::error::RegistrationError;
use crate::extraction::MessageKind;
use crate::rules::{AttributeKey, DependencyGraph, DerivedRule, MessageRule};
use crate::types::TypeRegistry;

/// Holds every rule and the dependency graph between derived attributes.
///
/// Populated through [`RegistryBuilder`](crate::RegistryBuilder), which
/// supplies the type registry and message kinds used for validation.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    message_rules: Vec<MessageRule>,
    by_message_kind: HashMap<String, Vec<usize>>,
    derived_rules: IndexMap<AttributeKey, DerivedRule>,
    graph: DependencyGraph,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message rule after checking its target, bindings and
    /// input fields.
    pub fn register_message_rule(
        &mut self,
        types: &TypeRegistry,
        message_kinds: &IndexMap<String, MessageKind>,
        rule: MessageRule,
    ) -> Result<(), RegistrationError> {
        let target = rule.target().clone();
        let rule_name = target.to_string();
        types.require_attribute_of(&target.entity_type, &target.attribute, &rule_name)?;

        if rule.bindings().is_empty() {
            return Err(RegistrationError::UnboundMessageRule(rule_name));
        }
        for kind_name in rule.bindings().keys() {
            let kind = message_kinds
                .get(kind_name)
                .ok_or_else(|| RegistrationError::UnknownMessageKind(kind_name.clone()))?;
            if let Some(missing) = rule.input_fields().iter().find(|f| !kind.has_field(f)) {
                return Err(RegistrationError::UnknownInputField {
                    message_kind: kind_name.clone(),
                    field: missing.clone(),
                });
            }
        }

        let index = self.message_rules.len();
        for kind_name in rule.bindings().keys() {
            self.by_message_kind.entry(kind_name.clone()).or_default().push(index);
        }
        self.message_rules.push(rule);
        Ok(())
    }

    /// Register a derived rule after checking its target and dependencies.
    ///
    /// # Errors
    ///
    /// * [`RegistrationError::DuplicateDerivedRule`] if the target already has
    ///   a derived rule
    /// * [`RegistrationError::Cycle`] if the rule's edges would close a cycle
    pub fn register_derived_rule(&mut self, types: &TypeRegistry, rule: DerivedRule) -> Result<(), RegistrationError> {
        let target = rule.target().clone();
        let rule_name = target.to_string();
        types.require_attribute_of(&target.entity_type, &target.attribute, &rule_name)?;

        if self.derived_rules.contains_key(&target) {
            return Err(RegistrationError::DuplicateDerivedRule(rule_name));
        }
        if rule.dependencies().is_empty() {
            return Err(RegistrationError::NoDependencies(rule_name));
        }
        for dep in rule.dependencies() {
            types.require_attribute_of(&dep.entity_type, &dep.attribute, &rule_name)?;
        }

        self.graph.add(&target, rule.dependencies())?;
        self.derived_rules.insert(target, rule);
        Ok(())
    }

    /// Message rules bound to `message_kind`, in registration order.
    pub fn message_rules_for<'a>(&'a self, message_kind: &str) -> impl Iterator<Item = &'a MessageRule> + 'a {
        self.by_message_kind
            .get(message_kind)
            .into_iter()
            .flatten()
            .map(move |&i| &self.message_rules[i])
    }

    /// Derived rules that must be re-evaluated when `key` is stored.
    pub fn consumers_of<'a>(&'a self, key: &AttributeKey) -> impl Iterator<Item = &'a DerivedRule> + 'a {
        self.graph
            .consumers_of(key)
            .iter()
            .filter_map(move |target| self.derived_rules.get(target))
    }

    pub fn derived_rule(&self, target: &AttributeKey) -> Option<&DerivedRule> {
        self.derived_rules.get(target)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn message_rule_count(&self) -> usize {
        self.message_rules.len()
    }

    pub fn derived_rule_count(&self) -> usize {
        self.derived_rules.len()
    }
}
