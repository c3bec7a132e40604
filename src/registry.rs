//! The startup-time registration surface.
//!
//! Everything the engine knows about (types, message kinds, routes, rules) is
//! registered on a [`RegistryBuilder`] and frozen into a [`Registry`], which
//! is then shared read-only (usually behind an `Arc`) by the fact store and
//! sessions.
//!
//! # Example
//!
//! ```
//! use factflow::{DerivedRule, KeyPath, MessageKind, MessageRule, Registry, Route, Value, ValueType};
//!
//! let mut builder = Registry::builder();
//! builder
//!     .register_entity_type("Person")?
//!     .register_attribute("FirstName", &["Person"], ValueType::String)?
//!     .register_attribute("Shout", &["Person"], ValueType::String)?
//!     .register_message_kind(
//!         MessageKind::new("users").with_field("user_name", KeyPath::from_dotted("cdc.columns.name")),
//!     )?
//!     .register_route(Route::new("users", KeyPath::from_dotted("metadata.table"), "users"))?
//!     .register_message_rule(
//!         MessageRule::new("Person", "FirstName", |args: &[Value]| Ok(args[0].clone()))
//!             .input("user_name")
//!             .bind("users", KeyPath::from_dotted("cdc.columns.id")),
//!     )?
//!     .register_derived_rule(
//!         DerivedRule::new("Person", "Shout", |args: &[Value]| {
//!             Ok(Value::from(args[0].to_string().to_uppercase()))
//!         })
//!         .depends_on("Person", "FirstName"),
//!     )?;
//! let registry = builder.build();
//! assert_eq!(registry.rules().derived_rule_count(), 1);
//! # Ok::<(), factflow::RegistrationError>(())
//! ```

use indexmap::IndexMap;

use crate::error::RegistrationError;
use crate::extraction::{IdSource, MessageKind};
use crate::router::{Route, Router};
use crate::rules::{DerivedRule, MessageRule, RuleRegistry};
use crate::types::TypeRegistry;
use crate::value::ValueType;

/// Immutable collection of every registered definition.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: TypeRegistry,
    message_kinds: IndexMap<String, MessageKind>,
    router: Router,
    rules: RuleRegistry,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn message_kind(&self, name: &str) -> Option<&MessageKind> {
        self.message_kinds.get(name)
    }

    pub fn message_kinds(&self) -> impl Iterator<Item = &MessageKind> {
        self.message_kinds.values()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }
}

/// Collects registrations and validates each one as it is added.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_entity_type(&mut self, name: impl Into<String>) -> Result<&mut Self, RegistrationError> {
        self.registry.types.register_entity_type(name)?;
        Ok(self)
    }

    pub fn register_attribute<S: AsRef<str>>(
        &mut self,
        name: impl Into<String>,
        entity_types: &[S],
        value_type: ValueType,
    ) -> Result<&mut Self, RegistrationError> {
        self.registry.types.register_attribute(name, entity_types, value_type)?;
        Ok(self)
    }

    pub fn register_relationship(
        &mut self,
        name: impl Into<String>,
        source_type: &str,
        target_type: &str,
    ) -> Result<&mut Self, RegistrationError> {
        self.registry.types.register_relationship(name, source_type, target_type)?;
        Ok(self)
    }

    /// Register a message kind.
    ///
    /// Its relationship mappings must name registered relationships whose
    /// endpoint types match, and field-based ids must name declared fields.
    pub fn register_message_kind(&mut self, kind: MessageKind) -> Result<&mut Self, RegistrationError> {
        if self.registry.message_kinds.contains_key(&kind.name) {
            return Err(RegistrationError::DuplicateMessageKind(kind.name));
        }

        let types = &self.registry.types;
        for (name, mapping) in &kind.relationship_mapping {
            let def = types.require_relationship(name, &kind.name)?;
            let endpoints = [
                ("source", &mapping.source, &def.source),
                ("target", &mapping.target, &def.target),
            ];
            for (role, endpoint, declared) in endpoints {
                if types.entity_type(&endpoint.entity_type).is_none() {
                    return Err(RegistrationError::UnknownEntityType {
                        name: endpoint.entity_type.clone(),
                        referenced_by: format!("{}.{}", kind.name, name),
                    });
                }
                if &endpoint.entity_type != declared {
                    return Err(RegistrationError::EndpointMismatch {
                        relationship: name.clone(),
                        role,
                        expected: declared.clone(),
                        actual: endpoint.entity_type.clone(),
                    });
                }
                if let IdSource::Field(field) = &endpoint.id {
                    if !kind.has_field(field) {
                        return Err(RegistrationError::UnknownInputField {
                            message_kind: kind.name.clone(),
                            field: field.clone(),
                        });
                    }
                }
            }
        }

        self.registry.message_kinds.insert(kind.name.clone(), kind);
        Ok(self)
    }

    pub fn register_route(&mut self, route: Route) -> Result<&mut Self, RegistrationError> {
        if !self.registry.message_kinds.contains_key(&route.message_kind) {
            return Err(RegistrationError::UnknownMessageKind(route.message_kind));
        }
        self.registry.router.add_route(route);
        Ok(self)
    }

    pub fn register_message_rule(&mut self, rule: MessageRule) -> Result<&mut Self, RegistrationError> {
        let Registry {
            types,
            message_kinds,
            rules,
            ..
        } = &mut self.registry;
        rules.register_message_rule(types, message_kinds, rule)?;
        Ok(self)
    }

    pub fn register_derived_rule(&mut self, rule: DerivedRule) -> Result<&mut Self, RegistrationError> {
        let Registry { types, rules, .. } = &mut self.registry;
        rules.register_derived_rule(types, rule)?;
        Ok(self)
    }

    /// Freeze the registrations.
    pub fn build(self) -> Registry {
        let registry = self.registry;
        tracing::info!(
            entity_types = registry.types.entity_type_count(),
            attributes = registry.types.attribute_count(),
            relationships = registry.types.relationship_count(),
            message_kinds = registry.message_kinds.len(),
            routes = registry.router.routes().len(),
            message_rules = registry.rules.message_rule_count(),
            derived_rules = registry.rules.derived_rule_count(),
            max_chain_length = registry.rules.graph().max_chain_length(),
            "registry built"
        );
        registry
    }
}
