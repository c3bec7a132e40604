//! YAML schema configuration.
//!
//! A schema file declares everything a [`RegistryBuilder`] would otherwise be
//! told in code. Compute functions are referenced by name and resolved
//! against a [`TransformRegistry`].
//!
//! ```yaml
//! entity_types: [Person, State]
//! attributes:
//!   - name: FirstName
//!     entity_types: [Person]
//!     value_type: string
//! relationships:
//!   - name: LivesIn
//!     source: Person
//!     target: State
//! message_kinds:
//!   - name: users
//!     argument_mapping:
//!       user_id: [cdc, columns, id]
//!       user_name: cdc.columns.name
//!     relationship_mapping:
//!       LivesIn:
//!         source: {entity_type: Person, field: user_id}
//!         target: {entity_type: State, id_keypath: [cdc, columns, state]}
//! routes:
//!   - message_kind: users
//!     key_path: [metadata, table]
//!     equals: users
//! rules:
//!   message:
//!     - target: Person.FirstName
//!       transform: first_token
//!       inputs: [user_name]
//!       bindings:
//!         users: [cdc, columns, id]
//!   derived:
//!     - target: Person.UpperFirstName
//!       transform: uppercase
//!       dependencies: [Person.FirstName]
//! store:
//!   policy: append_all
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::extraction::{KeyPath, MessageKind};
use crate::registry::{Registry, RegistryBuilder};
use crate::router::Route;
use crate::rules::{AttributeKey, DerivedRule, MessageRule, RuleFn};
use crate::session::Session;
use crate::store::StorePolicy;
use crate::transform_registry::TransformRegistry;
use crate::value::ValueType;

/// Top-level schema file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub message_kinds: Vec<MessageKind>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeConfig {
    pub name: String,
    pub entity_types: Vec<String>,
    #[serde(default = "default_value_type")]
    pub value_type: ValueType,
}

fn default_value_type() -> ValueType {
    ValueType::Any
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub message: Vec<MessageRuleConfig>,
    #[serde(default)]
    pub derived: Vec<DerivedRuleConfig>,
}

/// A message rule: `target` is `"Entity.Attribute"`, `bindings` maps each
/// message kind to the key path of the target entity's id.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageRuleConfig {
    pub target: String,
    pub transform: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub bindings: IndexMap<String, KeyPath>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DerivedRuleConfig {
    pub target: String,
    pub transform: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub policy: StorePolicy,
}

impl SchemaConfig {
    /// Load a schema from a YAML file.
    ///
    /// # Example
    /// ```ignore
    /// use factflow::{SchemaConfig, TransformRegistry};
    ///
    /// let config = SchemaConfig::load_from_file("config/examples/users.yaml")?;
    /// let session = config.into_session(&TransformRegistry::new())?;
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn policy(&self) -> StorePolicy {
        self.store.policy
    }

    /// Register every declaration, in dependency order: types, message kinds,
    /// routes, message rules, derived rules.
    ///
    /// # Errors
    ///
    /// Fails on the first malformed attribute key, unknown transform or
    /// rejected registration.
    pub fn build(&self, transforms: &TransformRegistry) -> Result<Registry, ConfigError> {
        let mut builder = RegistryBuilder::new();

        for name in &self.entity_types {
            builder.register_entity_type(name.as_str())?;
        }
        for attr in &self.attributes {
            builder.register_attribute(attr.name.as_str(), attr.entity_types.as_slice(), attr.value_type)?;
        }
        for rel in &self.relationships {
            builder.register_relationship(rel.name.as_str(), &rel.source, &rel.target)?;
        }
        for kind in &self.message_kinds {
            builder.register_message_kind(kind.clone())?;
        }
        for route in &self.routes {
            builder.register_route(route.clone())?;
        }

        for rule in &self.rules.message {
            let target = parse_attribute_key(&rule.target)?;
            let mut message_rule =
                MessageRule::with_fn(target.entity_type, target.attribute, lookup(transforms, &rule.transform)?)
                    .inputs(rule.inputs.iter().cloned());
            for (kind, id_keypath) in &rule.bindings {
                message_rule = message_rule.bind(kind.as_str(), id_keypath.clone());
            }
            builder.register_message_rule(message_rule)?;
        }

        for rule in &self.rules.derived {
            let target = parse_attribute_key(&rule.target)?;
            let mut derived_rule =
                DerivedRule::with_fn(target.entity_type, target.attribute, lookup(transforms, &rule.transform)?);
            for dep in &rule.dependencies {
                let dep = parse_attribute_key(dep)?;
                derived_rule = derived_rule.depends_on(dep.entity_type, dep.attribute);
            }
            builder.register_derived_rule(derived_rule)?;
        }

        Ok(builder.build())
    }

    /// Build the registry and wrap it in a session using the configured
    /// store policy.
    pub fn into_session(self, transforms: &TransformRegistry) -> Result<Session, ConfigError> {
        let registry = self.build(transforms)?;
        Ok(Session::with_policy(Arc::new(registry), self.policy()))
    }
}

fn lookup(transforms: &TransformRegistry, name: &str) -> Result<Arc<dyn RuleFn>, ConfigError> {
    transforms
        .get(name)
        .ok_or_else(|| ConfigError::UnknownTransform(name.to_string()))
}

/// Parse `"Entity.Attribute"`.
fn parse_attribute_key(key: &str) -> Result<AttributeKey, ConfigError> {
    match key.split_once('.') {
        Some((entity_type, attribute))
            if !entity_type.is_empty() && !attribute.is_empty() && !attribute.contains('.') =>
        {
            Ok(AttributeKey::new(entity_type, attribute))
        }
        _ => Err(ConfigError::InvalidAttributeKey(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistrationError;

    const MINIMAL: &str = r#"
entity_types: [Person]
attributes:
  - name: FirstName
    entity_types: [Person]
    value_type: string
  - name: UpperFirstName
    entity_types: [Person]
message_kinds:
  - name: users
    argument_mapping:
      user_name: cdc.columns.name
routes:
  - message_kind: users
    key_path: metadata.table
    equals: users
rules:
  message:
    - target: Person.FirstName
      transform: first_token
      inputs: [user_name]
      bindings:
        users: [cdc, columns, id]
  derived:
    - target: Person.UpperFirstName
      transform: uppercase
      dependencies: [Person.FirstName]
"#;

    #[test]
    fn test_parse_minimal_schema() {
        let config = SchemaConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.entity_types, vec!["Person"]);
        assert_eq!(config.attributes[1].value_type, ValueType::Any);
        assert_eq!(config.policy(), StorePolicy::AppendAll);
        assert_eq!(config.rules.message[0].bindings["users"], KeyPath::from_dotted("cdc.columns.id"));
    }

    #[test]
    fn test_build_registry() {
        let config = SchemaConfig::from_yaml_str(MINIMAL).unwrap();
        let registry = config.build(&TransformRegistry::new()).unwrap();
        assert_eq!(registry.rules().message_rule_count(), 1);
        assert_eq!(registry.rules().derived_rule_count(), 1);
        assert_eq!(registry.rules().graph().max_chain_length(), 1);
    }

    #[test]
    fn test_unknown_transform() {
        let config = SchemaConfig::from_yaml_str(MINIMAL).unwrap();
        let err = config.build(&TransformRegistry::empty()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransform(ref name) if name == "first_token"));
    }

    #[test]
    fn test_invalid_attribute_key() {
        for key in ["FirstName", "Person.", ".FirstName", "a.b.c"] {
            assert!(matches!(
                parse_attribute_key(key),
                Err(ConfigError::InvalidAttributeKey(_))
            ));
        }
        assert_eq!(
            parse_attribute_key("Person.FirstName").unwrap(),
            AttributeKey::new("Person", "FirstName")
        );
    }

    #[test]
    fn test_registration_errors_surface() {
        let yaml = MINIMAL.replace("dependencies: [Person.FirstName]", "dependencies: [Person.UpperFirstName]");
        let config = SchemaConfig::from_yaml_str(&yaml).unwrap();
        let err = config.build(&TransformRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Registration(RegistrationError::Cycle(_))));
    }

    #[test]
    fn test_store_policy_section() {
        let yaml = format!("{}\nstore:\n  policy: dedup_by_identity\n", MINIMAL);
        let config = SchemaConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.policy(), StorePolicy::DedupByIdentity);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            SchemaConfig::from_yaml_str("entity_types: {"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
