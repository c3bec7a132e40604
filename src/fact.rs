//! Facts: the immutable, timestamped units stored in the fact store.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::TypeRegistry;
use crate::value::Value;

/// Unique identifier for a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of one instance of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build an id from an extracted value. Only strings and integers are
    /// stable identifiers.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(Self(s.clone())),
            Value::String(_) => Err("empty string".to_string()),
            Value::Int(i) => Ok(Self(i.to_string())),
            other => Err(format!("{} is not a valid identifier type", other.type_name())),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for EntityId {
    fn from(i: i64) -> Self {
        Self(i.to_string())
    }
}

/// Deterministic SHA-256 digest of a fact's logical content, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityHash(String);

impl IdentityHash {
    /// Hash the declared entity type name, entity id, attribute name and value.
    ///
    /// Each component is length-prefixed so that adjacent components cannot
    /// run into each other.
    pub fn compute(entity_type: &str, entity_id: &EntityId, attribute: &str, value: &Value) -> Self {
        let mut hasher = Sha256::new();
        for part in [entity_type, entity_id.as_str(), attribute, value.canonical().as_str()] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let result = hasher.finalize();
        Self(format!("{:x}", result))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a fact came from, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactOrigin {
    /// Put directly by a caller.
    Direct,
    /// Computed by a message-sourced rule.
    Message { message_kind: String, rule: String },
    /// Built from a relationship mapping of a message kind.
    Relationship { message_kind: String },
    /// Computed by a derived rule after `trigger` was stored.
    Cascade { rule: String, trigger: FactId },
}

/// A statement that an entity has an attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFact {
    id: FactId,
    entity_type: String,
    entity_id: EntityId,
    attribute: String,
    value: Value,
    created_at: DateTime<Utc>,
    identity_hash: IdentityHash,
    origin: FactOrigin,
}

impl AttributeFact {
    /// Build a validated attribute fact.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the entity type or attribute is not
    /// registered, the attribute is not attached to the entity type, or the
    /// value does not satisfy the attribute's declared type.
    pub fn new(
        types: &TypeRegistry,
        entity_type: &str,
        entity_id: EntityId,
        attribute: &str,
        value: Value,
    ) -> Result<Self, ValidationError> {
        if types.entity_type(entity_type).is_none() {
            return Err(ValidationError::UnknownEntityType(entity_type.to_string()));
        }
        let def = types
            .attribute(attribute)
            .ok_or_else(|| ValidationError::UnknownAttribute(attribute.to_string()))?;
        if !def.applies_to(entity_type) {
            return Err(ValidationError::AttributeNotApplicable {
                entity_type: entity_type.to_string(),
                attribute: attribute.to_string(),
            });
        }
        if !def.value_type.accepts(&value) {
            return Err(ValidationError::TypeMismatch {
                attribute: attribute.to_string(),
                expected: def.value_type.to_string(),
                actual: value.type_name().to_string(),
            });
        }

        let identity_hash = IdentityHash::compute(entity_type, &entity_id, attribute, &value);
        Ok(Self {
            id: FactId::new(),
            entity_type: entity_type.to_string(),
            entity_id,
            attribute: attribute.to_string(),
            value,
            created_at: Utc::now(),
            identity_hash,
            origin: FactOrigin::Direct,
        })
    }

    pub fn with_origin(mut self, origin: FactOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn id(&self) -> FactId {
        self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn identity_hash(&self) -> &IdentityHash {
        &self.identity_hash
    }

    pub fn origin(&self) -> &FactOrigin {
        &self.origin
    }
}

impl fmt::Display for AttributeFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]({}) = {}",
            self.entity_type, self.attribute, self.entity_id, self.value
        )
    }
}

/// A statement that a relationship holds between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipFact {
    id: FactId,
    relationship: String,
    source_entity_type: String,
    source_entity_id: EntityId,
    target_entity_type: String,
    target_entity_id: EntityId,
    created_at: DateTime<Utc>,
    origin: FactOrigin,
}

impl RelationshipFact {
    /// Build a validated relationship fact.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if either entity type or the relationship
    /// is unknown, or the relationship's declared endpoints differ from the
    /// given entity types.
    pub fn new(
        types: &TypeRegistry,
        relationship: &str,
        source_entity_type: &str,
        source_entity_id: EntityId,
        target_entity_type: &str,
        target_entity_id: EntityId,
    ) -> Result<Self, ValidationError> {
        for entity_type in [source_entity_type, target_entity_type] {
            if types.entity_type(entity_type).is_none() {
                return Err(ValidationError::UnknownEntityType(entity_type.to_string()));
            }
        }
        let def = types
            .relationship(relationship)
            .ok_or_else(|| ValidationError::UnknownRelationship(relationship.to_string()))?;
        if def.source != source_entity_type || def.target != target_entity_type {
            return Err(ValidationError::EndpointMismatch {
                relationship: relationship.to_string(),
                expected_source: def.source.clone(),
                expected_target: def.target.clone(),
                actual_source: source_entity_type.to_string(),
                actual_target: target_entity_type.to_string(),
            });
        }

        Ok(Self {
            id: FactId::new(),
            relationship: relationship.to_string(),
            source_entity_type: source_entity_type.to_string(),
            source_entity_id,
            target_entity_type: target_entity_type.to_string(),
            target_entity_id,
            created_at: Utc::now(),
            origin: FactOrigin::Direct,
        })
    }

    pub fn with_origin(mut self, origin: FactOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn id(&self) -> FactId {
        self.id
    }

    pub fn relationship(&self) -> &str {
        &self.relationship
    }

    pub fn source_entity_type(&self) -> &str {
        &self.source_entity_type
    }

    pub fn source_entity_id(&self) -> &EntityId {
        &self.source_entity_id
    }

    pub fn target_entity_type(&self) -> &str {
        &self.target_entity_type
    }

    pub fn target_entity_id(&self) -> &EntityId {
        &self.target_entity_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> &FactOrigin {
        &self.origin
    }
}

impl fmt::Display for RelationshipFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) -{}-> {}({})",
            self.source_entity_type,
            self.source_entity_id,
            self.relationship,
            self.target_entity_type,
            self.target_entity_id
        )
    }
}

/// Any fact the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum Fact {
    Attribute(AttributeFact),
    Relationship(RelationshipFact),
}

impl Fact {
    pub fn id(&self) -> FactId {
        match self {
            Fact::Attribute(f) => f.id(),
            Fact::Relationship(f) => f.id(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Fact::Attribute(f) => f.created_at(),
            Fact::Relationship(f) => f.created_at(),
        }
    }

    pub fn origin(&self) -> &FactOrigin {
        match self {
            Fact::Attribute(f) => f.origin(),
            Fact::Relationship(f) => f.origin(),
        }
    }

    pub fn as_attribute(&self) -> Option<&AttributeFact> {
        match self {
            Fact::Attribute(f) => Some(f),
            Fact::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipFact> {
        match self {
            Fact::Relationship(f) => Some(f),
            Fact::Attribute(_) => None,
        }
    }
}

impl From<AttributeFact> for Fact {
    fn from(fact: AttributeFact) -> Self {
        Fact::Attribute(fact)
    }
}

impl From<RelationshipFact> for Fact {
    fn from(fact: RelationshipFact) -> Self {
        Fact::Relationship(fact)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Attribute(fact) => write!(f, "AttributeFact: {}", fact),
            Fact::Relationship(fact) => write!(f, "RelationshipFact: {}", fact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types.register_entity_type("Person").unwrap();
        types.register_entity_type("State").unwrap();
        types.register_attribute("FirstName", &["Person"], ValueType::String).unwrap();
        types.register_attribute("LastName", &["Person"], ValueType::String).unwrap();
        types.register_attribute("UserID", &["Person"], ValueType::Int).unwrap();
        types.register_relationship("LivesIn", "Person", "State").unwrap();
        types
    }

    #[test]
    fn test_attribute_fact_creation() {
        let types = types();
        let fact = AttributeFact::new(&types, "Person", EntityId::from(4), "FirstName", Value::from("Bob")).unwrap();
        assert_eq!(fact.entity_type(), "Person");
        assert_eq!(fact.entity_id().as_str(), "4");
        assert_eq!(fact.value(), &Value::from("Bob"));
        assert_eq!(fact.origin(), &FactOrigin::Direct);
        assert_eq!(fact.to_string(), "Person[FirstName](4) = Bob");
    }

    #[test]
    fn test_attribute_fact_validation() {
        let types = types();
        assert_eq!(
            AttributeFact::new(&types, "Planet", EntityId::from(1), "FirstName", Value::from("x")).unwrap_err(),
            ValidationError::UnknownEntityType("Planet".to_string())
        );
        assert_eq!(
            AttributeFact::new(&types, "State", EntityId::from("FL"), "FirstName", Value::from("x")).unwrap_err(),
            ValidationError::AttributeNotApplicable {
                entity_type: "State".to_string(),
                attribute: "FirstName".to_string(),
            }
        );
        let err = AttributeFact::new(&types, "Person", EntityId::from(4), "UserID", Value::from("4")).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { ref expected, ref actual, .. }
            if expected == "int" && actual == "string"));
    }

    #[test]
    fn test_identity_hash_uses_declared_names() {
        let types = types();
        let a = AttributeFact::new(&types, "Person", EntityId::from(4), "FirstName", Value::from("Bob")).unwrap();
        let b = AttributeFact::new(&types, "Person", EntityId::from(4), "FirstName", Value::from("Bob")).unwrap();
        let other_attr = AttributeFact::new(&types, "Person", EntityId::from(4), "LastName", Value::from("Bob")).unwrap();
        let other_id = AttributeFact::new(&types, "Person", EntityId::from(5), "FirstName", Value::from("Bob")).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.identity_hash(), b.identity_hash());
        assert_ne!(a.identity_hash(), other_attr.identity_hash());
        assert_ne!(a.identity_hash(), other_id.identity_hash());
        assert_eq!(a.identity_hash().as_str().len(), 64);
    }

    #[test]
    fn test_identity_hash_components_do_not_run_together() {
        let left = IdentityHash::compute("ab", &EntityId::from("c"), "d", &Value::Null);
        let right = IdentityHash::compute("a", &EntityId::from("bc"), "d", &Value::Null);
        assert_ne!(left, right);
    }

    #[test]
    fn test_relationship_fact_validation() {
        let types = types();
        let fact = RelationshipFact::new(&types, "LivesIn", "Person", EntityId::from(4), "State", EntityId::from("FL")).unwrap();
        assert_eq!(fact.to_string(), "Person(4) -LivesIn-> State(FL)");

        let err = RelationshipFact::new(&types, "LivesIn", "State", EntityId::from("FL"), "Person", EntityId::from(4)).unwrap_err();
        assert!(matches!(err, ValidationError::EndpointMismatch { .. }));

        assert_eq!(
            RelationshipFact::new(&types, "Owns", "Person", EntityId::from(4), "State", EntityId::from("FL")).unwrap_err(),
            ValidationError::UnknownRelationship("Owns".to_string())
        );
    }

    #[test]
    fn test_entity_id_from_value() {
        assert_eq!(EntityId::from_value(&Value::Int(4)), Ok(EntityId::from("4")));
        assert_eq!(EntityId::from_value(&Value::from("FL")), Ok(EntityId::from("FL")));
        assert!(EntityId::from_value(&Value::Null).is_err());
        assert!(EntityId::from_value(&Value::Float(1.5)).is_err());
        assert!(EntityId::from_value(&Value::from("")).is_err());
    }

    #[test]
    fn test_fact_serializes_with_tag() {
        let types = types();
        let fact: Fact = AttributeFact::new(&types, "Person", EntityId::from(4), "UserID", Value::Int(4))
            .unwrap()
            .into();
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["fact"], "attribute");
        assert_eq!(json["entity_id"], "4");
        assert_eq!(json["value"], 4);
        assert_eq!(json["origin"]["kind"], "direct");
    }
}
