//! Registry of entity types, attributes and relationships.
//!
//! Kinds are plain descriptors looked up by their declared name. All three
//! kinds share one namespace so that [`TypeRegistry::resolve`] is unambiguous.

use indexmap::IndexMap;
use serde::{Serialize, Deserialize};

use crate::error::{RegistrationError, UnknownTypeError};
use crate::value::ValueType;

/// A named domain concept, e.g. `Person`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
}

/// A named, typed fact kind attached to one or more entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub entity_types: Vec<String>,
    pub value_type: ValueType,
}

impl AttributeDef {
    /// Whether this attribute may be stated about `entity_type`.
    pub fn applies_to(&self, entity_type: &str) -> bool {
        self.entity_types.iter().any(|e| e == entity_type)
    }
}

/// A named edge kind from a source entity type to a target entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String,
    pub source: String,
    pub target: String,
}

/// Result of resolving a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind<'a> {
    EntityType(&'a EntityTypeDef),
    Attribute(&'a AttributeDef),
    Relationship(&'a RelationshipDef),
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entity_types: IndexMap<String, EntityTypeDef>,
    attributes: IndexMap<String, AttributeDef>,
    relationships: IndexMap<String, RelationshipDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_taken(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
            || self.attributes.contains_key(name)
            || self.relationships.contains_key(name)
    }

    fn require_entity_type(&self, name: &str, referenced_by: &str) -> Result<(), RegistrationError> {
        if self.entity_types.contains_key(name) {
            Ok(())
        } else {
            Err(RegistrationError::UnknownEntityType {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
        }
    }

    pub fn register_entity_type(&mut self, name: impl Into<String>) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.is_taken(&name) {
            return Err(RegistrationError::DuplicateName(name));
        }
        self.entity_types.insert(name.clone(), EntityTypeDef { name });
        Ok(())
    }

    /// Register an attribute attached to the given entity types.
    ///
    /// Every entity type must already be registered.
    pub fn register_attribute<S: AsRef<str>>(
        &mut self,
        name: impl Into<String>,
        entity_types: &[S],
        value_type: ValueType,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.is_taken(&name) {
            return Err(RegistrationError::DuplicateName(name));
        }
        if entity_types.is_empty() {
            return Err(RegistrationError::NoEntityTypes(name));
        }

        let mut attached = Vec::with_capacity(entity_types.len());
        for entity_type in entity_types {
            let entity_type = entity_type.as_ref();
            self.require_entity_type(entity_type, &name)?;
            if !attached.iter().any(|e: &String| e == entity_type) {
                attached.push(entity_type.to_string());
            }
        }

        self.attributes.insert(
            name.clone(),
            AttributeDef {
                name,
                entity_types: attached,
                value_type,
            },
        );
        Ok(())
    }

    pub fn register_relationship(
        &mut self,
        name: impl Into<String>,
        source_type: &str,
        target_type: &str,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.is_taken(&name) {
            return Err(RegistrationError::DuplicateName(name));
        }
        self.require_entity_type(source_type, &name)?;
        self.require_entity_type(target_type, &name)?;

        self.relationships.insert(
            name.clone(),
            RelationshipDef {
                name,
                source: source_type.to_string(),
                target: target_type.to_string(),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Kind<'_>, UnknownTypeError> {
        if let Some(def) = self.entity_types.get(name) {
            return Ok(Kind::EntityType(def));
        }
        if let Some(def) = self.attributes.get(name) {
            return Ok(Kind::Attribute(def));
        }
        if let Some(def) = self.relationships.get(name) {
            return Ok(Kind::Relationship(def));
        }
        Err(UnknownTypeError(name.to_string()))
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDef> {
        self.entity_types.get(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.get(name)
    }

    /// Check that `attribute` exists and is attached to `entity_type`.
    pub(crate) fn require_attribute_of(
        &self,
        entity_type: &str,
        attribute: &str,
        referenced_by: &str,
    ) -> Result<&AttributeDef, RegistrationError> {
        self.require_entity_type(entity_type, referenced_by)?;
        let def = self.attributes.get(attribute).ok_or_else(|| RegistrationError::UnknownAttribute {
            name: attribute.to_string(),
            referenced_by: referenced_by.to_string(),
        })?;
        if !def.applies_to(entity_type) {
            return Err(RegistrationError::AttributeNotApplicable {
                entity_type: entity_type.to_string(),
                attribute: attribute.to_string(),
            });
        }
        Ok(def)
    }

    pub(crate) fn require_relationship(
        &self,
        name: &str,
        referenced_by: &str,
    ) -> Result<&RelationshipDef, RegistrationError> {
        self.relationships.get(name).ok_or_else(|| RegistrationError::UnknownRelationship {
            name: name.to_string(),
            referenced_by: referenced_by.to_string(),
        })
    }

    pub fn entity_type_count(&self) -> usize {
        self.entity_types.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}
