//! Computation rules and the dependency graph between derived attributes.
//!
//! - **Message rules** compute an attribute from fields of an incoming message.
//! - **Derived rules** compute an attribute from other stored attributes of the
//!   same entity id and are re-evaluated whenever a dependency is stored.

pub mod dependency_graph;
pub mod registry;

use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ComputeError;
use crate::extraction::KeyPath;
use crate::value::Value;

pub use dependency_graph::DependencyGraph;
pub use registry::RuleRegistry;

/// Identifies an attribute of an entity type, e.g. `Person.FirstName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeKey {
    pub entity_type: String,
    pub attribute: String,
}

impl AttributeKey {
    pub fn new(entity_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_type, self.attribute)
    }
}

/// A pure function from ordered argument values to a new value.
///
/// Message rules receive their input fields in declared order; derived rules
/// receive their dependency values in declared order.
pub trait RuleFn: Send + Sync {
    fn compute(&self, args: &[Value]) -> Result<Value, ComputeError>;
}

impl<F> RuleFn for F
where
    F: Fn(&[Value]) -> Result<Value, ComputeError> + Send + Sync,
{
    fn compute(&self, args: &[Value]) -> Result<Value, ComputeError> {
        self(args)
    }
}

/// Computes an attribute directly from fields of a message.
#[derive(Clone)]
pub struct MessageRule {
    target: AttributeKey,
    inputs: Vec<String>,
    bindings: IndexMap<String, KeyPath>,
    compute: Arc<dyn RuleFn>,
}

impl MessageRule {
    pub fn new<F>(entity_type: impl Into<String>, attribute: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        Self::with_fn(entity_type, attribute, Arc::new(compute))
    }

    /// Build a rule around a shared function, e.g. one from a
    /// [`TransformRegistry`](crate::TransformRegistry).
    pub fn with_fn(entity_type: impl Into<String>, attribute: impl Into<String>, compute: Arc<dyn RuleFn>) -> Self {
        Self {
            target: AttributeKey::new(entity_type, attribute),
            inputs: Vec::new(),
            bindings: IndexMap::new(),
            compute,
        }
    }

    /// Append an input field, passed to the compute function in order.
    pub fn input(mut self, field: impl Into<String>) -> Self {
        self.inputs.push(field.into());
        self
    }

    pub fn inputs<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Bind the rule to a message kind; `id_keypath` locates the target
    /// entity's id in messages of that kind.
    pub fn bind(mut self, message_kind: impl Into<String>, id_keypath: KeyPath) -> Self {
        self.bindings.insert(message_kind.into(), id_keypath);
        self
    }

    pub fn target(&self) -> &AttributeKey {
        &self.target
    }

    pub fn input_fields(&self) -> &[String] {
        &self.inputs
    }

    pub fn bindings(&self) -> &IndexMap<String, KeyPath> {
        &self.bindings
    }

    pub fn id_keypath(&self, message_kind: &str) -> Option<&KeyPath> {
        self.bindings.get(message_kind)
    }

    pub fn compute(&self, args: &[Value]) -> Result<Value, ComputeError> {
        self.compute.compute(args)
    }
}

impl fmt::Debug for MessageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRule")
            .field("target", &self.target)
            .field("inputs", &self.inputs)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

/// Computes an attribute from other attributes of the same entity id.
#[derive(Clone)]
pub struct DerivedRule {
    target: AttributeKey,
    dependencies: Vec<AttributeKey>,
    compute: Arc<dyn RuleFn>,
}

impl DerivedRule {
    pub fn new<F>(entity_type: impl Into<String>, attribute: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        Self::with_fn(entity_type, attribute, Arc::new(compute))
    }

    pub fn with_fn(entity_type: impl Into<String>, attribute: impl Into<String>, compute: Arc<dyn RuleFn>) -> Self {
        Self {
            target: AttributeKey::new(entity_type, attribute),
            dependencies: Vec::new(),
            compute,
        }
    }

    /// Append a dependency, passed to the compute function in order.
    pub fn depends_on(mut self, entity_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.dependencies.push(AttributeKey::new(entity_type, attribute));
        self
    }

    pub fn target(&self) -> &AttributeKey {
        &self.target
    }

    pub fn dependencies(&self) -> &[AttributeKey] {
        &self.dependencies
    }

    pub fn compute(&self, args: &[Value]) -> Result<Value, ComputeError> {
        self.compute.compute(args)
    }
}

impl fmt::Debug for DerivedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedRule")
            .field("target", &self.target)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
