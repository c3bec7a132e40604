//! Error types for registration, fact validation, extraction, routing,
//! storage and ingestion.
//!
//! Startup errors (`RegistrationError`, `CycleError`, `ConfigError`) are
//! configuration bugs and are expected to abort the process. Per-message
//! errors are collected into an [`IngestError`] at the `Session::ingest`
//! boundary.

use thiserror::Error;

/// Error raised while registering types, message kinds, routes or rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("name '{0}' is already registered")]
    DuplicateName(String),

    #[error("'{referenced_by}' references unknown entity type '{name}'")]
    UnknownEntityType { name: String, referenced_by: String },

    #[error("'{referenced_by}' references unknown attribute '{name}'")]
    UnknownAttribute { name: String, referenced_by: String },

    #[error("'{referenced_by}' references unknown relationship '{name}'")]
    UnknownRelationship { name: String, referenced_by: String },

    #[error("attribute '{attribute}' is not attached to entity type '{entity_type}'")]
    AttributeNotApplicable { entity_type: String, attribute: String },

    #[error("relationship '{relationship}' expects {expected} as {role}, mapping declares {actual}")]
    EndpointMismatch {
        relationship: String,
        role: &'static str,
        expected: String,
        actual: String,
    },

    #[error("attribute '{0}' must be attached to at least one entity type")]
    NoEntityTypes(String),

    #[error("unknown message kind '{0}'")]
    UnknownMessageKind(String),

    #[error("message kind '{message_kind}' has no field '{field}'")]
    UnknownInputField { message_kind: String, field: String },

    #[error("message kind '{0}' is already registered")]
    DuplicateMessageKind(String),

    #[error("message rule for '{0}' is not bound to any message kind")]
    UnboundMessageRule(String),

    #[error("a derived rule for '{0}' is already registered")]
    DuplicateDerivedRule(String),

    #[error("derived rule for '{0}' declares no dependencies")]
    NoDependencies(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Adding a derived rule would close a cycle in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circular dependency detected: {}", path.join(" -> "))]
pub struct CycleError {
    /// Attribute keys along the cycle, starting and ending at the same key.
    pub path: Vec<String>,
}

/// A name was resolved against the type registry and not found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown type '{0}'")]
pub struct UnknownTypeError(pub String);

/// A fact violated one of its construction invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("entity type '{0}' is not registered")]
    UnknownEntityType(String),

    #[error("attribute '{0}' is not registered")]
    UnknownAttribute(String),

    #[error("relationship '{0}' is not registered")]
    UnknownRelationship(String),

    #[error("attribute '{attribute}' does not apply to entity type '{entity_type}'")]
    AttributeNotApplicable { entity_type: String, attribute: String },

    #[error("attribute '{attribute}' expects {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error(
        "relationship '{relationship}' connects {expected_source} -> {expected_target}, \
         got {actual_source} -> {actual_target}"
    )]
    EndpointMismatch {
        relationship: String,
        expected_source: String,
        expected_target: String,
        actual_source: String,
        actual_target: String,
    },
}

/// A declared key path could not be resolved to a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("key '{segment}' of path '{path}' is missing")]
    MissingKey { path: String, segment: String },

    #[error("cannot descend into '{segment}' of path '{path}': not a {expected}")]
    NotAContainer {
        path: String,
        segment: String,
        expected: &'static str,
    },

    #[error("value at '{path}' is an object, expected a scalar or list")]
    NotScalar { path: String },

    #[error("integer at '{path}' does not fit in a 64-bit signed integer")]
    IntegerOutOfRange { path: String },

    #[error("field '{0}' is not declared in the argument mapping")]
    UnknownField(String),

    #[error("value at '{source_desc}' cannot be used as an entity id: {reason}")]
    InvalidEntityId { source_desc: String, reason: String },
}

/// A message matched zero or several routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("message matched no route")]
    Unroutable,

    #[error("message matched more than one route: {}", kinds.join(", "))]
    Ambiguous { kinds: Vec<String> },
}

/// A rule's compute function rejected its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument {index} must be {expected}")]
    InvalidArgument { index: usize, expected: &'static str },

    #[error("{0}")]
    Failed(String),
}

/// Failure while storing a fact or running its cascade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("derived rule '{rule}' failed: {source}")]
    Compute {
        rule: String,
        #[source]
        source: ComputeError,
    },
}

/// The step of an ingestion that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStep {
    Route,
    Extract,
    Rule(String),
    Relationship(String),
}

impl std::fmt::Display for IngestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestStep::Route => write!(f, "route"),
            IngestStep::Extract => write!(f, "extract"),
            IngestStep::Rule(rule) => write!(f, "rule {}", rule),
            IngestStep::Relationship(name) => write!(f, "relationship {}", name),
        }
    }
}

/// Underlying cause of an [`IngestError`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestFailure {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A message failed to ingest.
///
/// Facts stored before the failing step are kept; `facts_retained` says how
/// many.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "ingest failed at step '{step}' (message kind: {}, facts retained: {facts_retained}): {source}",
    message_kind.as_deref().unwrap_or("<unrouted>")
)]
pub struct IngestError {
    pub message_kind: Option<String>,
    pub step: IngestStep,
    pub facts_retained: usize,
    #[source]
    pub source: IngestFailure,
}

/// Failure while loading or building a schema configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid attribute key '{0}', expected 'EntityType.Attribute'")]
    InvalidAttributeKey(String),

    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = CycleError {
            path: vec!["A.x".to_string(), "B.y".to_string(), "A.x".to_string()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: A.x -> B.y -> A.x");
    }

    #[test]
    fn test_ingest_error_display_names_step_and_kind() {
        let err = IngestError {
            message_kind: Some("users".to_string()),
            step: IngestStep::Rule("Person.FirstName".to_string()),
            facts_retained: 1,
            source: IngestFailure::Compute(ComputeError::Failed("boom".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("rule Person.FirstName"));
        assert!(msg.contains("users"));
        assert!(msg.contains("facts retained: 1"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_unrouted_ingest_error() {
        let err = IngestError {
            message_kind: None,
            step: IngestStep::Route,
            facts_retained: 0,
            source: RouteError::Unroutable.into(),
        };
        assert!(err.to_string().contains("<unrouted>"));
    }
}
