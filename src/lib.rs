//! # Factflow: CDC messages to entity facts
//!
//! Factflow turns change-data-capture messages into an append-only log of
//! typed facts about entities, and keeps derived attributes current by
//! cascading through a dependency graph of rules.
//!
//! ## Features
//!
//! - **Type registry**: entity types, attributes and relationships in one namespace
//! - **Routing and extraction**: key-path routes pick a message kind; key paths pull its fields
//! - **Rules**: message rules compute attributes from a message, derived rules from other attributes
//! - **Cascade**: storing an attribute re-evaluates its consumers; cycles are rejected up front
//! - **YAML schemas**: declare everything in a config file, with named transforms
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use factflow::{DerivedRule, EntityId, KeyPath, MessageKind, MessageRule, Registry, Route, Session, Value, ValueType};
//! use serde_json::json;
//!
//! let mut builder = Registry::builder();
//! builder
//!     .register_entity_type("Person")?
//!     .register_attribute("FirstName", &["Person"], ValueType::String)?
//!     .register_attribute("UpperFirstName", &["Person"], ValueType::String)?
//!     .register_message_kind(MessageKind::new("users").with_field("user_name", KeyPath::from_dotted("cdc.columns.name")))?
//!     .register_route(Route::new("users", KeyPath::from_dotted("metadata.table"), "users"))?
//!     .register_message_rule(
//!         MessageRule::new("Person", "FirstName", |args: &[Value]| Ok(args[0].clone()))
//!             .input("user_name")
//!             .bind("users", KeyPath::from_dotted("cdc.columns.id")),
//!     )?
//!     .register_derived_rule(
//!         DerivedRule::new("Person", "UpperFirstName", |args: &[Value]| {
//!             Ok(Value::from(args[0].to_string().to_uppercase()))
//!         })
//!         .depends_on("Person", "FirstName"),
//!     )?;
//!
//! let session = Session::new(Arc::new(builder.build()));
//! session
//!     .ingest(&json!({"cdc": {"columns": {"id": 4, "name": "Bob"}}, "metadata": {"table": "users"}}))
//!     .unwrap();
//! assert_eq!(
//!     session.store().get_latest_attribute("Person", "UpperFirstName", &EntityId::from(4)),
//!     Some(Value::from("BOB"))
//! );
//! # Ok::<(), factflow::RegistrationError>(())
//! ```

// Core model
pub mod error;
pub mod value;
pub mod types;
pub mod fact;

// Message handling
pub mod extraction;
pub mod router;

// Rules and registration
pub mod rules;
pub mod registry;
pub mod transform_registry;
pub mod config;

// Storage and ingestion
pub mod store;
pub mod session;
pub mod serialization;

// Re-export key types
pub use error::{
    ComputeError, ConfigError, CycleError, ExtractionError, IngestError, IngestFailure, IngestStep,
    RegistrationError, RouteError, StoreError, UnknownTypeError, ValidationError,
};
pub use value::{Value, ValueType};
pub use types::{AttributeDef, EntityTypeDef, Kind, RelationshipDef, TypeRegistry};
pub use fact::{AttributeFact, EntityId, Fact, FactId, FactOrigin, IdentityHash, RelationshipFact};
pub use extraction::{Endpoint, ExtractedFields, IdSource, KeyPath, MessageKind, PathSegment, RelationshipMapping};
pub use router::{Route, Router};
pub use rules::{AttributeKey, DependencyGraph, DerivedRule, MessageRule, RuleFn, RuleRegistry};
pub use registry::{Registry, RegistryBuilder};
pub use transform_registry::TransformRegistry;
pub use config::SchemaConfig;
pub use store::{FactBackend, FactStore, MemoryBackend, PutReport, StorePolicy};
pub use session::{IngestReport, Session};
pub use serialization::{JsonArrayWriter, NdjsonWriter, SerializationError};
