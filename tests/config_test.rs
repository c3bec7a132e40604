//! Schema loading tests

use std::io::Write;
use std::path::PathBuf;

use factflow::{
    ComputeError, ConfigError, EntityId, IngestFailure, IngestStep, SchemaConfig, StorePolicy, TransformRegistry,
    Value,
};
use serde_json::json;
use tempfile::NamedTempFile;

fn example_schema() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/examples/users.yaml")
}

#[test]
fn test_example_schema_reproduces_end_to_end() {
    let config = SchemaConfig::load_from_file(example_schema()).unwrap();
    let session = config.into_session(&TransformRegistry::new()).unwrap();

    let report = session
        .ingest(&json!({
            "cdc": {"columns": {"id": 4, "name": "Bob Smith", "state": "FL"}},
            "metadata": {"table": "users"}
        }))
        .unwrap();
    assert_eq!(report.attribute_facts.len(), 4);
    assert_eq!(report.derived_facts.len(), 1);

    let store = session.store();
    let bob = EntityId::from(4);
    assert_eq!(store.get_latest_attribute("Person", "FirstName", &bob), Some(Value::from("Bob")));
    assert_eq!(store.get_latest_attribute("Person", "UserID", &bob), Some(Value::Int(4)));
    assert_eq!(store.get_latest_attribute("Person", "UpperFirstName", &bob), Some(Value::from("BOB")));
    assert_eq!(store.get_latest_attribute("Person", "LuckyNumber", &bob), Some(Value::Int(13)));
    // same message, keyed by the state column
    assert_eq!(
        store.get_latest_attribute("State", "StateAbbreviation", &EntityId::from("FL")),
        Some(Value::from("FL"))
    );
    assert_eq!(store.get_latest_attribute("State", "StateAbbreviation", &bob), None);

    let relationship = store.facts().into_iter().find_map(|f| f.as_relationship().cloned()).unwrap();
    assert_eq!(relationship.to_string(), "Person(4) -LivesIn-> State(FL)");
}

#[test]
fn test_example_schema_rejects_overflowing_id() {
    let config = SchemaConfig::load_from_file(example_schema()).unwrap();
    let session = config.into_session(&TransformRegistry::new()).unwrap();

    let err = session
        .ingest(&json!({
            "cdc": {"columns": {"id": i64::MAX, "name": "Bob Smith", "state": "FL"}},
            "metadata": {"table": "users"}
        }))
        .unwrap_err();
    assert_eq!(err.step, IngestStep::Rule("Person.LuckyNumber".to_string()));
    assert_eq!(
        err.source,
        IngestFailure::Compute(ComputeError::Failed("integer overflow".to_string()))
    );
}

#[test]
fn test_load_from_temp_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
entity_types: [Product]
attributes:
  - name: Sku
    entity_types: [Product]
    value_type: string
message_kinds:
  - name: products
    argument_mapping:
      sku: payload.sku
routes:
  - message_kind: products
    key_path: source.table
    equals: products
rules:
  message:
    - target: Product.Sku
      transform: trim
      inputs: [sku]
      bindings:
        products: payload.id
store:
  policy: dedup_by_identity
"#
    )
    .unwrap();

    let config = SchemaConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.policy(), StorePolicy::DedupByIdentity);

    let session = config.into_session(&TransformRegistry::new()).unwrap();
    let message = json!({"payload": {"id": "p-1", "sku": " AB-12 "}, "source": {"table": "products"}});
    session.ingest(&message).unwrap();
    let report = session.ingest(&message).unwrap();

    assert_eq!(report.deduplicated, 1);
    assert_eq!(session.store().len(), 1);
    assert_eq!(
        session.store().get_latest_attribute("Product", "Sku", &EntityId::from("p-1")),
        Some(Value::from("AB-12"))
    );
}

#[test]
fn test_custom_transform() {
    let yaml = r#"
entity_types: [Person]
attributes:
  - name: Name
    entity_types: [Person]
  - name: Initial
    entity_types: [Person]
    value_type: string
rules:
  derived:
    - target: Person.Initial
      transform: initial
      dependencies: [Person.Name]
"#;
    let config = SchemaConfig::from_yaml_str(yaml).unwrap();
    assert!(matches!(
        config.build(&TransformRegistry::new()),
        Err(ConfigError::UnknownTransform(ref name)) if name == "initial"
    ));

    let mut transforms = TransformRegistry::new();
    transforms.register("initial", |args: &[Value]| {
        Ok(Value::from(args[0].to_string().chars().take(1).collect::<String>()))
    });
    let registry = config.build(&transforms).unwrap();
    assert_eq!(registry.rules().derived_rule_count(), 1);
}

#[test]
fn test_missing_file() {
    let err = SchemaConfig::load_from_file("does/not/exist.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("does/not/exist.yaml"));
}

#[test]
fn test_unknown_route_kind_is_rejected() {
    let yaml = r#"
entity_types: [Person]
routes:
  - message_kind: users
    key_path: metadata.table
    equals: users
"#;
    let config = SchemaConfig::from_yaml_str(yaml).unwrap();
    let err = config.build(&TransformRegistry::new()).unwrap_err();
    assert!(matches!(err, ConfigError::Registration(_)));
}
