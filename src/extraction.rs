//! Key-path extraction from nested messages.
//!
//! A [`MessageKind`] declares where its logical fields live inside a message
//! (`argument_mapping`) and how relationship endpoints are identified
//! (`relationship_mapping`). Lookups never substitute placeholders: a missing
//! key is an [`ExtractionError`].

use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::ExtractionError;
use crate::fact::EntityId;
use crate::value::Value;

/// A segment in a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A map key (e.g., "cdc", "columns")
    Key(String),
    /// A list index (e.g., [0])
    Index(usize),
}

impl PathSegment {
    fn parse(s: &str) -> Self {
        if s.starts_with('[') && s.ends_with(']') {
            if let Ok(index) = s[1..s.len() - 1].parse::<usize>() {
                return PathSegment::Index(index);
            }
        }
        PathSegment::Key(s.to_string())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Ordered path into a nested message.
///
/// Deserializes from either a sequence (`[cdc, columns, id]`) or a dotted
/// string (`"cdc.columns.id"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "KeyPathRepr", into = "Vec<String>")]
pub struct KeyPath {
    segments: Vec<PathSegment>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyPathRepr {
    Dotted(String),
    Segments(Vec<String>),
}

impl From<KeyPathRepr> for KeyPath {
    fn from(repr: KeyPathRepr) -> Self {
        match repr {
            KeyPathRepr::Dotted(path) => KeyPath::from_dotted(&path),
            KeyPathRepr::Segments(segments) => KeyPath::new(segments),
        }
    }
}

impl From<KeyPath> for Vec<String> {
    fn from(path: KeyPath) -> Self {
        path.segments.iter().map(|s| s.to_string()).collect()
    }
}

impl KeyPath {
    /// Build a path from individual segments. `"[n]"` segments index lists.
    ///
    /// # Example
    ///
    /// ```
    /// use factflow::KeyPath;
    ///
    /// let path = KeyPath::new(["cdc", "columns", "id"]);
    /// assert_eq!(path.len(), 3);
    /// assert_eq!(path.to_string(), "cdc.columns.id");
    /// ```
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(|s| PathSegment::parse(s.as_ref()))
                .collect(),
        }
    }

    /// Parse a dotted path such as `cdc.columns.id` or `items.[0].name`.
    pub fn from_dotted(path: &str) -> Self {
        Self::new(path.split('.').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Traverse `message` one segment at a time.
    pub fn lookup<'a>(&self, message: &'a JsonValue) -> Result<&'a JsonValue, ExtractionError> {
        let mut current = message;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(key), JsonValue::Object(map)) => {
                    map.get(key).ok_or_else(|| self.missing(segment))?
                }
                (PathSegment::Index(index), JsonValue::Array(items)) => {
                    items.get(*index).ok_or_else(|| self.missing(segment))?
                }
                (PathSegment::Key(_), _) => return Err(self.not_a_container(segment, "map")),
                (PathSegment::Index(_), _) => return Err(self.not_a_container(segment, "list")),
            };
        }
        Ok(current)
    }

    /// Look up a leaf and convert it to a [`Value`].
    pub fn extract(&self, message: &JsonValue) -> Result<Value, ExtractionError> {
        let json = self.lookup(message)?;
        if has_oversized_int(json) {
            return Err(ExtractionError::IntegerOutOfRange { path: self.to_string() });
        }
        Value::from_json(json).ok_or_else(|| ExtractionError::NotScalar {
            path: self.to_string(),
        })
    }

    /// Look up a leaf and use it as an entity id.
    pub fn extract_entity_id(&self, message: &JsonValue) -> Result<EntityId, ExtractionError> {
        let value = self.extract(message)?;
        EntityId::from_value(&value).map_err(|reason| ExtractionError::InvalidEntityId {
            source_desc: self.to_string(),
            reason,
        })
    }

    fn missing(&self, segment: &PathSegment) -> ExtractionError {
        ExtractionError::MissingKey {
            path: self.to_string(),
            segment: segment.to_string(),
        }
    }

    fn not_a_container(&self, segment: &PathSegment, expected: &'static str) -> ExtractionError {
        ExtractionError::NotAContainer {
            path: self.to_string(),
            segment: segment.to_string(),
            expected,
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Where a relationship endpoint's entity id comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    /// A key path into the raw message.
    #[serde(rename = "id_keypath")]
    Path(KeyPath),
    /// A field declared in the message kind's argument mapping.
    Field(String),
}

impl fmt::Display for IdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSource::Path(path) => write!(f, "{}", path),
            IdSource::Field(field) => write!(f, "field '{}'", field),
        }
    }
}

/// One end of a relationship mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub entity_type: String,
    #[serde(flatten)]
    pub id: IdSource,
}

impl Endpoint {
    pub fn new(entity_type: impl Into<String>, id: IdSource) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMapping {
    pub source: Endpoint,
    pub target: Endpoint,
}

/// Declares the fields and relationships carried by one kind of message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKind {
    pub name: String,
    #[serde(default)]
    pub argument_mapping: IndexMap<String, KeyPath>,
    #[serde(default)]
    pub relationship_mapping: IndexMap<String, RelationshipMapping>,
}

impl MessageKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argument_mapping: IndexMap::new(),
            relationship_mapping: IndexMap::new(),
        }
    }

    /// Map a logical field name to a key path.
    pub fn with_field(mut self, field: impl Into<String>, path: KeyPath) -> Self {
        self.argument_mapping.insert(field.into(), path);
        self
    }

    /// Declare a relationship derived from this message kind.
    pub fn with_relationship(mut self, relationship: impl Into<String>, source: Endpoint, target: Endpoint) -> Self {
        self.relationship_mapping
            .insert(relationship.into(), RelationshipMapping { source, target });
        self
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.argument_mapping.contains_key(field)
    }

    /// Extract every declared field from `message`.
    ///
    /// # Errors
    ///
    /// Fails on the first field whose key path cannot be resolved.
    pub fn extract(&self, message: &JsonValue) -> Result<ExtractedFields, ExtractionError> {
        let mut fields = ExtractedFields::default();
        for (name, path) in &self.argument_mapping {
            let value = path.extract(message)?;
            tracing::trace!(message_kind = %self.name, field = %name, path = %path, "extracted field");
            fields.insert(name.clone(), value);
        }
        Ok(fields)
    }

    /// Resolve an endpoint's entity id against a message and its extracted
    /// fields.
    pub fn resolve_id(
        &self,
        id: &IdSource,
        message: &JsonValue,
        fields: &ExtractedFields,
    ) -> Result<EntityId, ExtractionError> {
        match id {
            IdSource::Path(path) => path.extract_entity_id(message),
            IdSource::Field(field) => {
                let value = fields
                    .get(field)
                    .ok_or_else(|| ExtractionError::UnknownField(field.clone()))?;
                EntityId::from_value(value).map_err(|reason| ExtractionError::InvalidEntityId {
                    source_desc: id.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Field values extracted from a single message, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedFields {
    values: IndexMap<String, Value>,
}

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Values of `names` in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Value>, ExtractionError> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| ExtractionError::UnknownField(name.as_ref().to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

fn has_oversized_int(json: &JsonValue) -> bool {
    match json {
        JsonValue::Number(n) => n.is_u64() && n.as_i64().is_none(),
        JsonValue::Array(items) => items.iter().any(has_oversized_int),
        _ => false,
    }
}
