//! Named compute functions for rules declared in configuration.
//!
//! A YAML schema refers to compute functions by name. [`TransformRegistry`]
//! maps those names to [`RuleFn`]s; it starts with a set of built-ins and
//! accepts custom functions before the schema is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ComputeError;
use crate::rules::RuleFn;
use crate::value::Value;

/// Registry for storing and looking up compute functions by name.
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn RuleFn>>,
}

impl TransformRegistry {
    /// Create an empty transform registry, without the built-ins.
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in transforms.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("identity", identity);
        registry.register("first_token", first_token);
        registry.register("uppercase", uppercase);
        registry.register("lowercase", lowercase);
        registry.register("trim", trim);
        registry.register("length", length);
        registry.register("concat", concat);
        registry.register("sum", sum);
        registry.register("name_length_plus_id", name_length_plus_id);
        registry
    }

    /// Register a transform, replacing any previous one with the same name.
    ///
    /// # Example
    ///
    /// ```
    /// use factflow::{ComputeError, TransformRegistry, Value};
    ///
    /// let mut registry = TransformRegistry::new();
    /// registry.register("double", |args: &[Value]| {
    ///     let n = args[0].as_int().ok_or(ComputeError::InvalidArgument { index: 0, expected: "int" })?;
    ///     Ok(Value::Int(n * 2))
    /// });
    /// assert_eq!(registry.call("double", &[Value::Int(21)]), Ok(Value::Int(42)));
    /// ```
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(func));
    }

    /// Shared handle to a registered transform.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RuleFn>> {
        self.transforms.get(name).cloned()
    }

    /// Call a registered transform.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ComputeError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| ComputeError::Failed(format!("transform not found: {}", name)))?;
        transform.compute(args)
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Names of all registered transforms, sorted.
    pub fn list_transforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.list_transforms())
            .finish()
    }
}

fn arity(args: &[Value], expected: usize) -> Result<(), ComputeError> {
    if args.len() != expected {
        return Err(ComputeError::Arity {
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn string_arg(args: &[Value], index: usize) -> Result<&str, ComputeError> {
    args[index]
        .as_str()
        .ok_or(ComputeError::InvalidArgument { index, expected: "string" })
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, ComputeError> {
    args[index]
        .as_int()
        .ok_or(ComputeError::InvalidArgument { index, expected: "int" })
}

fn identity(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    Ok(args[0].clone())
}

/// First whitespace-separated token of a string: "Bob Smith" -> "Bob".
fn first_token(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    let text = string_arg(args, 0)?;
    let token = text
        .split_whitespace()
        .next()
        .ok_or_else(|| ComputeError::Failed("empty string has no first token".to_string()))?;
    Ok(Value::from(token))
}

fn uppercase(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    Ok(Value::from(string_arg(args, 0)?.to_uppercase()))
}

fn lowercase(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    Ok(Value::from(string_arg(args, 0)?.to_lowercase()))
}

fn trim(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    Ok(Value::from(string_arg(args, 0)?.trim()))
}

/// Character count of a string, or element count of a list.
fn length(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        _ => Err(ComputeError::InvalidArgument {
            index: 0,
            expected: "string or list",
        }),
    }
}

/// Space-joined strings.
fn concat(args: &[Value]) -> Result<Value, ComputeError> {
    let parts = (0..args.len())
        .map(|i| string_arg(args, i))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::from(parts.join(" ")))
}

fn sum(args: &[Value]) -> Result<Value, ComputeError> {
    let mut total: i64 = 0;
    for i in 0..args.len() {
        total = total
            .checked_add(int_arg(args, i)?)
            .ok_or_else(|| ComputeError::Failed("integer overflow".to_string()))?;
    }
    Ok(Value::Int(total))
}

/// `(id, name)` -> length of name plus id.
fn name_length_plus_id(args: &[Value]) -> Result<Value, ComputeError> {
    arity(args, 2)?;
    let id = int_arg(args, 0)?;
    let name = string_arg(args, 1)?;
    i64::try_from(name.chars().count())
        .ok()
        .and_then(|len| len.checked_add(id))
        .map(Value::Int)
        .ok_or_else(|| ComputeError::Failed("integer overflow".to_string()))
}
