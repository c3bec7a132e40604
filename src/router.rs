//! Message classification.
//!
//! A [`Router`] holds routes of the form "the value at `key_path` equals
//! `expected`". A message must match exactly one route.

use serde::{Serialize, Deserialize};
use serde_json::Value as JsonValue;

use crate::error::RouteError;
use crate::extraction::KeyPath;

/// Information necessary to assign a message to its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub message_kind: String,
    pub key_path: KeyPath,
    #[serde(rename = "equals")]
    pub expected: JsonValue,
}

impl Route {
    pub fn new(message_kind: impl Into<String>, key_path: KeyPath, expected: impl Into<JsonValue>) -> Self {
        Self {
            message_kind: message_kind.into(),
            key_path,
            expected: expected.into(),
        }
    }

    /// A route whose key path is absent from the message does not match.
    pub fn matches(&self, message: &JsonValue) -> bool {
        self.key_path
            .lookup(message)
            .map(|value| value == &self.expected)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Return the message kind of the single matching route.
    ///
    /// # Errors
    ///
    /// * [`RouteError::Unroutable`] if no route matches
    /// * [`RouteError::Ambiguous`] if more than one route matches
    pub fn classify(&self, message: &JsonValue) -> Result<&str, RouteError> {
        let matched: Vec<&Route> = self.routes.iter().filter(|r| r.matches(message)).collect();
        match matched.as_slice() {
            [] => Err(RouteError::Unroutable),
            [route] => {
                tracing::debug!(message_kind = %route.message_kind, "message routed");
                Ok(&route.message_kind)
            }
            many => Err(RouteError::Ambiguous {
                kinds: many.iter().map(|r| r.message_kind.clone()).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> Router {
        let mut router = Router::new();
        router.add_route(Route::new("users", KeyPath::from_dotted("metadata.table"), "users"));
        router.add_route(Route::new("orders", KeyPath::from_dotted("metadata.table"), "orders"));
        router
    }

    #[test]
    fn test_classify_single_match() {
        let msg = json!({"metadata": {"table": "orders"}});
        assert_eq!(router().classify(&msg), Ok("orders"));
    }

    #[test]
    fn test_classify_no_match() {
        let msg = json!({"metadata": {"table": "payments"}});
        assert_eq!(router().classify(&msg), Err(RouteError::Unroutable));

        let missing = json!({"cdc": {}});
        assert_eq!(router().classify(&missing), Err(RouteError::Unroutable));
    }

    #[test]
    fn test_classify_ambiguous() {
        let mut router = router();
        router.add_route(Route::new("legacy_users", KeyPath::from_dotted("metadata.table"), "users"));

        let msg = json!({"metadata": {"table": "users"}});
        assert_eq!(
            router.classify(&msg),
            Err(RouteError::Ambiguous {
                kinds: vec!["users".to_string(), "legacy_users".to_string()],
            })
        );
    }

    #[test]
    fn test_match_is_exact_value_equality() {
        let mut router = Router::new();
        router.add_route(Route::new("v1", KeyPath::from_dotted("version"), 1));

        assert_eq!(router.classify(&json!({"version": 1})), Ok("v1"));
        assert_eq!(router.classify(&json!({"version": "1"})), Err(RouteError::Unroutable));
    }
}
