//! Schema gateway: one validate-and-coerce contract over pluggable validators.
//!
//! The dispatch engine and the handshake path never see a concrete validator,
//! only the [`Schema`] trait. Validation may suspend (a validator backed by a
//! remote registry, say), so the trait is async; the built-in adapters resolve
//! immediately.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;

/// One validation failure. Serializable because issue lists are embedded in
/// the HTTP 400 handshake rejection body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Dotted path into the offending value, or empty for the root.
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    pub fn root(message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            message: message.into(),
        }
    }
}

/// A pluggable payload validator: given a raw value, return the coerced value
/// or a list of issues. An issues result never escalates past the frame (or
/// handshake) that carried the bad value.
#[async_trait]
pub trait Schema: Send + Sync {
    async fn validate(&self, raw: &Value) -> Result<Value, Vec<SchemaIssue>>;
}

/// Passthrough schema: accepts any value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySchema;

#[async_trait]
impl Schema for AnySchema {
    async fn validate(&self, raw: &Value) -> Result<Value, Vec<SchemaIssue>> {
        Ok(raw.clone())
    }
}

/// Schema backed by a serde type: validation is deserialization into `T`,
/// coercion is re-serialization. Unknown fields, defaults, and renames all
/// behave exactly as `T`'s serde derives say they do.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedSchema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Shorthand for `TypedSchema::<T>::new()`.
pub fn typed<T>() -> TypedSchema<T> {
    TypedSchema::new()
}

#[async_trait]
impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Send + Sync,
{
    async fn validate(&self, raw: &Value) -> Result<Value, Vec<SchemaIssue>> {
        let parsed: T = serde_json::from_value(raw.clone())
            .map_err(|e| vec![SchemaIssue::root(e.to_string())])?;
        serde_json::to_value(parsed).map_err(|e| vec![SchemaIssue::root(e.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        message: String,
        #[serde(default)]
        count: u32,
    }

    #[tokio::test]
    async fn test_any_schema_passthrough() {
        let value = json!({"whatever": [1, 2, 3]});
        assert_eq!(AnySchema.validate(&value).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_typed_schema_coerces_defaults() {
        let schema = typed::<Ping>();
        let coerced = schema.validate(&json!({"message": "hi"})).await.unwrap();
        assert_eq!(coerced, json!({"message": "hi", "count": 0}));
    }

    #[tokio::test]
    async fn test_typed_schema_reports_issues() {
        let schema = typed::<Ping>();
        let issues = schema.validate(&json!({"message": 7})).await.unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "");
        assert!(issues[0].message.contains("expected a string"));
    }

    #[tokio::test]
    async fn test_typed_schema_rejects_null_for_required() {
        let schema = typed::<Ping>();
        assert!(schema.validate(&Value::Null).await.is_err());
    }

    #[test]
    fn test_issue_serialization() {
        let issue = SchemaIssue::root("missing field `token`");
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value, json!({"path": "", "message": "missing field `token`"}));
    }
}
