//! Payload parser adapter.
//!
//! Normalizes heterogeneous validator shapes behind one contract:
//! `parse(raw) -> Result<parsed, ParseError>`. Supported shapes are plain
//! transform functions (sync or async) and schemas exposing fallible
//! `parse`, `assert`, or `validate` entry points. Validator-specific error
//! types never escape this boundary; every failure is wrapped into a
//! [`ParseError`] carrying the original cause.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Boxed error type produced by validators.
pub type SchemaError = Box<dyn std::error::Error + Send + Sync + 'static>;

type TransformFn = dyn Fn(Value) -> Result<Value, SchemaError> + Send + Sync;
type AsyncTransformFn = dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, SchemaError>> + Send>>
    + Send
    + Sync;

/// A rejected payload.
#[derive(Debug, Error)]
#[error("payload rejected: {message}")]
pub struct ParseError {
    message: String,
    #[source]
    source: Option<SchemaError>,
}

impl ParseError {
    /// Create a parse error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a parse error wrapping the validator's original failure.
    pub fn with_cause(message: impl Into<String>, cause: SchemaError) -> Self {
        Self {
            message: message.into(),
            source: Some(cause),
        }
    }

    /// The human-readable rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Schema exposing a fallible, transforming `parse` entry point.
pub trait ParseSchema: Send + Sync {
    /// Parse the raw value, returning the (possibly transformed) payload.
    fn parse(&self, raw: &Value) -> Result<Value, SchemaError>;
}

/// Schema exposing a fallible `assert` entry point (narrow-in-place, no
/// transform).
pub trait AssertSchema: Send + Sync {
    /// Assert that the raw value matches the schema.
    fn assert(&self, raw: &Value) -> Result<(), SchemaError>;
}

/// Schema exposing a fallible `validate` entry point (no transform).
pub trait ValidateSchema: Send + Sync {
    /// Validate the raw value against the schema.
    fn validate(&self, raw: &Value) -> Result<(), SchemaError>;
}

/// Uniform payload parser over every supported validator shape.
///
/// Cloning is cheap; all variants hold shared validators.
#[derive(Clone)]
pub enum PayloadParser {
    /// Plain synchronous transform function.
    Transform(Arc<TransformFn>),
    /// Asynchronous transform function.
    AsyncTransform(Arc<AsyncTransformFn>),
    /// Schema with a transforming `parse` entry point.
    Parse(Arc<dyn ParseSchema>),
    /// Schema with an `assert` entry point.
    Assert(Arc<dyn AssertSchema>),
    /// Schema with a `validate` entry point.
    Validate(Arc<dyn ValidateSchema>),
}

impl fmt::Debug for PayloadParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Transform(_) => "Transform",
            Self::AsyncTransform(_) => "AsyncTransform",
            Self::Parse(_) => "Parse",
            Self::Assert(_) => "Assert",
            Self::Validate(_) => "Validate",
        };
        f.debug_tuple("PayloadParser").field(&kind).finish()
    }
}

impl PayloadParser {
    /// Wrap a synchronous transform function.
    pub fn from_fn<F, E>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<SchemaError>,
    {
        Self::Transform(Arc::new(move |raw| f(raw).map_err(Into::into)))
    }

    /// Wrap an asynchronous transform function.
    pub fn from_async_fn<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<SchemaError>,
    {
        Self::AsyncTransform(Arc::new(move |raw| {
            let fut = f(raw);
            Box::pin(async move { fut.await.map_err(Into::into) })
        }))
    }

    /// Wrap a schema with a `parse` entry point.
    pub fn from_schema(schema: impl ParseSchema + 'static) -> Self {
        Self::Parse(Arc::new(schema))
    }

    /// Wrap a schema with an `assert` entry point.
    pub fn from_assert(schema: impl AssertSchema + 'static) -> Self {
        Self::Assert(Arc::new(schema))
    }

    /// Wrap a schema with a `validate` entry point.
    pub fn from_validate(schema: impl ValidateSchema + 'static) -> Self {
        Self::Validate(Arc::new(schema))
    }

    /// Parse a raw payload.
    ///
    /// Pure with respect to its input; `Assert`/`Validate` shapes return the
    /// raw value unchanged on success.
    pub async fn parse(&self, raw: Value) -> Result<Value, ParseError> {
        match self {
            Self::Transform(f) => {
                f(raw).map_err(|e| ParseError::with_cause("transform failed", e))
            }
            Self::AsyncTransform(f) => f(raw)
                .await
                .map_err(|e| ParseError::with_cause("transform failed", e)),
            Self::Parse(schema) => schema
                .parse(&raw)
                .map_err(|e| ParseError::with_cause("schema parse failed", e)),
            Self::Assert(schema) => match schema.assert(&raw) {
                Ok(()) => Ok(raw),
                Err(e) => Err(ParseError::with_cause("schema assertion failed", e)),
            },
            Self::Validate(schema) => match schema.validate(&raw) {
                Ok(()) => Ok(raw),
                Err(e) => Err(ParseError::with_cause("schema validation failed", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FooSchema;

    impl AssertSchema for FooSchema {
        fn assert(&self, raw: &Value) -> Result<(), SchemaError> {
            match raw.get("foo") {
                Some(Value::String(_)) => Ok(()),
                _ => Err("missing string field 'foo'".into()),
            }
        }
    }

    struct UppercaseSchema;

    impl ParseSchema for UppercaseSchema {
        fn parse(&self, raw: &Value) -> Result<Value, SchemaError> {
            let s = raw.as_str().ok_or("expected a string")?;
            Ok(Value::String(s.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_transform_fn() {
        let parser = PayloadParser::from_fn(|raw: Value| -> Result<Value, String> {
            raw.get("n")
                .and_then(Value::as_i64)
                .map(|n| json!({ "n": n * 2 }))
                .ok_or_else(|| "expected integer field 'n'".to_string())
        });

        let parsed = parser.parse(json!({ "n": 21 })).await.unwrap();
        assert_eq!(parsed, json!({ "n": 42 }));

        let err = parser.parse(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("payload rejected"));
    }

    #[tokio::test]
    async fn test_async_transform_fn() {
        let parser = PayloadParser::from_async_fn(|raw: Value| async move {
            if raw.is_object() {
                Ok::<_, String>(raw)
            } else {
                Err("expected an object".to_string())
            }
        });

        assert!(parser.parse(json!({ "a": 1 })).await.is_ok());
        assert!(parser.parse(json!(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_schema_transforms() {
        let parser = PayloadParser::from_schema(UppercaseSchema);
        let parsed = parser.parse(json!("hello")).await.unwrap();
        assert_eq!(parsed, json!("HELLO"));
    }

    #[tokio::test]
    async fn test_assert_schema_passes_raw_through() {
        let parser = PayloadParser::from_assert(FooSchema);

        let parsed = parser.parse(json!({ "foo": "bar" })).await.unwrap();
        assert_eq!(parsed, json!({ "foo": "bar" }));

        let err = parser.parse(json!({})).await.unwrap_err();
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_validate_schema() {
        struct NonEmpty;
        impl ValidateSchema for NonEmpty {
            fn validate(&self, raw: &Value) -> Result<(), SchemaError> {
                if raw.as_object().is_some_and(|o| !o.is_empty()) {
                    Ok(())
                } else {
                    Err("empty payload".into())
                }
            }
        }

        let parser = PayloadParser::from_validate(NonEmpty);
        assert!(parser.parse(json!({ "k": 1 })).await.is_ok());
        assert!(parser.parse(json!({})).await.is_err());
    }
}
