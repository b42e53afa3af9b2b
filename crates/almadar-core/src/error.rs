//! Error types for almadar-core

use crate::Value;
use serde::Serialize;
use thiserror::Error;

/// Core error type
///
/// Only construction and request validation failures travel through this
/// type to callers. Evaluation problems never become errors; they degrade to
/// `Value::Undefined`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Construction error in {context}: {message}")]
    Construction { context: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Orbital not found: {0}")]
    OrbitalNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Effect failed: {0}")]
    Effect(#[from] EffectError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a construction error for the named schema element
    pub fn construction(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Construction {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Structured failure reported at the effect boundary
///
/// Persistence and service failures are caught where the effect runs and
/// surfaced as `{code, message, details?}` rather than propagated.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("[{code}] {message}")]
pub struct EffectError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_details")]
    pub details: Option<Value>,
}

impl From<Error> for EffectError {
    fn from(err: Error) -> Self {
        if let Error::Effect(inner) = err {
            return inner;
        }
        let code = match &err {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::EntityNotFound(_) | Error::OrbitalNotFound(_) => "NOT_FOUND",
            Error::Persistence(_) => "PERSISTENCE_ERROR",
            Error::Service(_) => "SERVICE_ERROR",
            _ => "INTERNAL_ERROR",
        };
        EffectError::new(code, err.to_string())
    }
}

impl EffectError {
    /// Create an effect error without details
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach details
    pub fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// The host did not wire a handler for this effect category
    pub fn unsupported(effect: &str) -> Self {
        Self::new(
            "UNSUPPORTED_EFFECT",
            format!("No handler registered for '{}'", effect),
        )
    }

    /// Render as a value for event payloads
    pub fn to_value(&self) -> Value {
        let mut map = crate::ValueMap::new();
        map.insert("code".into(), Value::from(self.code.as_str()));
        map.insert("message".into(), Value::from(self.message.as_str()));
        if let Some(details) = &self.details {
            map.insert("details".into(), details.clone());
        }
        Value::Object(map)
    }
}

fn serialize_details<S>(details: &Option<Value>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match details {
        Some(value) => value.to_json().serialize(serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_error_serializes_without_empty_details() {
        let err = EffectError::new("NOT_FOUND", "missing");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"code": "NOT_FOUND", "message": "missing"}));

        let err = err.with_details("Task/1");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["details"], serde_json::json!("Task/1"));
    }

    #[test]
    fn test_effect_error_to_value() {
        let err = EffectError::new("E", "boom");
        assert_eq!(err.to_value().get_path(&["code"]), Value::from("E"));
    }
}
