//! Effect handler capability and effect outcome records
//!
//! Effect operators never touch storage, services or the UI directly. They
//! call into an [`EffectHandlers`] implementation injected by the host and
//! record what happened in an [`EffectOutcome`] carried by the context.

use crate::scheduler::Scheduler;
use crate::slot::RenderRequest;
use crate::{EffectError, Value, ValueMap};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Write actions accepted by the `persist` effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistAction {
    Create,
    Update,
    Delete,
}

impl PersistAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "create" => Some(PersistAction::Create),
            "update" => Some(PersistAction::Update),
            "delete" => Some(PersistAction::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PersistAction::Create => "create",
            PersistAction::Update => "update",
            PersistAction::Delete => "delete",
        }
    }
}

impl fmt::Display for PersistAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `call-service` request handed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub service: String,
    pub action: String,
    pub params: Value,
    /// Event emitted when the call succeeds
    pub on_success: Option<String>,
    /// Event emitted when the call fails
    pub on_error: Option<String>,
}

/// Host-provided side-effect capability
///
/// Every method has a default that reports the effect as unsupported, so a
/// host only implements the categories it wires up.
pub trait EffectHandlers: Send + Sync {
    /// Create, update or delete a record
    ///
    /// `id` is present for update and delete. The returned value is the
    /// stored record (or a `{deleted, id}` marker for delete).
    fn persist(
        &self,
        action: PersistAction,
        entity_type: &str,
        id: Option<&str>,
        data: &Value,
    ) -> Result<Value, EffectError> {
        let _ = (action, entity_type, id, data);
        Err(EffectError::unsupported("persist"))
    }

    /// Load one record (`Null` when missing)
    fn fetch_one(&self, entity_type: &str, id: &str) -> Result<Value, EffectError> {
        let _ = (entity_type, id);
        Err(EffectError::unsupported("fetch"))
    }

    /// Load every record of a type
    fn fetch_all(&self, entity_type: &str) -> Result<Vec<Value>, EffectError> {
        let _ = entity_type;
        Err(EffectError::unsupported("fetch"))
    }

    /// Start a service call; the outcome arrives later as an event
    fn call_service(&self, call: ServiceCall) -> Result<(), EffectError> {
        let _ = call;
        Err(EffectError::unsupported("call-service"))
    }

    /// Write (or clear, when `pattern` is absent) a UI slot
    fn render_ui(&self, request: RenderRequest) -> Result<(), EffectError> {
        let _ = request;
        Err(EffectError::unsupported("render-ui"))
    }

    /// Create a runtime entity and return its id
    fn spawn(&self, entity_type: &str, fields: ValueMap) -> Result<String, EffectError> {
        let _ = (entity_type, fields);
        Err(EffectError::unsupported("spawn"))
    }

    /// Remove a runtime entity
    fn despawn(&self, id: &str) -> Result<bool, EffectError> {
        let _ = id;
        Err(EffectError::unsupported("despawn"))
    }

    /// Publish an event emitted outside a dispatch (deferred `async/*` work)
    fn emit(&self, event: &str, payload: &Value) {
        let _ = (event, payload);
    }

    /// Observe a navigation request
    fn navigate(&self, path: &str, params: &Value) {
        let _ = (path, params);
    }

    /// Observe a notification
    fn notify(&self, message: &str, kind: &str) {
        let _ = (message, kind);
    }

    /// Scheduler for deferred work, if the host has one
    fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        None
    }
}

/// Handlers that support nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandlers;

impl EffectHandlers for NoopHandlers {}

/// An event queued by `emit` during a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedEvent {
    pub event: String,
    #[serde(with = "crate::value::json")]
    pub payload: Value,
}

/// Record of one server-side effect
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectResult {
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(with = "crate::value::json")]
    pub data: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EffectError>,
}

impl EffectResult {
    pub fn ok(effect: &str, data: Value) -> Self {
        Self {
            effect: effect.to_string(),
            action: None,
            entity_type: None,
            data,
            success: true,
            error: None,
        }
    }

    pub fn failed(effect: &str, error: EffectError) -> Self {
        Self {
            effect: effect.to_string(),
            action: None,
            entity_type: None,
            data: Value::Null,
            success: false,
            error: Some(error),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }
}

/// Everything a run of effects produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectOutcome {
    /// Events queued by `emit`, in order
    pub emitted: Vec<EmittedEvent>,
    /// Client-side effects as issued (`render-ui`, `navigate`, `notify`, `emit`)
    pub client_effects: Vec<Value>,
    /// Server-side effect results (`persist`, `fetch`, `call-service`, ...)
    pub effect_results: Vec<EffectResult>,
    /// Records loaded by `fetch`, keyed by entity type
    pub data: ValueMap,
}

impl EffectOutcome {
    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
            && self.client_effects.is_empty()
            && self.effect_results.is_empty()
            && self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_handlers_report_unsupported() {
        let handlers = NoopHandlers;
        let err = handlers
            .persist(PersistAction::Create, "Task", None, &Value::object())
            .unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_EFFECT");
        assert!(handlers.scheduler().is_none());
    }

    #[test]
    fn test_effect_result_json_shape() {
        let result = EffectResult::ok("persist", Value::from("x"))
            .with_action("create")
            .with_entity_type("Task");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "effect": "persist",
                "action": "create",
                "entityType": "Task",
                "data": "x",
                "success": true
            })
        );
    }

    #[test]
    fn test_persist_action_parse() {
        assert_eq!(PersistAction::parse("update"), Some(PersistAction::Update));
        assert_eq!(PersistAction::parse("upsert"), None);
    }
}
