//! Service integrators behind the `call-service` effect
//!
//! An integrator reports its outcome as an event on the bus: exactly one of
//! the call's `onSuccess` or `onError` events is emitted per invocation.

use crate::bus::EventBus;
use crate::effect::ServiceCall;
use crate::{EffectError, Value, ValueMap};
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

/// Events a service call reports back with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceCallbacks {
    pub on_success: Option<String>,
    pub on_error: Option<String>,
}

impl ServiceCallbacks {
    pub fn new(on_success: impl Into<String>, on_error: impl Into<String>) -> Self {
        Self {
            on_success: Some(on_success.into()),
            on_error: Some(on_error.into()),
        }
    }

    /// Emit the success event with `{service, action, result}`
    pub fn succeed(&self, bus: &EventBus, service: &str, action: &str, result: Value) {
        let mut payload = base_payload(service, action);
        payload.insert("result".into(), result);
        self.publish(bus, self.on_success.as_deref(), payload);
    }

    /// Emit the error event with `{service, action, error}`
    pub fn fail(&self, bus: &EventBus, service: &str, action: &str, error: &EffectError) {
        tracing::warn!(service = %service, action = %action, error = %error, "Service call failed");
        let mut payload = base_payload(service, action);
        payload.insert("error".into(), error.to_value());
        self.publish(bus, self.on_error.as_deref(), payload);
    }

    fn publish(&self, bus: &EventBus, event: Option<&str>, payload: ValueMap) {
        match event {
            Some(event) => {
                bus.emit(event, Value::Object(payload));
            }
            None => tracing::debug!("Service call outcome has no callback event"),
        }
    }
}

impl From<&ServiceCall> for ServiceCallbacks {
    fn from(call: &ServiceCall) -> Self {
        Self {
            on_success: call.on_success.clone(),
            on_error: call.on_error.clone(),
        }
    }
}

fn base_payload(service: &str, action: &str) -> ValueMap {
    let mut payload = ValueMap::new();
    payload.insert("service".into(), Value::from(service));
    payload.insert("action".into(), Value::from(action));
    payload
}

/// An external service reachable through `call-service`
pub trait Integrator: Send + Sync {
    /// Service name used in `["call-service", name, ...]`
    fn name(&self) -> &str;

    /// Whether credentials or endpoints are present
    fn is_configured(&self) -> bool {
        true
    }

    /// Reject malformed params before anything is sent
    fn validate(&self, action: &str, params: &Value) -> Result<(), EffectError> {
        let _ = (action, params);
        Ok(())
    }

    /// Perform the action and return its result
    fn invoke(&self, action: &str, params: &Value) -> Result<Value, EffectError>;

    /// Run one call to completion and emit exactly one callback event
    ///
    /// Integrators that finish in the background override this and emit
    /// from the background task instead.
    fn execute(&self, action: &str, params: &Value, bus: &EventBus, callbacks: &ServiceCallbacks) {
        let outcome = if !self.is_configured() {
            Err(EffectError::new(
                "SERVICE_NOT_CONFIGURED",
                format!("service '{}' is not configured", self.name()),
            ))
        } else {
            self.validate(action, params)
                .and_then(|()| self.invoke(action, params))
        };
        match outcome {
            Ok(result) => callbacks.succeed(bus, self.name(), action, result),
            Err(err) => callbacks.fail(bus, self.name(), action, &err),
        }
    }
}

/// Name-keyed integrators
#[derive(Default)]
pub struct IntegratorRegistry {
    integrators: RwLock<IndexMap<String, Arc<dyn Integrator>>>,
}

impl IntegratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the integrator's own name, replacing any previous one
    pub fn register(&self, integrator: Arc<dyn Integrator>) {
        if let Ok(mut map) = self.integrators.write() {
            map.insert(integrator.name().to_string(), integrator);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integrator>> {
        self.integrators.read().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.integrators
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Route a call; an unknown service emits the error event
    pub fn execute(&self, call: &ServiceCall, bus: &EventBus) {
        let callbacks = ServiceCallbacks::from(call);
        match self.get(&call.service) {
            Some(integrator) => integrator.execute(&call.action, &call.params, bus, &callbacks),
            None => callbacks.fail(
                bus,
                &call.service,
                &call.action,
                &EffectError::new(
                    "UNKNOWN_SERVICE",
                    format!("no integrator named '{}'", call.service),
                ),
            ),
        }
    }
}

impl std::fmt::Debug for IntegratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegratorRegistry")
            .field("integrators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Echo {
        configured: bool,
    }

    impl Integrator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn validate(&self, _action: &str, params: &Value) -> Result<(), EffectError> {
            match params.get_path(&["text"]) {
                Value::String(_) => Ok(()),
                _ => Err(EffectError::new("VALIDATION_ERROR", "text is required")),
            }
        }

        fn invoke(&self, _action: &str, params: &Value) -> Result<Value, EffectError> {
            Ok(params.get_path(&["text"]))
        }
    }

    fn capture(bus: &EventBus) -> Arc<Mutex<Vec<(String, Value)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in ["OK", "FAILED"] {
            let seen = seen.clone();
            bus.on(event, move |e| {
                seen.lock().unwrap().push((e.event_type.clone(), e.payload.clone()));
                Ok(())
            });
        }
        seen
    }

    fn call(service: &str, params: serde_json::Value) -> ServiceCall {
        ServiceCall {
            service: service.into(),
            action: "say".into(),
            params: Value::from(params),
            on_success: Some("OK".into()),
            on_error: Some("FAILED".into()),
        }
    }

    #[test]
    fn test_success_emits_only_on_success() {
        let bus = EventBus::new();
        let seen = capture(&bus);
        let registry = IntegratorRegistry::new();
        registry.register(Arc::new(Echo { configured: true }));

        registry.execute(&call("echo", serde_json::json!({"text": "hi"})), &bus);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "OK");
        assert_eq!(seen[0].1.get_path(&["result"]), Value::from("hi"));
    }

    #[test]
    fn test_failures_emit_only_on_error() {
        let bus = EventBus::new();
        let seen = capture(&bus);
        let registry = IntegratorRegistry::new();
        registry.register(Arc::new(Echo { configured: true }));

        registry.execute(&call("echo", serde_json::json!({})), &bus);
        registry.execute(&call("missing", serde_json::json!({"text": "x"})), &bus);

        let seen = seen.lock().unwrap();
        let codes: Vec<Value> = seen
            .iter()
            .map(|(event, payload)| {
                assert_eq!(event, "FAILED");
                payload.get_path(&["error", "code"])
            })
            .collect();
        assert_eq!(codes, vec![Value::from("VALIDATION_ERROR"), Value::from("UNKNOWN_SERVICE")]);
    }

    #[test]
    fn test_unconfigured_integrator_fails() {
        let bus = EventBus::new();
        let seen = capture(&bus);
        let echo = Echo { configured: false };
        echo.execute("say", &Value::from(serde_json::json!({"text": "x"})), &bus, &ServiceCallbacks::new("OK", "FAILED"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1.get_path(&["error", "code"]), Value::from("SERVICE_NOT_CONFIGURED"));
    }
}
