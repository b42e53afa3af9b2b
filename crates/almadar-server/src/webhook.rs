//! Webhook integrator: `call-service` as an HTTP POST

use almadar_core::{EffectError, EventBus, Integrator, ServiceCallbacks, Value};
use std::time::Duration;
use tokio::runtime::Handle;

/// POSTs `{action, params}` to a URL and reports through the call's callbacks
///
/// The request runs on the tokio runtime; the success event carries the
/// decoded response body.
pub struct WebhookIntegrator {
    name: String,
    url: String,
    client: reqwest::Client,
    handle: Handle,
}

impl WebhookIntegrator {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration, handle: Handle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Falling back to default webhook client");
                reqwest::Client::new()
            });
        Self {
            name: name.into(),
            url: url.into(),
            client,
            handle,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Integrator for WebhookIntegrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    fn invoke(&self, _action: &str, _params: &Value) -> Result<Value, EffectError> {
        Err(EffectError::new(
            "ASYNC_ONLY",
            format!("webhook '{}' completes in the background", self.name),
        ))
    }

    fn execute(&self, action: &str, params: &Value, bus: &EventBus, callbacks: &ServiceCallbacks) {
        if !self.is_configured() {
            let err = EffectError::new(
                "SERVICE_NOT_CONFIGURED",
                format!("service '{}' has no webhook URL", self.name),
            );
            callbacks.fail(bus, &self.name, action, &err);
            return;
        }

        let request = self.client.post(&self.url).json(&serde_json::json!({
            "action": action,
            "params": params.to_json(),
        }));
        let bus = bus.clone();
        let callbacks = callbacks.clone();
        let name = self.name.clone();
        let action = action.to_string();
        tracing::debug!(service = %name, action = %action, url = %self.url, "Dispatching webhook");
        self.handle.spawn(async move {
            match send(request).await {
                Ok(result) => callbacks.succeed(&bus, &name, &action, result),
                Err(err) => callbacks.fail(&bus, &name, &action, &err),
            }
        });
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Value, EffectError> {
    let response = request
        .send()
        .await
        .map_err(|e| EffectError::new("SERVICE_UNAVAILABLE", e.to_string()))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| EffectError::new("SERVICE_UNAVAILABLE", e.to_string()))?;
    let body = decode(&text);
    if !status.is_success() {
        return Err(
            EffectError::new("HTTP_ERROR", format!("webhook responded {}", status)).with_details(serde_json::json!({
                "status": status.as_u16(),
                "body": body.to_json(),
            })),
        );
    }
    Ok(body)
}

/// JSON bodies decode to values; anything else is kept as text
fn decode(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from_json)
        .unwrap_or_else(|_| Value::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use almadar_core::BusEvent;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Echo server: 200 with the request body, or 503 when the action is "fail"
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let body = req.into_body().collect().await?.to_bytes();
                        let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
                        let status = if json["action"] == "fail" {
                            StatusCode::SERVICE_UNAVAILABLE
                        } else {
                            StatusCode::OK
                        };
                        let mut response = Response::new(Full::new(body));
                        *response.status_mut() = status;
                        Ok::<_, hyper::Error>(response)
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });
        format!("http://{}/hook", addr)
    }

    fn capture(bus: &EventBus) -> mpsc::UnboundedReceiver<BusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in ["SENT", "FAILED"] {
            let tx = tx.clone();
            bus.on(event, move |e| {
                tx.send(e.clone())?;
                Ok(())
            });
        }
        rx
    }

    fn params() -> Value {
        Value::from(serde_json::json!({"to": "ops@example.com"}))
    }

    #[tokio::test]
    async fn test_success_carries_response_body() {
        let url = echo_server().await;
        let bus = EventBus::new();
        let mut events = capture(&bus);
        let hook = WebhookIntegrator::new("mailer", url, Duration::from_secs(5), Handle::current());

        hook.execute("send", &params(), &bus, &ServiceCallbacks::new("SENT", "FAILED"));
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "SENT");
        assert_eq!(event.payload.get_path(&["service"]), Value::from("mailer"));
        assert_eq!(event.payload.get_path(&["result", "params", "to"]), Value::from("ops@example.com"));
    }

    #[tokio::test]
    async fn test_error_status_emits_on_error() {
        let url = echo_server().await;
        let bus = EventBus::new();
        let mut events = capture(&bus);
        let hook = WebhookIntegrator::new("mailer", url, Duration::from_secs(5), Handle::current());

        hook.execute("fail", &params(), &bus, &ServiceCallbacks::new("SENT", "FAILED"));
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "FAILED");
        assert_eq!(event.payload.get_path(&["error", "code"]), Value::from("HTTP_ERROR"));
        assert_eq!(event.payload.get_path(&["error", "details", "status"]), Value::Int(503));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_fails_immediately() {
        let bus = EventBus::new();
        let mut events = capture(&bus);
        let hook = WebhookIntegrator::new("mailer", "", Duration::from_secs(1), Handle::current());
        hook.execute("send", &params(), &bus, &ServiceCallbacks::new("SENT", "FAILED"));

        let event = events.try_recv().unwrap();
        assert_eq!(event.payload.get_path(&["error", "code"]), Value::from("SERVICE_NOT_CONFIGURED"));
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(""), Value::Null);
        assert_eq!(decode("{\"ok\":true}").get_path(&["ok"]), Value::Bool(true));
        assert_eq!(decode("plain"), Value::from("plain"));
    }
}
