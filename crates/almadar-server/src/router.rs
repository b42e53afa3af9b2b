//! Request routing and handlers

use crate::error::{Result, ServerError};
use crate::state::AppState;
use almadar_core::{EventRequest, EventResponse};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Route one request; failures become JSON error responses
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    tracing::debug!(method = %method, path = %path, "Request");

    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(health(&state)),
        (&Method::GET, ["orbitals"]) => Ok(json_response(StatusCode::OK, &state.runtime.orbital_names())),
        (&Method::GET, ["orbitals", name]) => describe(&state, name),
        (&Method::POST, ["orbitals", name, "events"]) => {
            process_event(state.clone(), name, req.into_body()).await
        }
        (&Method::GET, ["slots"]) => Ok(json_response(StatusCode::OK, &state.runtime.slots().snapshot())),
        (_, ["health"] | ["orbitals"] | ["orbitals", _] | ["orbitals", _, "events"] | ["slots"]) => {
            Err(ServerError::MethodNotAllowed)
        }
        _ => Err(ServerError::NotFound(path.clone())),
    };
    result.unwrap_or_else(ServerError::into_response)
}

fn health(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
        }),
    )
}

fn describe(state: &AppState, name: &str) -> Result<Response<Full<Bytes>>> {
    let info = state
        .runtime
        .describe(name)
        .ok_or_else(|| ServerError::NotFound(format!("orbital '{}'", name)))?;
    Ok(json_response(StatusCode::OK, &info))
}

/// Processing runs on the blocking pool since persistence may do disk I/O
async fn process_event<B>(state: Arc<AppState>, orbital: &str, body: B) -> Result<Response<Full<Bytes>>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
        .to_bytes();
    let request: EventRequest =
        serde_json::from_slice(&bytes).map_err(|e| ServerError::BadRequest(format!("invalid event body: {}", e)))?;
    if request.event.is_empty() {
        return Err(ServerError::BadRequest("event name is empty".into()));
    }

    let orbital = orbital.to_string();
    let response = tokio::task::spawn_blocking(move || state.runtime.process(&orbital, request)).await?;
    Ok(json_response(event_status(&response), &response))
}

fn event_status(response: &EventResponse) -> StatusCode {
    if response.success {
        return StatusCode::OK;
    }
    match response.error.as_ref().map(|e| e.code.as_str()) {
        Some("NOT_FOUND") => StatusCode::NOT_FOUND,
        Some("VALIDATION_ERROR") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serialize `body` as a JSON response
pub fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Full<Bytes>> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"success":false,"error":{"code":"INTERNAL_ERROR","message":"serialization failed"}}"#.to_vec(),
            )
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use almadar_core::{
        InMemoryRepository, OrbitalRegistration, Persistence, Runtime, SExpr, StateDef, TraitDef, TransitionDef,
        ValueMap,
    };
    use serde_json::{json, Value as Json};
    use std::sync::Mutex;
    use std::thread::ThreadId;

    fn state() -> Arc<AppState> {
        let state = AppState::build(ServerConfig::default()).unwrap();
        let emit = SExpr::from_json(json!(["emit", "STARTED", {"at": "@now"}])).unwrap();
        let render = SExpr::from_json(json!(["render-ui", "main", "JobCard", {"id": "@entity.id"}])).unwrap();
        state
            .runtime
            .register(
                OrbitalRegistration::new("Jobs", "Job").with_trait(
                    TraitDef::new("Lifecycle")
                        .with_state(StateDef::initial("Pending"))
                        .with_state(StateDef::new("Active"))
                        .with_transition(
                            TransitionDef::new("Pending", "START", "Active")
                                .with_effect(emit)
                                .with_effect(render),
                        ),
                ),
            )
            .unwrap();
        Arc::new(state)
    }

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: &str) -> (StatusCode, Json) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        let response = handle_request(state.clone(), req).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&state(), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "development");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_post_event() {
        let state = state();
        let (status, body) = call(&state, "POST", "/orbitals/Jobs/events", r#"{"event": "START", "entityId": "j1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["transitioned"], true);
        assert_eq!(body["states"]["Lifecycle"], "Active");
        assert_eq!(body["emittedEvents"][0]["event"], "STARTED");
        assert!(body["emittedEvents"][0]["payload"]["at"].is_i64());
        assert_eq!(body["clientEffects"].as_array().unwrap().len(), 2);

        let (_, slots) = call(&state, "GET", "/slots", "").await;
        assert_eq!(slots["main"]["pattern"], "JobCard");
        assert_eq!(slots["main"]["props"]["id"], "j1");
    }

    #[tokio::test]
    async fn test_request_errors() {
        let state = state();
        let (status, body) = call(&state, "POST", "/orbitals/Nope/events", r#"{"event": "START"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = call(&state, "POST", "/orbitals/Jobs/events", r#"{"event": "ENTITY_DELETE"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = call(&state, "POST", "/orbitals/Jobs/events", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, "DELETE", "/orbitals", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = call(&state, "GET", "/nowhere", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_introspection() {
        let state = state();
        let (_, names) = call(&state, "GET", "/orbitals", "").await;
        assert_eq!(names, json!(["Jobs"]));

        let (status, info) = call(&state, "GET", "/orbitals/Jobs", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["entityType"], "Job");
        assert_eq!(info["traits"][0]["initialState"], "Pending");
        assert_eq!(info["traits"][0]["states"], json!(["Pending", "Active"]));

        let (status, _) = call(&state, "GET", "/orbitals/Missing", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    /// Records the thread each write runs on
    struct ThreadRecorder {
        inner: InMemoryRepository,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl Persistence for ThreadRecorder {
        fn create(&self, entity_type: &str, data: ValueMap) -> almadar_core::Result<ValueMap> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.create(entity_type, data)
        }

        fn update(&self, entity_type: &str, id: &str, data: ValueMap) -> almadar_core::Result<ValueMap> {
            self.inner.update(entity_type, id, data)
        }

        fn delete(&self, entity_type: &str, id: &str) -> almadar_core::Result<bool> {
            self.inner.delete(entity_type, id)
        }

        fn get(&self, entity_type: &str, id: &str) -> almadar_core::Result<Option<ValueMap>> {
            self.inner.get(entity_type, id)
        }

        fn list(&self, entity_type: &str) -> almadar_core::Result<Vec<ValueMap>> {
            self.inner.list(entity_type)
        }
    }

    #[tokio::test]
    async fn test_events_are_processed_off_the_request_thread() {
        let recorder = Arc::new(ThreadRecorder {
            inner: InMemoryRepository::new(),
            threads: Mutex::new(Vec::new()),
        });
        let runtime = Runtime::builder().persistence(recorder.clone()).build();
        runtime.register(OrbitalRegistration::new("Notes", "Note")).unwrap();
        let state = Arc::new(AppState {
            config: ServerConfig::default(),
            runtime,
        });

        let (status, body) = call(
            &state,
            "POST",
            "/orbitals/Notes/events",
            r#"{"event": "ENTITY_CREATE", "payload": {"data": {"text": "hi"}}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let threads = recorder.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }
}
