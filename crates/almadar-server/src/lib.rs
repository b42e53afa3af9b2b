//! Almadar Server - HTTP surface for the orbital runtime
//!
//! - `POST /orbitals/:orbital/events` processes one event
//! - `GET /orbitals`, `GET /orbitals/:orbital` list and describe orbitals
//! - `GET /slots` shows current UI slot contents
//! - `GET /health` reports status, version and environment
//!
//! Deferred work runs on [`TokioScheduler`]; `call-service` targets can be
//! webhooks declared in the server configuration.

pub mod config;
pub mod error;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod webhook;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use router::handle_request;
pub use scheduler::TokioScheduler;
pub use state::AppState;
pub use webhook::WebhookIntegrator;
