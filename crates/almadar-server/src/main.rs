//! almadar-server binary
//!
//! Usage: `almadar-server [config.ron]`. Without a file the defaults are used;
//! `ALMADAR_LISTEN` and `ALMADAR_ENV` override the loaded values. Log output
//! follows `RUST_LOG` (default `info`).

use almadar_server::{handle_request, AppState, ServerConfig};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "Loading configuration");
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    }
    .with_env_overrides();

    let addr = config.listen_addr()?;
    let state = Arc::new(AppState::build(config)?);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %addr,
        environment = %state.config.environment,
        orbitals = state.runtime.orbital_names().len(),
        "Listening"
    );

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Accept error");
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(handle_request(state, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(remote = %remote_addr, error = %e, "Connection error");
            }
        });
    }
}
