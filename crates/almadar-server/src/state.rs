//! Shared server state

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::scheduler::TokioScheduler;
use crate::webhook::WebhookIntegrator;
use almadar_core::{InMemoryRepository, Persistence, Runtime};
use almadar_db::Store;
use almadar_script::Loader;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs
pub struct AppState {
    pub config: ServerConfig,
    pub runtime: Runtime,
}

impl AppState {
    /// Build the runtime from configuration; must run inside a tokio runtime
    pub fn build(config: ServerConfig) -> Result<Self> {
        let scheduler = TokioScheduler::current()
            .map_err(|e| ServerError::Config(format!("no tokio runtime: {}", e)))?;

        let persistence: Arc<dyn Persistence> = match &config.database {
            Some(path) => Arc::new(Store::open(path)?),
            None => {
                tracing::info!("No database configured; records are kept in memory");
                Arc::new(InMemoryRepository::new())
            }
        };

        let mut builder = Runtime::builder()
            .config(config.runtime.clone())
            .persistence(persistence)
            .scheduler(Arc::new(scheduler));
        let timeout = Duration::from_millis(config.webhook_timeout_ms);
        for (name, url) in &config.integrators {
            tracing::info!(service = %name, url = %url, "Webhook integrator");
            builder = builder.integrator(Arc::new(WebhookIntegrator::new(
                name.as_str(),
                url.as_str(),
                timeout,
                tokio::runtime::Handle::current(),
            )));
        }
        let runtime = builder.build();

        if let Some(dir) = &config.schema_dir {
            let mut loader = Loader::with_evaluator(runtime.evaluator().clone());
            loader.load_directory(dir)?;
            loader.register_all(&runtime)?;
        }

        Ok(Self { config, runtime })
    }
}
