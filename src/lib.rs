pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use services::clamd::{ClamdClient, Scanner};
use services::interceptor::{RequestInterceptor, ResponseInterceptor};

/// Shared application state passed to all Axum handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub clamd: ClamdClient,
    pub requests: RequestInterceptor,
    pub responses: ResponseInterceptor,
}

impl AppState {
    /// State scanning through the configured clamd daemon.
    pub fn new(config: config::AppConfig) -> Self {
        let clamd = ClamdClient::from_config(&config.scan);
        let scanner: Arc<dyn Scanner> = Arc::new(clamd.clone());
        Self::with_scanner(config, clamd, scanner)
    }

    /// State scanning through `scanner`; `clamd` still backs the readiness probe.
    pub fn with_scanner(
        config: config::AppConfig,
        clamd: ClamdClient,
        scanner: Arc<dyn Scanner>,
    ) -> Self {
        Self {
            requests: RequestInterceptor::new(&config.scan, scanner.clone()),
            responses: ResponseInterceptor::new(&config.scan, scanner),
            clamd,
            config,
        }
    }
}
