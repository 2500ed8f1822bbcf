pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod router;
pub mod service;
pub mod session;
pub mod storage;

use crate::auth::StructuralKeyValidator;
use crate::errors::GatewayError;
use crate::service::GatewayService;
use crate::storage::NoopSink;
use shared::http::{ServerOptions, run_http_service};
use std::sync::Arc;

/// Serve the gateway until SIGINT/SIGTERM, then drain and log the
/// process-lifetime request/error totals.
pub async fn run(config: config::Config) -> Result<(), GatewayError> {
    let service = GatewayService::new(
        &config,
        Arc::new(StructuralKeyValidator),
        Arc::new(NoopSink),
    );
    let summary = service.clone();

    let options = ServerOptions {
        idle_timeout: config.idle_timeout(),
        shutdown_grace: config.shutdown_grace(),
        enable_http2: config.enable_http2,
    };

    run_http_service(
        &config.listener.host,
        config.listener.port,
        options,
        service,
    )
    .await?;

    let counts = summary.counter_snapshot();
    tracing::info!(
        total_requests = counts.total_requests,
        total_errors = counts.total_errors,
        "HTTP server stopped"
    );

    Ok(())
}
