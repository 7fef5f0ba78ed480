//! oxihub HTTP server binary.

use oxihub_common::config::AppConfig;
use oxihub_common::tracing::setup_tracing;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    setup_tracing(json_logs);

    let config = match AppConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        storage = %config.storage.backend,
        "starting oxihub"
    );

    match oxihub_server::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}
