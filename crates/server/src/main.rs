//! dualvision REST API server

mod config;
mod error;
mod routes;

use anyhow::{Context, Result};
use config::ServerConfig;
use llm_bridge::{ServiceConfig, VisionService};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        tracing::error!("{:#}", err);
        return Err(err);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let service_config = ServiceConfig::from_env().context("Invalid service configuration")?;
    let server_config = ServerConfig::from_env().context("Invalid server configuration")?;

    let service = VisionService::from_config(service_config).context("Failed to create HTTP client")?;
    tracing::info!(
        "Querying {} models, pixel ceiling {}",
        service.models().len(),
        service.pixel_ceiling()
    );

    let app = routes::create_app(Arc::new(service), &server_config);

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.bind_addr))?;
    tracing::info!("Server listening on {}", server_config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
