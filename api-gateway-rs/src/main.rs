// api-gateway-rs/src/main.rs
// HTTP entry point for the prompt loop and self-healing endpoints.
// Default port 8282; override with API_GATEWAY_SERVICE_PORT or
// API_GATEWAY_SERVICE_ADDR.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use api_gateway::ApiGateway;
use config_rs::LoopConfig;
use prompt_loop::StaticCatalog;
use shared_types::{AuditLog, FileAuditLog, InMemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config_rs::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = LoopConfig::from_env();
    tracing::info!(
        auto_apply_threshold = cfg.auto_apply_threshold,
        min_fields_before_booking = cfg.min_fields_before_booking,
        call_timeout_ms = cfg.call_timeout.as_millis() as u64,
        "loop configuration loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    if let Ok(seed_path) = std::env::var("AGENT_SEED_PATH") {
        let loaded = store.load_seed_file(Path::new(&seed_path)).await?;
        tracing::info!(path = %seed_path, records = loaded, "seed data loaded");
    }

    let audit_log = FileAuditLog::new_default()?;
    tracing::info!(path = %audit_log.path().display(), "audit trail");
    let audit: Arc<dyn AuditLog> = Arc::new(audit_log);

    let catalog = StaticCatalog::from_env()?;
    tracing::info!(niches = ?catalog.niches(), "prompt catalog ready");

    let gateway = Arc::new(ApiGateway::from_store(
        store,
        Some(audit),
        Arc::new(catalog),
        cfg,
    ));

    let addr = config_rs::get_bind_address("API_GATEWAY", 8282);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API Gateway listening on {}", addr);

    axum::serve(listener, gateway.create_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
