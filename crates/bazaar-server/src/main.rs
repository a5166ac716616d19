use std::env;
use std::sync::Arc;

use bazaar_seckill::InMemoryOrderRepository;
use bazaar_server::Services;
use bazaar_server::config::loader::{config_path, load_config};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => eprintln!("Warning: .env not loaded: {e}"),
        _ => {}
    }

    bazaar_server::observability::init_tracing();

    let path = config_path(env::args().skip(1), env::var("BAZAAR_CONFIG").ok());
    let cfg = match load_config(Some(&path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %path, "Configuration loaded");
    bazaar_server::observability::apply_logging_level(&cfg.logging.level);
    bazaar_server::metrics::init_metrics(&cfg.metrics);

    // Orders are persisted by an external relational store in production;
    // the in-process repository stands in for it here.
    let repository = Arc::new(InMemoryOrderRepository::new());
    let services = match Services::connect(&cfg, repository).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Service initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let shutdown = CancellationToken::new();
    let consumer = match services.spawn_consumer(shutdown.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Order queue consumer failed to start: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "Order queue consumer task failed");
    }
    tracing::info!("Bazaar stopped");
}
