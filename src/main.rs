use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tracing::{error, info};

mod api;
mod config;
mod models;
mod services;
mod storage;

use api::handlers::partition::AppState;
use config::Config;
use services::{
    ConverterClient, MergeEngine, RetryPolicy, RuleSet, ValidatorClient, WorkCatalog, Worker,
};
use storage::{LedgerStore, SlotStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting server on {}", config.server_address());

    // Stores and services
    let slots = Arc::new(SlotStore::new(&config.corpus.data_dir));
    let ledger = Arc::new(LedgerStore::new(&config.corpus.data_dir));
    let catalog = Arc::new(WorkCatalog::new(
        &config.corpus.master_path,
        &config.corpus.data_dir,
        slots.clone(),
        ledger.clone(),
    ));
    let merge = Arc::new(MergeEngine::new(slots.clone(), ledger.clone()));

    let rules = Arc::new(RuleSet::load(Path::new(&config.corpus.rules_path)).map_err(|e| {
        error!("Failed to load rewrite rules: {}", e);
        e
    })?);
    let converter = Arc::new(ConverterClient::new(&config));
    let validator = Arc::new(ValidatorClient::new(&config)?);
    let worker = Arc::new(Worker::new(
        catalog.clone(),
        slots.clone(),
        converter,
        validator,
        rules,
        RetryPolicy::from(&config.retry),
    ));

    let state = AppState {
        catalog,
        slots,
        ledger,
        merge,
        worker,
        config: config.clone(),
    };

    // Create router with state
    let app: Router = api::routes::create_router_with_state(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
