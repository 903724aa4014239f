use crate::services::engine::Engine;
use crate::web::AppState;
use crate::{web, Config, Database};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let db = Database::open_with_pool_size(&config.database.path, config.database.pool_size)?;
    db.migrate()?;

    let engine = Engine::start(db.clone(), &config.delivery)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        db,
        engine.publisher().clone(),
        engine.dispatcher(),
    ));

    tracing::info!("Starting server at http://{}", addr);
    web::serve(state, &addr, shutdown_signal()).await?;

    tracing::info!("Shutting down, waiting for in-flight deliveries");
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
