use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::app;
use crate::config::config;
use crate::database::MongoStore;

pub async fn handle(port: Option<u16>, schemas: Option<PathBuf>) -> anyhow::Result<()> {
    let config = config();
    info!("Starting docstack in {:?} mode", config.environment);

    let store = MongoStore::connect(&config.database)
        .await
        .context("failed to configure MongoDB client")?;
    store
        .ping(&config.database.database)
        .await
        .with_context(|| format!("MongoDB at {} is unreachable", config.database.uri))?;
    let store = Arc::new(store);

    let dir = schemas.unwrap_or_else(|| config.schema.dir.clone());
    let registered = app::load_schemas(store.as_ref(), &dir, config)
        .await
        .with_context(|| format!("failed to load schemas from {}", dir.display()))?;
    info!("Registered {} schema(s) from {}", registered.len(), dir.display());

    let router = app::app(store, &registered, config);

    let port = port.unwrap_or(config.api.port);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("docstack listening on http://{}", bind_addr);
    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
