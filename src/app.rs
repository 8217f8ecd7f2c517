use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;
use crate::database::DocumentStore;
use crate::handlers;
use crate::schema::{Languages, Schema, SchemaError, SchemaFile, SchemaOptions};
use crate::service::{ControllerService, Hooks};

/// Create every schema in `files`, enforcing validators where configured
pub async fn register_schemas<S: DocumentStore>(
    store: &S,
    files: Vec<SchemaFile>,
    config: &AppConfig,
) -> Result<Vec<Arc<Schema>>, SchemaError> {
    let languages = Languages::new(config.languages.iter().cloned())?;
    let mut seen = BTreeSet::new();
    let mut schemas = Vec::with_capacity(files.len());

    for file in files {
        if !seen.insert(file.collection.clone()) {
            return Err(SchemaError::InvalidNamespace(format!(
                "collection '{}' is registered twice",
                file.collection
            )));
        }
        let database = file.database.clone().unwrap_or_else(|| config.database.database.clone());
        let options = SchemaOptions {
            enforce: file.enforce && config.schema.enforce,
            timestamps: file.timestamps && config.schema.timestamps,
        };
        let schema = Schema::create(store, &database, &file.collection, file.definition, &languages, options).await?;
        info!("Registered schema {} (checksum {})", schema.namespace(), schema.checksum());
        schemas.push(Arc::new(schema));
    }
    Ok(schemas)
}

/// Load schema files from a directory and register them
pub async fn load_schemas<S: DocumentStore>(
    store: &S,
    dir: &Path,
    config: &AppConfig,
) -> Result<Vec<Arc<Schema>>, SchemaError> {
    let files = SchemaFile::load_dir(dir)?
        .into_iter()
        .map(|(path, file)| {
            info!("Loaded schema file {}", path.display());
            file
        })
        .collect();
    register_schemas(store, files, config).await
}

/// Router with one CRUD mount per schema under `/api/<collection>`
pub fn app<S: DocumentStore>(store: Arc<S>, schemas: &[Arc<Schema>], config: &AppConfig) -> Router {
    let mut hooks = Hooks::new();
    if let Some(limit) = config.transaction.hook_timeout() {
        hooks = hooks.with_timeout(limit);
    }

    let collections: Vec<String> = schemas.iter().map(|s| s.namespace().collection.clone()).collect();
    let mut router = Router::new()
        .route("/", get(root))
        .route(
            "/health",
            get(move || {
                let collections = collections.clone();
                async move { health(collections) }
            }),
        );

    for schema in schemas {
        let service = Arc::new(ControllerService::new(
            Arc::clone(schema),
            Arc::clone(&store),
            config.transaction.options(),
        ));
        let path = format!("/api/{}", schema.namespace().collection);
        info!("Mounting {} at {}", schema.namespace(), path);
        router = router.nest(&path, handlers::routes(service, hooks.clone(), config.api.max_read_limit));
    }

    router = router.layer(DefaultBodyLimit::max(config.api.max_request_size_bytes));
    if config.api.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    if config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "docstack",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Schema-validated, versioned document CRUD",
            "endpoints": {
                "health": "/health",
                "collections": "/api/:collection[/:id[/:version]]",
                "search": "/api/:collection/search",
            }
        }
    }))
}

fn health(collections: Vec<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": chrono::Utc::now(),
            "collections": collections,
        }
    }))
}
