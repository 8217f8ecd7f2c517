use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use mongodb::bson::{Bson, Document};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{document_to_api_value, documents_to_api_values, ApiResponse, ApiResult};
use crate::coerce::candidate_from_json;
use crate::database::{DocumentStore, ReadOptions};
use crate::error::ApiError;
use crate::filter::FilterOrder;
use crate::service::{ControllerService, Hooks, ServiceError};

/// Shared state of one collection's routes
pub struct CrudState<S: DocumentStore> {
    pub service: Arc<ControllerService<S>>,
    pub hooks: Hooks,
    pub max_read_limit: Option<i64>,
}

impl<S: DocumentStore> Clone for CrudState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            hooks: self.hooks.clone(),
            max_read_limit: self.max_read_limit,
        }
    }
}

/// REST routes for one collection, meant to be nested under `/api/<collection>`
pub fn routes<S: DocumentStore>(service: Arc<ControllerService<S>>, hooks: Hooks, max_read_limit: Option<i64>) -> Router {
    let state = CrudState {
        service,
        hooks,
        max_read_limit,
    };

    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/search", post(search::<S>))
        .route("/:id", get(get_one::<S>))
        .route(
            "/:id/:version",
            axum::routing::patch(update::<S>).put(replace::<S>).delete(soft_delete::<S>),
        )
        .route("/:id/:version/purge", delete(purge::<S>))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// GET / - equality query from the query string, plus limit/skip/sort
pub async fn list<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    Query(mut params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Value>> {
    let limit = params
        .remove("limit")
        .map(|v| v.parse::<i64>().map_err(|_| ApiError::bad_request(format!("Invalid limit '{}'", v))))
        .transpose()?;
    let skip = params
        .remove("skip")
        .map(|v| v.parse::<u64>().map_err(|_| ApiError::bad_request(format!("Invalid skip '{}'", v))))
        .transpose()?;
    let sort = params
        .remove("sort")
        .map(|v| FilterOrder::parse_string(&v).map_err(|e| ApiError::bad_request(e.to_string())))
        .transpose()?;

    let mut query = Document::new();
    for (key, value) in params {
        query.insert(key, Bson::String(value));
    }

    let options = read_options(sort, limit, skip, state.max_read_limit)?;
    let documents = state.service.read(query, options, None, &state.hooks).await?;
    Ok(ApiResponse::success(documents_to_api_values(&documents)))
}

/// POST /search - JSON query body
pub async fn search<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    payload: Result<Json<SearchBody>, JsonRejection>,
) -> ApiResult<Vec<Value>> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;

    let query = match body.query {
        Some(value) => json_document(value)?,
        None => Document::new(),
    };
    let sort = match body.sort {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(FilterOrder::parse_string(&s).map_err(|e| ApiError::bad_request(e.to_string()))?),
        Some(value) => {
            let sort = json_document(value)?;
            Some(FilterOrder::normalize(&sort).map_err(|e| ApiError::bad_request(e.to_string()))?)
        }
    };

    let options = read_options(sort, body.limit, body.skip, state.max_read_limit)?;
    let documents = state.service.read(query, options, None, &state.hooks).await?;
    Ok(ApiResponse::success(documents_to_api_values(&documents)))
}

/// GET /:id
pub async fn get_one<S: DocumentStore>(State(state): State<CrudState<S>>, Path(id): Path<String>) -> ApiResult<Value> {
    let document = state
        .service
        .read_one_by_id(Bson::String(id), None, &state.hooks)
        .await?;
    Ok(ApiResponse::success(document_to_api_value(&document)))
}

/// POST / - create
pub async fn create<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let candidate = json_document(body)?;
    let document = state.service.create_one(candidate, None, &state.hooks).await?;
    Ok(ApiResponse::created(document_to_api_value(&document)))
}

/// PATCH /:id/:version - partial update
pub async fn update<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    Path((id, version)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let candidate = json_document(body)?;
    let document = state
        .service
        .update_one_by_id_and_version(Bson::String(id), Bson::String(version), candidate, None, &state.hooks)
        .await?;
    Ok(ApiResponse::success(document_to_api_value(&document)))
}

/// PUT /:id/:version - full replacement
pub async fn replace<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    Path((id, version)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    let candidate = json_document(body)?;
    let document = state
        .service
        .replace_one_by_id_and_version(Bson::String(id), Bson::String(version), candidate, None, &state.hooks)
        .await?;
    Ok(ApiResponse::success(document_to_api_value(&document)))
}

/// DELETE /:id/:version - soft delete
pub async fn soft_delete<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    Path((id, version)): Path<(String, String)>,
) -> ApiResult<Value> {
    let document = state
        .service
        .soft_delete_one_by_id_and_version(Bson::String(id), Bson::String(version), None, &state.hooks)
        .await?;
    Ok(ApiResponse::success(document_to_api_value(&document)))
}

/// DELETE /:id/:version/purge - physical delete
pub async fn purge<S: DocumentStore>(
    State(state): State<CrudState<S>>,
    Path((id, version)): Path<(String, String)>,
) -> ApiResult<Value> {
    let document = state
        .service
        .delete_one_by_id_and_version(Bson::String(id), Bson::String(version), None, &state.hooks)
        .await?;
    Ok(ApiResponse::success(document_to_api_value(&document)))
}

fn json_document(value: Value) -> Result<Document, ApiError> {
    candidate_from_json(value).map_err(|e| ApiError::from(ServiceError::from(e)))
}

fn read_options(
    sort: Option<Document>,
    limit: Option<i64>,
    skip: Option<u64>,
    max_read_limit: Option<i64>,
) -> Result<ReadOptions, ApiError> {
    if matches!(limit, Some(n) if n < 0) {
        return Err(ApiError::bad_request("limit must not be negative"));
    }
    let limit = match (limit, max_read_limit) {
        (Some(n), Some(max)) => Some(n.min(max)),
        (None, Some(max)) => Some(max),
        (limit, None) => limit,
    };
    Ok(ReadOptions {
        sort: sort.filter(|s| !s.is_empty()),
        limit,
        skip,
        projection: None,
    })
}
