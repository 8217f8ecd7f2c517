use std::sync::Arc;

use mongodb::bson::{doc, Bson, Document};

use super::authorize::authorize_candidate;
use super::error::ServiceError;
use super::hooks::Hooks;
use super::lifecycle::{LifecyclePolicy, LifecycleService};
use crate::coerce::{authorize_sort, coerce_leaf, coerce_query};
use crate::database::{DocumentStore, ReadOptions, TransactionOptions};
use crate::schema::{BsonKind, ControllerOperation, FieldError, Schema, ID_FIELD, SOFT_DELETE_FIELD, VERSION_FIELD};

/// Client-facing operations over one collection.
///
/// Every candidate and query is authorized against the schema's controller flags
/// before it reaches the lifecycle, which runs in CRUD policy.
pub struct ControllerService<S: DocumentStore> {
    lifecycle: LifecycleService<S>,
}

impl<S: DocumentStore> ControllerService<S> {
    pub fn new(schema: Arc<Schema>, store: Arc<S>, transaction: TransactionOptions) -> Self {
        Self {
            lifecycle: LifecycleService::new(schema, store, transaction, LifecyclePolicy::crud()),
        }
    }

    pub fn schema(&self) -> &Schema {
        self.lifecycle.schema()
    }

    pub fn lifecycle(&self) -> &LifecycleService<S> {
        &self.lifecycle
    }

    pub async fn read(
        &self,
        query: Document,
        options: ReadOptions,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Vec<Document>, ServiceError> {
        let query = coerce_query(self.schema(), query, Some(ControllerOperation::Read))?;
        if let Some(sort) = &options.sort {
            authorize_sort(self.schema(), sort, Some(ControllerOperation::Read))?;
        }
        self.lifecycle.read(query, options, session, hooks).await
    }

    pub async fn read_one_by_id(
        &self,
        id: Bson,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let query = coerce_query(self.schema(), doc! { ID_FIELD: id }, Some(ControllerOperation::ReadOneById))?;
        let id = query.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        self.lifecycle
            .read_one_by_id(id.clone(), session, hooks)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Document {} not found", id)))
    }

    pub async fn create_one(
        &self,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        reject_managed_fields(&candidate, ControllerOperation::CreateOne)?;
        authorize_candidate(self.schema(), &candidate, ControllerOperation::CreateOne, &hooks.skip)?;
        self.lifecycle.create_one(candidate, session, hooks).await
    }

    pub async fn update_one_by_id_and_version(
        &self,
        id: Bson,
        version: Bson,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        if candidate.is_empty() {
            return Err(ServiceError::bad_request("update must contain at least one field"));
        }
        let version = coerce_version(version)?;
        reject_managed_fields(&candidate, ControllerOperation::UpdateOneByIdAndVersion)?;
        authorize_candidate(
            self.schema(),
            &candidate,
            ControllerOperation::UpdateOneByIdAndVersion,
            &hooks.skip,
        )?;
        self.lifecycle
            .update_one_by_id_and_version(id, version, candidate, session, hooks)
            .await
    }

    pub async fn replace_one_by_id_and_version(
        &self,
        id: Bson,
        version: Bson,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let version = coerce_version(version)?;
        reject_managed_fields(&candidate, ControllerOperation::ReplaceOneByIdAndVersion)?;
        authorize_candidate(
            self.schema(),
            &candidate,
            ControllerOperation::ReplaceOneByIdAndVersion,
            &hooks.skip,
        )?;
        self.lifecycle
            .replace_one_by_id_and_version(id, version, candidate, session, hooks)
            .await
    }

    pub async fn soft_delete_one_by_id_and_version(
        &self,
        id: Bson,
        version: Bson,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let version = coerce_version(version)?;
        self.lifecycle
            .soft_delete_one_by_id_and_version(id, version, session, hooks)
            .await
    }

    pub async fn delete_one_by_id_and_version(
        &self,
        id: Bson,
        version: Bson,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let version = coerce_version(version)?;
        self.lifecycle
            .delete_one_by_id_and_version(id, version, session, hooks)
            .await
    }
}

/// Fields the lifecycle stamps itself; a client value would be overwritten or rejected later
fn reject_managed_fields(candidate: &Document, operation: ControllerOperation) -> Result<(), FieldError> {
    let managed = match operation {
        ControllerOperation::CreateOne => [VERSION_FIELD, SOFT_DELETE_FIELD],
        _ => [ID_FIELD, VERSION_FIELD],
    };
    match managed.into_iter().find(|field| candidate.contains_key(*field)) {
        Some(field) => Err(FieldError::NotAllowed {
            path: field.to_string(),
            operation,
        }),
        None => Ok(()),
    }
}

/// Versions arrive from URLs as strings; accept anything that coerces to a non-negative long
pub fn coerce_version(version: Bson) -> Result<i64, FieldError> {
    match coerce_leaf(VERSION_FIELD, BsonKind::Long, version)? {
        Bson::Int64(v) if v >= 0 => Ok(v),
        other => Err(FieldError::invalid(
            VERSION_FIELD,
            format!("expected a non-negative version, found {}", other),
        )),
    }
}
