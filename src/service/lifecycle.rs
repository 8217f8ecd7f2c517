use std::sync::Arc;

use mongodb::bson::{doc, Bson, DateTime, Document};
use tracing::{debug, info};

use super::error::{ServiceError, VersionConflict};
use super::hooks::{HookContext, Hooks, LifecycleOperation};
use crate::coerce::{coerce_candidate, coerce_query, coerce_value};
use crate::database::{
    Collection, DocumentStore, ReadOptions, ReturnDocument, StoreSession, TransactionOptions,
};
use crate::schema::{Schema, CREATED_AT_FIELD, ID_FIELD, SOFT_DELETE_FIELD, UPDATED_AT_FIELD, VERSION_FIELD};
use crate::session::SessionManager;

/// Behaviour switches for a lifecycle service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Zero matches on a read-one or write is an error rather than `None`
    pub enforce_existence: bool,
    /// More than one match on a write is an error rather than taking the first
    pub reject_multiple: bool,
    /// Stamp `createdAt` / `updatedAt` (also requires schema timestamps)
    pub timestamps: bool,
}

impl LifecyclePolicy {
    /// Policy used behind controllers: singular, existing documents only
    pub fn crud() -> Self {
        Self {
            enforce_existence: true,
            reject_multiple: true,
            timestamps: true,
        }
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            enforce_existence: false,
            reject_multiple: false,
            timestamps: true,
        }
    }
}

#[derive(Debug, Clone)]
enum WriteKind {
    Update(Document),
    Replace(Document),
    Delete,
}

impl WriteKind {
    fn operation(&self, soft_delete: bool) -> LifecycleOperation {
        match self {
            WriteKind::Update(_) if soft_delete => LifecycleOperation::SoftDelete,
            WriteKind::Update(_) => LifecycleOperation::Update,
            WriteKind::Replace(_) => LifecycleOperation::Replace,
            WriteKind::Delete => LifecycleOperation::Delete,
        }
    }
}

/// Versioned CRUD and soft-delete over one schema-bound collection.
///
/// Every mutation is a compare-and-swap on `version`: the target is read inside
/// the transaction, checked, then written by `{_id, version}` so a concurrent
/// writer cannot be overwritten silently.
pub struct LifecycleService<S: DocumentStore> {
    schema: Arc<Schema>,
    collection: Collection<S>,
    sessions: SessionManager<S>,
    policy: LifecyclePolicy,
}

impl<S: DocumentStore> LifecycleService<S> {
    pub fn new(schema: Arc<Schema>, store: Arc<S>, transaction: TransactionOptions, policy: LifecyclePolicy) -> Self {
        let collection = schema.collection(Arc::clone(&store));
        Self {
            schema,
            collection,
            sessions: SessionManager::new(store, transaction),
            policy,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }

    pub fn collection(&self) -> &Collection<S> {
        &self.collection
    }

    fn timestamps(&self) -> bool {
        self.policy.timestamps && self.schema.options().timestamps
    }

    fn context(
        &self,
        operation: LifecycleOperation,
        query: Option<&Document>,
        candidate: Option<&Document>,
        session: Option<&S::Session>,
    ) -> HookContext {
        HookContext {
            operation,
            namespace: self.schema.namespace().clone(),
            query: query.cloned(),
            candidate: candidate.cloned(),
            session_id: session.map(|s| s.id()),
        }
    }

    /// Coerce, hide soft-deleted documents, then let hooks rewrite
    async fn build_query(
        &self,
        operation: LifecycleOperation,
        query: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let query = coerce_query(&self.schema, query, None)?;
        let query = with_soft_delete_filter(query)?;
        let ctx = self.context(operation, Some(&query), None, session);
        hooks.query_built(&ctx, query).await
    }

    fn coerce_id(&self, id: Bson) -> Result<Bson, ServiceError> {
        let field = self
            .schema
            .field(ID_FIELD)
            .ok_or_else(|| ServiceError::invalid_argument("schema has no _id field"))?;
        Ok(coerce_value(field, ID_FIELD, id)?)
    }

    pub async fn count(
        &self,
        query: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<u64, ServiceError> {
        let query = self.build_query(LifecycleOperation::Count, query, session, hooks).await?;
        self.sessions
            .run(session, hooks, false, |active| {
                let query = query.clone();
                async move { Ok::<_, ServiceError>(self.collection.count(query, active.as_ref()).await?) }
            })
            .await
    }

    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Vec<Document>, ServiceError> {
        let mut stages = Vec::with_capacity(pipeline.len() + 1);
        stages.push(doc! { "$match": { SOFT_DELETE_FIELD: false } });
        stages.extend(pipeline);

        self.sessions
            .run(session, hooks, false, |active| {
                let stages = stages.clone();
                async move {
                    let ctx = self.context(LifecycleOperation::Aggregate, None, None, active.as_ref());
                    hooks.before_persist(&ctx).await?;
                    let documents = self.collection.aggregate(stages, active.as_ref()).await?;
                    hooks.after_persist(&ctx, documents).await
                }
            })
            .await
    }

    pub async fn read(
        &self,
        query: Document,
        options: ReadOptions,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Vec<Document>, ServiceError> {
        let query = self.build_query(LifecycleOperation::Read, query, session, hooks).await?;
        self.sessions
            .run(session, hooks, false, |active| {
                let query = query.clone();
                let options = options.clone();
                async move {
                    let ctx = self.context(LifecycleOperation::Read, Some(&query), None, active.as_ref());
                    hooks.before_persist(&ctx).await?;
                    let documents = self.collection.read(query, options, active.as_ref()).await?;
                    debug!("read {} returned {}", self.schema.namespace(), documents.len());
                    hooks.after_persist(&ctx, documents).await
                }
            })
            .await
    }

    pub async fn read_one(
        &self,
        query: Document,
        options: ReadOptions,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let query = self.build_query(LifecycleOperation::ReadOne, query, session, hooks).await?;
        let found = self
            .sessions
            .run(session, hooks, false, |active| {
                let query = query.clone();
                let options = options.clone();
                async move {
                    let ctx = self.context(LifecycleOperation::ReadOne, Some(&query), None, active.as_ref());
                    hooks.before_persist(&ctx).await?;
                    let found = self.collection.read_one(query, options, active.as_ref()).await?;
                    let documents = hooks.after_persist(&ctx, found.into_iter().collect()).await?;
                    Ok::<_, ServiceError>(documents.into_iter().next())
                }
            })
            .await?;

        if found.is_none() && self.policy.enforce_existence {
            return Err(ServiceError::NotFound(format!("No document in {} matches the query", self.schema.namespace())));
        }
        Ok(found)
    }

    pub async fn read_one_by_id(
        &self,
        id: Bson,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let id = self.coerce_id(id)?;
        self.read_one(doc! { ID_FIELD: id }, ReadOptions::default(), session, hooks).await
    }

    pub async fn create_one(
        &self,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let candidate = coerce_candidate(&self.schema, candidate, &hooks.skip)?;
        let ctx = self.context(LifecycleOperation::Create, None, Some(&candidate), session);
        let mut document = hooks.candidate_built(&ctx, candidate).await?;

        document.insert(VERSION_FIELD, 0_i64);
        document.insert(SOFT_DELETE_FIELD, false);
        if self.timestamps() {
            let now = DateTime::now();
            document.insert(CREATED_AT_FIELD, now);
            document.insert(UPDATED_AT_FIELD, now);
        }

        let created = self
            .sessions
            .run(session, hooks, false, |active| {
                let document = document.clone();
                async move {
                    let ctx = self.context(LifecycleOperation::Create, None, Some(&document), active.as_ref());
                    hooks.before_persist(&ctx).await?;
                    let created = self.collection.create_one(document, active.as_ref()).await?;
                    let documents = hooks.after_persist(&ctx, vec![created]).await?;
                    documents
                        .into_iter()
                        .next()
                        .ok_or_else(|| ServiceError::invalid_argument("onAfterPersist dropped the created document"))
                }
            })
            .await?;

        info!(
            "Created document {} in {}",
            created.get(ID_FIELD).map(ToString::to_string).unwrap_or_default(),
            self.schema.namespace()
        );
        Ok(created)
    }

    pub async fn update_one(
        &self,
        query: Document,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let kind = self.update_kind(candidate, session, hooks, false).await?;
        self.write_one(kind, query, None, false, session, hooks).await
    }

    pub async fn update_one_by_id_and_version(
        &self,
        id: Bson,
        version: i64,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let id = self.coerce_id(id)?;
        let kind = self.update_kind(candidate, session, hooks, false).await?;
        self.write_by_id(kind, id, version, false, session, hooks).await
    }

    pub async fn replace_one(
        &self,
        query: Document,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let kind = self.replace_kind(candidate, session, hooks).await?;
        self.write_one(kind, query, None, false, session, hooks).await
    }

    pub async fn replace_one_by_id_and_version(
        &self,
        id: Bson,
        version: i64,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let id = self.coerce_id(id)?;
        let kind = self.replace_kind(candidate, session, hooks).await?;
        self.write_by_id(kind, id, version, false, session, hooks).await
    }

    pub async fn soft_delete_one(
        &self,
        query: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let kind = self.update_kind(doc! { SOFT_DELETE_FIELD: true }, session, hooks, true).await?;
        self.write_one(kind, query, None, true, session, hooks).await
    }

    pub async fn soft_delete_one_by_id_and_version(
        &self,
        id: Bson,
        version: i64,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let id = self.coerce_id(id)?;
        let kind = self.update_kind(doc! { SOFT_DELETE_FIELD: true }, session, hooks, true).await?;
        self.write_by_id(kind, id, version, true, session, hooks).await
    }

    /// Physically remove the single matching document
    pub async fn delete_one(
        &self,
        query: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        self.write_one(WriteKind::Delete, query, None, false, session, hooks).await
    }

    pub async fn delete_one_by_id_and_version(
        &self,
        id: Bson,
        version: i64,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        let id = self.coerce_id(id)?;
        self.write_by_id(WriteKind::Delete, id, version, false, session, hooks).await
    }

    async fn update_kind(
        &self,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
        soft_delete: bool,
    ) -> Result<WriteKind, ServiceError> {
        reject_identity_fields(&candidate)?;
        let candidate = coerce_candidate(&self.schema, candidate, &hooks.skip)?;
        let operation = if soft_delete {
            LifecycleOperation::SoftDelete
        } else {
            LifecycleOperation::Update
        };
        let ctx = self.context(operation, None, Some(&candidate), session);
        let candidate = hooks.candidate_built(&ctx, candidate).await?;
        Ok(WriteKind::Update(candidate))
    }

    async fn replace_kind(
        &self,
        candidate: Document,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<WriteKind, ServiceError> {
        reject_identity_fields(&candidate)?;
        let candidate = coerce_candidate(&self.schema, candidate, &hooks.skip)?;
        let ctx = self.context(LifecycleOperation::Replace, None, Some(&candidate), session);
        let candidate = hooks.candidate_built(&ctx, candidate).await?;
        Ok(WriteKind::Replace(candidate))
    }

    async fn write_by_id(
        &self,
        kind: WriteKind,
        id: Bson,
        version: i64,
        soft_delete: bool,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Document, ServiceError> {
        debug!(
            "{:?} {} id={} version={}",
            kind.operation(soft_delete),
            self.schema.namespace(),
            id,
            version
        );
        let query = doc! { ID_FIELD: id.clone() };
        self.write_one(kind, query, Some(version), soft_delete, session, hooks)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Document {} not found", id)))
    }

    /// Read-check-write of a single document inside a transaction
    async fn write_one(
        &self,
        kind: WriteKind,
        query: Document,
        expected_version: Option<i64>,
        soft_delete: bool,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let operation = kind.operation(soft_delete);
        let query = self.build_query(operation, query, session, hooks).await?;

        self.sessions
            .run(session, hooks, true, |active| {
                let kind = kind.clone();
                let query = query.clone();
                async move {
                    self.write_in_session(kind, operation, query, expected_version, active.as_ref(), hooks)
                        .await
                }
            })
            .await
    }

    async fn write_in_session(
        &self,
        kind: WriteKind,
        operation: LifecycleOperation,
        query: Document,
        expected_version: Option<i64>,
        session: Option<&S::Session>,
        hooks: &Hooks,
    ) -> Result<Option<Document>, ServiceError> {
        let namespace = self.schema.namespace();
        let mut matches = self.collection.read(query, ReadOptions::limit(2), session).await?;

        if matches.is_empty() {
            if self.policy.enforce_existence || expected_version.is_some() {
                return Err(ServiceError::NotFound(format!("No document in {} matches the query", namespace)));
            }
            return Ok(None);
        }
        if matches.len() > 1 && self.policy.reject_multiple {
            return Err(ServiceError::MoreThanOneFound(format!(
                "More than one document in {} matches the query",
                namespace
            )));
        }
        let matched = matches.swap_remove(0);

        let current_version = document_version(&matched)?;
        if let Some(expected) = expected_version {
            VersionConflict::check(current_version, expected)?;
        }
        let id = matched
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| ServiceError::invalid_argument("matched document has no _id"))?;
        let stored_version = matched.get(VERSION_FIELD).cloned().unwrap_or(Bson::Int64(current_version));
        let key = doc! { ID_FIELD: id.clone(), VERSION_FIELD: stored_version };

        let next_version = current_version + 1;
        let now = DateTime::now();
        let timestamps = self.timestamps();

        let write = match &kind {
            WriteKind::Update(fields) => {
                let mut set = fields.clone();
                set.insert(VERSION_FIELD, next_version);
                if timestamps {
                    set.insert(UPDATED_AT_FIELD, now);
                }
                Some(set)
            }
            WriteKind::Replace(body) => {
                let mut replacement = body.clone();
                replacement.insert(VERSION_FIELD, next_version);
                replacement.insert(SOFT_DELETE_FIELD, false);
                if timestamps {
                    if let Some(created) = matched.get(CREATED_AT_FIELD) {
                        replacement.insert(CREATED_AT_FIELD, created.clone());
                    }
                    replacement.insert(UPDATED_AT_FIELD, now);
                }
                Some(replacement)
            }
            WriteKind::Delete => None,
        };

        let ctx = self.context(operation, Some(&key), write.as_ref(), session);
        hooks.before_persist(&ctx).await?;

        let result = match (kind, write) {
            (WriteKind::Update(_), Some(set)) => {
                self.collection
                    .find_one_and_update(key, doc! { "$set": set }, ReturnDocument::After, session)
                    .await?
            }
            (WriteKind::Replace(_), Some(replacement)) => {
                self.collection
                    .find_one_and_replace(key, replacement, ReturnDocument::After, session)
                    .await?
            }
            _ => self.collection.find_one_and_delete(key, session).await?,
        };

        let Some(result) = result else {
            // The document changed between our read and our write
            let latest = self.collection.read_one(doc! { ID_FIELD: id.clone() }, ReadOptions::default(), session).await?;
            return Err(match latest {
                Some(latest) => VersionConflict::Modified {
                    document_version: document_version(&latest)?,
                    supplied_version: expected_version.unwrap_or(current_version),
                }
                .into(),
                None => ServiceError::NotFound(format!("Document {} not found", id)),
            });
        };

        if let (Some(expected), LifecycleOperation::Update | LifecycleOperation::Replace | LifecycleOperation::SoftDelete) =
            (expected_version, operation)
        {
            VersionConflict::check_result(document_version(&result)?, expected)?;
        }

        info!("{:?} {} in {} at version {}", operation, id, namespace, current_version);
        let documents = hooks.after_persist(&ctx, vec![result]).await?;
        Ok(documents.into_iter().next())
    }
}

/// Read the `version` of a stored document
pub fn document_version(document: &Document) -> Result<i64, ServiceError> {
    match document.get(VERSION_FIELD) {
        Some(Bson::Int64(v)) if *v >= 0 => Ok(*v),
        Some(Bson::Int32(v)) if *v >= 0 => Ok(*v as i64),
        _ => Err(ServiceError::invalid_argument("document has no valid version")),
    }
}

/// Add `isSoftDeleted: false` unless the query already constrains it.
/// Works on plain filters and on `{ $query: .. }` wrappers.
pub fn with_soft_delete_filter(mut query: Document) -> Result<Document, ServiceError> {
    if query.contains_key("$query") {
        match query.get_mut("$query") {
            Some(Bson::Document(inner)) => {
                if !inner.contains_key(SOFT_DELETE_FIELD) {
                    inner.insert(SOFT_DELETE_FIELD, false);
                }
            }
            _ => return Err(ServiceError::invalid_argument("$query must be a document")),
        }
    } else if !query.contains_key(SOFT_DELETE_FIELD) {
        query.insert(SOFT_DELETE_FIELD, false);
    }
    Ok(query)
}

fn reject_identity_fields(candidate: &Document) -> Result<(), ServiceError> {
    for field in [ID_FIELD, VERSION_FIELD] {
        if candidate.contains_key(field) {
            return Err(ServiceError::invalid_argument(format!("'{}' is managed by the lifecycle", field)));
        }
    }
    Ok(())
}
