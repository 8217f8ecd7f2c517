use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use mongodb::bson::Document;
use tokio::time::timeout;

use super::error::ServiceError;
use crate::database::Namespace;

/// Named extension points of the lifecycle pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    QueryBuilt,
    CandidateBuilt,
    BeforePersist,
    AfterPersist,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookStage::QueryBuilt => "onQueryBuilt",
            HookStage::CandidateBuilt => "onCandidateBuilt",
            HookStage::BeforePersist => "onBeforePersist",
            HookStage::AfterPersist => "onAfterPersist",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    Count,
    Aggregate,
    Read,
    ReadOne,
    Create,
    Update,
    Replace,
    SoftDelete,
    Delete,
}

/// What a hook sees about the running operation
#[derive(Debug, Clone)]
pub struct HookContext {
    pub operation: LifecycleOperation,
    pub namespace: Namespace,
    /// Adapted query, once built
    pub query: Option<Document>,
    /// Document about to be written, once built
    pub candidate: Option<Document>,
    pub session_id: Option<String>,
}

pub type HookFuture<T> = BoxFuture<'static, Result<T, ServiceError>>;
type RewriteHook = Arc<dyn Fn(HookContext, Document) -> HookFuture<Document> + Send + Sync>;
type BeforeHook = Arc<dyn Fn(HookContext) -> HookFuture<()> + Send + Sync>;
type AfterHook = Arc<dyn Fn(HookContext, Vec<Document>) -> HookFuture<Vec<Document>> + Send + Sync>;

/// Optional callbacks and switches for one lifecycle call. Every slot defaults to a no-op.
#[derive(Clone, Default)]
pub struct Hooks {
    query_built: Option<RewriteHook>,
    candidate_built: Option<RewriteHook>,
    before_persist: Option<BeforeHook>,
    after_persist: Option<AfterHook>,
    /// Candidate paths that bypass coercion and authorization
    pub skip: BTreeSet<String>,
    /// `Some(true)` forces an internal session, `Some(false)` forbids one
    pub session_enabled: Option<bool>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("query_built", &self.query_built.is_some())
            .field("candidate_built", &self.candidate_built.is_some())
            .field("before_persist", &self.before_persist.is_some())
            .field("after_persist", &self.after_persist.is_some())
            .field("skip", &self.skip)
            .field("session_enabled", &self.session_enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the adapted query before it reaches the store
    pub fn on_query_built<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext, Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Document, ServiceError>> + Send + 'static,
    {
        self.query_built = Some(Arc::new(move |ctx, doc| Box::pin(hook(ctx, doc))));
        self
    }

    /// Rewrite the coerced candidate before versioning fields are stamped
    pub fn on_candidate_built<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext, Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Document, ServiceError>> + Send + 'static,
    {
        self.candidate_built = Some(Arc::new(move |ctx, doc| Box::pin(hook(ctx, doc))));
        self
    }

    /// Runs just before the store write; an error aborts the operation
    pub fn on_before_persist<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        self.before_persist = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Sees, and may rewrite, the documents returned to the caller
    pub fn on_after_persist<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext, Vec<Document>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Document>, ServiceError>> + Send + 'static,
    {
        self.after_persist = Some(Arc::new(move |ctx, docs| Box::pin(hook(ctx, docs))));
        self
    }

    pub fn skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip.insert(path.into());
        self
    }

    pub fn with_session(mut self, enabled: bool) -> Self {
        self.session_enabled = Some(enabled);
        self
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub(crate) async fn query_built(&self, ctx: &HookContext, query: Document) -> Result<Document, ServiceError> {
        match &self.query_built {
            Some(hook) => self.run(HookStage::QueryBuilt, hook(ctx.clone(), query)).await,
            None => Ok(query),
        }
    }

    pub(crate) async fn candidate_built(
        &self,
        ctx: &HookContext,
        candidate: Document,
    ) -> Result<Document, ServiceError> {
        match &self.candidate_built {
            Some(hook) => self.run(HookStage::CandidateBuilt, hook(ctx.clone(), candidate)).await,
            None => Ok(candidate),
        }
    }

    pub(crate) async fn before_persist(&self, ctx: &HookContext) -> Result<(), ServiceError> {
        match &self.before_persist {
            Some(hook) => self.run(HookStage::BeforePersist, hook(ctx.clone())).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn after_persist(
        &self,
        ctx: &HookContext,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>, ServiceError> {
        match &self.after_persist {
            Some(hook) => self.run(HookStage::AfterPersist, hook(ctx.clone(), documents)).await,
            None => Ok(documents),
        }
    }

    async fn run<T>(&self, stage: HookStage, hook: HookFuture<T>) -> Result<T, ServiceError> {
        let started = Instant::now();
        let result = match self.timeout {
            Some(limit) => match timeout(limit, hook).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    tracing::error!("Hook {} timed out after {:?}", stage, limit);
                    return Err(ServiceError::HookTimeout { stage, timeout: limit });
                }
            },
            None => hook.await,
        };

        match &result {
            Ok(_) => tracing::debug!("Hook {} completed in {:?}", stage, started.elapsed()),
            Err(error) => tracing::warn!("Hook {} failed in {:?}: {}", stage, started.elapsed(), error),
        }
        result
    }
}
