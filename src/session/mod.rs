use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::database::{DocumentStore, StoreError, StoreSession, TransactionOptions};
use crate::service::{Hooks, ServiceError};

/// Errors that can carry a store error, so retry labels can be inspected
pub trait TransactionError: From<StoreError> + fmt::Display {
    fn store_error(&self) -> Option<&StoreError>;
}

impl TransactionError for StoreError {
    fn store_error(&self) -> Option<&StoreError> {
        Some(self)
    }
}

impl TransactionError for ServiceError {
    fn store_error(&self) -> Option<&StoreError> {
        match self {
            ServiceError::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// Decides when to open sessions and runs work inside transactions.
///
/// Whoever opens a session ends it: external sessions are used as-is and never
/// ended here; internal sessions are ended exactly once, on success or failure.
pub struct SessionManager<S: DocumentStore> {
    store: Arc<S>,
    options: TransactionOptions,
}

impl<S: DocumentStore> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options.clone(),
        }
    }
}

impl<S: DocumentStore> SessionManager<S> {
    pub fn new(store: Arc<S>, options: TransactionOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Start an internal session when one is needed.
    ///
    /// Forced operations get a session unless hooks disable it; others only when hooks enable it.
    /// Nothing is created when the caller supplied a session.
    pub async fn generate_session(
        &self,
        external: Option<&S::Session>,
        hooks: &Hooks,
        is_forced: bool,
    ) -> Result<Option<S::Session>, StoreError> {
        if external.is_some() {
            return Ok(None);
        }
        let wanted = if is_forced {
            hooks.session_enabled != Some(false)
        } else {
            hooks.session_enabled == Some(true)
        };
        if !wanted {
            return Ok(None);
        }

        let session = self.store.start_session().await?;
        debug!("Started internal session {}", session.id());
        Ok(Some(session))
    }

    /// Run `work` under the right session.
    ///
    /// With an external session the work runs directly under it. With an internal
    /// session it runs inside a transaction and the session is ended afterwards.
    /// Without either it runs with no session.
    pub async fn exec<T, E, F, Fut>(
        &self,
        work: F,
        external: Option<&S::Session>,
        internal: Option<S::Session>,
    ) -> Result<T, E>
    where
        F: Fn(Option<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransactionError,
    {
        if let Some(session) = external {
            return work(Some(session.clone())).await;
        }
        let Some(session) = internal else {
            return work(None).await;
        };

        let session_id = session.id();
        let result = self.with_transaction(&session, &work).await;
        let ended = self.store.end_session(session).await;
        debug!("Ended internal session {}", session_id);

        match (result, ended) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(end_error)) => Err(end_error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(end_error)) => {
                warn!("Failed to end session {} after error: {}", session_id, end_error);
                Err(error)
            }
        }
    }

    /// `generate_session` followed by `exec`
    pub async fn run<T, E, F, Fut>(
        &self,
        external: Option<&S::Session>,
        hooks: &Hooks,
        is_forced: bool,
        work: F,
    ) -> Result<T, E>
    where
        F: Fn(Option<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransactionError,
    {
        let internal = self.generate_session(external, hooks, is_forced).await?;
        self.exec(work, external, internal).await
    }

    async fn with_transaction<T, E, F, Fut>(&self, session: &S::Session, work: &F) -> Result<T, E>
    where
        F: Fn(Option<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransactionError,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            session.start_transaction(&self.options).await?;

            let value = match work(Some(session.clone())).await {
                Ok(value) => value,
                Err(error) => {
                    if let Err(abort_error) = session.abort_transaction().await {
                        warn!("Abort of session {} failed: {}", session.id(), abort_error);
                    }
                    let transient = error.store_error().map_or(false, StoreError::is_transient);
                    if transient && attempt <= self.options.max_retries {
                        warn!("Transient transaction error, retrying (attempt {}): {}", attempt, error);
                        continue;
                    }
                    warn!("Transaction aborted on session {}: {}", session.id(), error);
                    return Err(error);
                }
            };

            match self.commit(session).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Transaction committed after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt <= self.options.max_retries => {
                    warn!("Transient commit error, retrying transaction (attempt {}): {}", attempt, error);
                    if let Err(abort_error) = session.abort_transaction().await {
                        debug!("Abort after failed commit: {}", abort_error);
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn commit(&self, session: &S::Session) -> Result<(), StoreError> {
        let mut retries: u32 = 0;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_commit_unknown() && retries < self.options.max_retries => {
                    retries += 1;
                    warn!("Commit result unknown, retrying commit ({}): {}", retries, error);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
    use crate::database::{FaultPoint, MemoryStore, Namespace};
    use mongodb::bson::doc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(store: &MemoryStore) -> SessionManager<MemoryStore> {
        SessionManager::new(Arc::new(store.clone()), TransactionOptions::default())
    }

    #[tokio::test]
    async fn session_generation_rules() {
        let store = MemoryStore::new();
        let sessions = manager(&store);
        let none = Hooks::new();

        assert!(sessions.generate_session(None, &none, false).await.unwrap().is_none());
        assert!(sessions
            .generate_session(None, &none.clone().with_session(false), true)
            .await
            .unwrap()
            .is_none());

        let forced = sessions.generate_session(None, &none, true).await.unwrap().unwrap();
        let opted = sessions
            .generate_session(None, &none.clone().with_session(true), false)
            .await
            .unwrap()
            .unwrap();
        assert!(sessions
            .generate_session(Some(&forced), &none, true)
            .await
            .unwrap()
            .is_none());

        store.end_session(forced).await.unwrap();
        store.end_session(opted).await.unwrap();
        assert_eq!(store.stats().sessions_started, 2);
    }

    #[tokio::test]
    async fn internal_sessions_end_on_success_and_failure() {
        let store = MemoryStore::new();
        let sessions = manager(&store);
        let ns = Namespace::new("app", "items");

        let ok: Result<u32, StoreError> = sessions
            .run(None, &Hooks::new(), true, |session| {
                let store = store.clone();
                let ns = ns.clone();
                async move {
                    store.insert_one(&ns, doc! { "_id": 1 }, session.as_ref()).await?;
                    Ok(1)
                }
            })
            .await;
        assert_eq!(ok.unwrap(), 1);

        let failed: Result<(), StoreError> = sessions
            .run(None, &Hooks::new(), true, |session| {
                let store = store.clone();
                let ns = ns.clone();
                async move {
                    store.insert_one(&ns, doc! { "_id": 2 }, session.as_ref()).await?;
                    Err(StoreError::driver("boom"))
                }
            })
            .await;
        assert!(failed.is_err());

        assert_eq!(store.documents(&ns).await, vec![doc! { "_id": 1 }]);
        let stats = store.stats();
        assert_eq!(stats.sessions_started, 2);
        assert_eq!(stats.sessions_ended, 2);
        assert_eq!(stats.transactions_committed, 1);
        assert_eq!(stats.transactions_aborted, 1);
    }

    #[tokio::test]
    async fn external_sessions_are_never_ended() {
        let store = MemoryStore::new();
        let sessions = manager(&store);
        let external = store.start_session().await.unwrap();

        let seen: Result<String, StoreError> = sessions
            .run(Some(&external), &Hooks::new(), true, |session| async move {
                Ok(session.map(|s| s.id()).unwrap_or_default())
            })
            .await;
        assert_eq!(seen.unwrap(), external.id());
        assert_eq!(store.stats().sessions_ended, 0);
        assert_eq!(store.stats().transactions_started, 0);
        store.end_session(external).await.unwrap();
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let store = MemoryStore::new();
        let sessions = manager(&store);
        let calls = Arc::new(AtomicU32::new(0));

        store
            .fail_next(FaultPoint::Write, StoreError::with_label("conflict", TRANSIENT_TRANSACTION_ERROR))
            .await;
        store
            .fail_next(FaultPoint::Commit, StoreError::with_label("timeout", UNKNOWN_TRANSACTION_COMMIT_RESULT))
            .await;

        let ns = Namespace::new("app", "items");
        let result: Result<(), StoreError> = sessions
            .run(None, &Hooks::new(), true, |session| {
                let store = store.clone();
                let ns = ns.clone();
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    store.insert_one(&ns, doc! { "_id": 1 }, session.as_ref()).await
                }
            })
            .await;

        result.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.documents(&ns).await.len(), 1);
        assert_eq!(store.stats().sessions_ended, 1);
    }
}
