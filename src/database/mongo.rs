use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, ReadConcern, ReadPreference, ReturnDocument as DriverReturnDocument,
    SelectionCriteria, WriteConcern,
};
use mongodb::{Client, ClientSession};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::store::{
    DocumentStore, Namespace, ReadConcernLevel, ReadOptions, ReadPreferenceMode, ReturnDocument, StoreError,
    StoreSession, TransactionOptions, UpdateOutcome, WriteConcernLevel,
};
use crate::config::DatabaseConfig;

const DUPLICATE_KEY_CODE: i32 = 11000;

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
            if write_error.code == DUPLICATE_KEY_CODE {
                return StoreError::DuplicateKey(write_error.message.clone());
            }
        }
        let mut labels: Vec<String> = err.labels().iter().cloned().collect();
        labels.sort();
        StoreError::Driver {
            message: err.to_string(),
            labels,
        }
    }
}

/// MongoDB-backed document store
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

/// Driver session shared between the orchestrator and store calls
#[derive(Clone)]
pub struct MongoSession {
    id: String,
    inner: Arc<Mutex<ClientSession>>,
}

/// Run a driver action, attaching the session when one is supplied
macro_rules! with_session {
    ($session:expr, $action:expr) => {
        match $session {
            Some(session) => {
                let mut guard = session.inner.lock().await;
                $action.session(&mut *guard).await?
            }
            None => $action.await?,
        }
    };
}

impl MongoStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.app_name = Some(config.app_name.clone());
        options.max_pool_size = Some(config.max_pool_size);
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        let client = Client::with_options(options)?;
        info!("MongoDB client configured for {}", config.app_name);
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn ping(&self, database: &str) -> Result<(), StoreError> {
        self.client.database(database).run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn collection(&self, ns: &Namespace) -> mongodb::Collection<Document> {
        self.client.database(&ns.database).collection(&ns.collection)
    }
}

fn return_document(returning: ReturnDocument) -> DriverReturnDocument {
    match returning {
        ReturnDocument::Before => DriverReturnDocument::Before,
        ReturnDocument::After => DriverReturnDocument::After,
    }
}

#[async_trait]
impl StoreSession for MongoSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start_transaction(&self, options: &TransactionOptions) -> Result<(), StoreError> {
        let read_concern = match options.read_concern {
            ReadConcernLevel::Local => ReadConcern::local(),
            ReadConcernLevel::Majority => ReadConcern::majority(),
            ReadConcernLevel::Snapshot => ReadConcern::snapshot(),
        };
        let write_concern = match options.write_concern {
            WriteConcernLevel::One => WriteConcern::builder().w(Acknowledgment::Nodes(1)).build(),
            WriteConcernLevel::Majority => WriteConcern::builder().w(Acknowledgment::Majority).build(),
        };
        let read_preference = match options.read_preference {
            ReadPreferenceMode::Primary => ReadPreference::Primary,
            ReadPreferenceMode::PrimaryPreferred => ReadPreference::PrimaryPreferred {
                options: Default::default(),
            },
        };

        let mut session = self.inner.lock().await;
        let start = session
            .start_transaction()
            .read_concern(read_concern)
            .write_concern(write_concern)
            .selection_criteria(SelectionCriteria::ReadPreference(read_preference));
        match options.max_commit_time {
            Some(max) => start.max_commit_time(max).await?,
            None => start.await?,
        }
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        self.inner.lock().await.commit_transaction().await?;
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), StoreError> {
        self.inner.lock().await.abort_transaction().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    type Session = MongoSession;

    async fn start_session(&self) -> Result<MongoSession, StoreError> {
        let session = self.client.start_session().await?;
        let id = session.id().to_string();
        debug!("MongoDB session {} started", id);
        Ok(MongoSession {
            id,
            inner: Arc::new(Mutex::new(session)),
        })
    }

    async fn end_session(&self, session: MongoSession) -> Result<(), StoreError> {
        // The driver ends a session when its last handle is dropped
        debug!("MongoDB session {} ended", session.id);
        drop(session);
        Ok(())
    }

    async fn enforce_validator(&self, ns: &Namespace, validator: Document) -> Result<(), StoreError> {
        let database = self.client.database(&ns.database);
        let existing = database.list_collection_names().await?;
        if existing.iter().any(|name| name == &ns.collection) {
            database
                .run_command(doc! {
                    "collMod": &ns.collection,
                    "validator": validator,
                    "validationLevel": "strict",
                    "validationAction": "error",
                })
                .await?;
        } else {
            database.create_collection(&ns.collection).validator(validator).await?;
        }
        info!("Validator enforced on {}", ns);
        Ok(())
    }

    async fn count(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&MongoSession>,
    ) -> Result<u64, StoreError> {
        let collection = self.collection(ns);
        Ok(with_session!(session, collection.count_documents(filter)))
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&MongoSession>,
    ) -> Result<Vec<Document>, StoreError> {
        let collection = self.collection(ns);
        match session {
            Some(session) => {
                let mut guard = session.inner.lock().await;
                let mut cursor = collection.aggregate(pipeline).session(&mut *guard).await?;
                Ok(cursor.stream(&mut *guard).try_collect().await?)
            }
            None => Ok(collection.aggregate(pipeline).await?.try_collect().await?),
        }
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: ReadOptions,
        session: Option<&MongoSession>,
    ) -> Result<Vec<Document>, StoreError> {
        let collection = self.collection(ns);
        let mut find = collection.find(filter);
        if let Some(sort) = options.sort {
            find = find.sort(sort);
        }
        if let Some(limit) = options.limit {
            find = find.limit(limit);
        }
        if let Some(skip) = options.skip {
            find = find.skip(skip);
        }
        if let Some(projection) = options.projection {
            find = find.projection(projection);
        }
        match session {
            Some(session) => {
                let mut guard = session.inner.lock().await;
                let mut cursor = find.session(&mut *guard).await?;
                Ok(cursor.stream(&mut *guard).try_collect().await?)
            }
            None => Ok(find.await?.try_collect().await?),
        }
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: ReadOptions,
        session: Option<&MongoSession>,
    ) -> Result<Option<Document>, StoreError> {
        let collection = self.collection(ns);
        let mut find = collection.find_one(filter);
        if let Some(sort) = options.sort {
            find = find.sort(sort);
        }
        if let Some(skip) = options.skip {
            find = find.skip(skip);
        }
        if let Some(projection) = options.projection {
            find = find.projection(projection);
        }
        Ok(with_session!(session, find))
    }

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        session: Option<&MongoSession>,
    ) -> Result<(), StoreError> {
        let collection = self.collection(ns);
        with_session!(session, collection.insert_one(document));
        Ok(())
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        session: Option<&MongoSession>,
    ) -> Result<UpdateOutcome, StoreError> {
        let collection = self.collection(ns);
        let result = with_session!(session, collection.update_one(filter, update));
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
        session: Option<&MongoSession>,
    ) -> Result<Option<Document>, StoreError> {
        let collection = self.collection(ns);
        Ok(with_session!(
            session,
            collection
                .find_one_and_update(filter, update)
                .return_document(return_document(returning))
        ))
    }

    async fn find_one_and_replace(
        &self,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
        session: Option<&MongoSession>,
    ) -> Result<Option<Document>, StoreError> {
        let collection = self.collection(ns);
        Ok(with_session!(
            session,
            collection
                .find_one_and_replace(filter, replacement)
                .return_document(return_document(returning))
        ))
    }

    async fn find_one_and_delete(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&MongoSession>,
    ) -> Result<Option<Document>, StoreError> {
        let collection = self.collection(ns);
        Ok(with_session!(session, collection.find_one_and_delete(filter)))
    }
}
