use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;
use thiserror::Error;

pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// Physical location of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Errors from the document store layer
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Store error: {message}")]
    Driver { message: String, labels: Vec<String> },
}

impl StoreError {
    pub fn driver(message: impl Into<String>) -> Self {
        StoreError::Driver {
            message: message.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(message: impl Into<String>, label: &str) -> Self {
        StoreError::Driver {
            message: message.into(),
            labels: vec![label.to_string()],
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        match self {
            StoreError::Driver { labels, .. } => labels.iter().any(|l| l == label),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.has_label(TRANSIENT_TRANSACTION_ERROR)
    }

    pub fn is_commit_unknown(&self) -> bool {
        self.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    }
}

/// Which image of the document a find-and-modify call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub projection: Option<Document>,
}

impl ReadOptions {
    pub fn limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcernLevel {
    One,
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
}

/// Settings applied to every internally started transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcernLevel,
    pub write_concern: WriteConcernLevel,
    pub read_preference: ReadPreferenceMode,
    pub max_commit_time: Option<Duration>,
    pub max_retries: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            read_concern: ReadConcernLevel::Majority,
            write_concern: WriteConcernLevel::Majority,
            read_preference: ReadPreferenceMode::Primary,
            max_commit_time: None,
            max_retries: 3,
        }
    }
}

/// A store-side transactional context
#[async_trait]
pub trait StoreSession: Clone + Send + Sync + 'static {
    fn id(&self) -> String;

    async fn start_transaction(&self, options: &TransactionOptions) -> Result<(), StoreError>;

    async fn commit_transaction(&self) -> Result<(), StoreError>;

    async fn abort_transaction(&self) -> Result<(), StoreError>;
}

/// Uniform operation set over a physical document store
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Session: StoreSession;

    async fn start_session(&self) -> Result<Self::Session, StoreError>;

    async fn end_session(&self, session: Self::Session) -> Result<(), StoreError>;

    /// Install or replace the collection's `$jsonSchema` validator
    async fn enforce_validator(&self, ns: &Namespace, validator: Document) -> Result<(), StoreError>;

    async fn count(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&Self::Session>,
    ) -> Result<u64, StoreError>;

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&Self::Session>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: ReadOptions,
        session: Option<&Self::Session>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: ReadOptions,
        session: Option<&Self::Session>,
    ) -> Result<Option<Document>, StoreError>;

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        session: Option<&Self::Session>,
    ) -> Result<(), StoreError>;

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        session: Option<&Self::Session>,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
        session: Option<&Self::Session>,
    ) -> Result<Option<Document>, StoreError>;

    async fn find_one_and_replace(
        &self,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
        session: Option<&Self::Session>,
    ) -> Result<Option<Document>, StoreError>;

    async fn find_one_and_delete(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&Self::Session>,
    ) -> Result<Option<Document>, StoreError>;
}
