pub mod collection;
pub mod memory;
pub mod mongo;
pub mod store;

pub use collection::Collection;
pub use memory::{FaultPoint, MemorySession, MemoryStats, MemoryStore};
pub use mongo::{MongoSession, MongoStore};
pub use store::{
    DocumentStore, Namespace, ReadConcernLevel, ReadOptions, ReadPreferenceMode, ReturnDocument, StoreError,
    StoreSession, TransactionOptions, UpdateOutcome, WriteConcernLevel, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
