use std::sync::Arc;

use mongodb::bson::{oid::ObjectId, Bson, Document};
use tracing::debug;

use super::store::{DocumentStore, Namespace, ReadOptions, ReturnDocument, StoreError, UpdateOutcome};

/// A store bound to one physical collection.
///
/// Every call checks argument shapes before reaching the store; a malformed
/// query or candidate is a programmer error and surfaces as
/// `StoreError::InvalidArgument`.
pub struct Collection<S: DocumentStore> {
    store: Arc<S>,
    namespace: Namespace,
}

impl<S: DocumentStore> Clone for Collection<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
        }
    }
}

impl<S: DocumentStore> Collection<S> {
    pub fn new(store: Arc<S>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn count(&self, query: Document, session: Option<&S::Session>) -> Result<u64, StoreError> {
        let (filter, _) = unwrap_query(query)?;
        debug!("count {} filter={}", self.namespace, filter);
        self.store.count(&self.namespace, filter, session).await
    }

    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&S::Session>,
    ) -> Result<Vec<Document>, StoreError> {
        debug!("aggregate {} stages={}", self.namespace, pipeline.len());
        self.store.aggregate(&self.namespace, pipeline, session).await
    }

    pub async fn read(
        &self,
        query: Document,
        options: ReadOptions,
        session: Option<&S::Session>,
    ) -> Result<Vec<Document>, StoreError> {
        let (filter, options) = prepare_read(query, options)?;
        debug!("read {} filter={}", self.namespace, filter);
        self.store.find(&self.namespace, filter, options, session).await
    }

    pub async fn read_one(
        &self,
        query: Document,
        options: ReadOptions,
        session: Option<&S::Session>,
    ) -> Result<Option<Document>, StoreError> {
        let (filter, options) = prepare_read(query, options)?;
        debug!("read_one {} filter={}", self.namespace, filter);
        self.store.find_one(&self.namespace, filter, options, session).await
    }

    /// Insert a document, generating an `_id` when absent. Returns the stored document.
    pub async fn create_one(
        &self,
        mut document: Document,
        session: Option<&S::Session>,
    ) -> Result<Document, StoreError> {
        reject_operator_keys(&document, "document")?;
        match document.get("_id") {
            None | Some(Bson::Null) => {
                document.insert("_id", ObjectId::new());
            }
            Some(_) => {}
        }
        debug!("create_one {}", self.namespace);
        self.store
            .insert_one(&self.namespace, document.clone(), session)
            .await?;
        Ok(document)
    }

    /// Apply `$set` of the given fields to the first match. Returns whether a document matched.
    pub async fn update_one(
        &self,
        query: Document,
        fields: Document,
        session: Option<&S::Session>,
    ) -> Result<bool, StoreError> {
        let (filter, _) = unwrap_query(query)?;
        if fields.is_empty() {
            return Err(StoreError::InvalidArgument("update fields must not be empty".to_string()));
        }
        reject_operator_keys(&fields, "update fields")?;
        debug!("update_one {} filter={}", self.namespace, filter);
        let mut update = Document::new();
        update.insert("$set", fields);
        let UpdateOutcome { matched, .. } = self
            .store
            .update_one(&self.namespace, filter, update, session)
            .await?;
        Ok(matched > 0)
    }

    pub async fn find_one_and_update(
        &self,
        query: Document,
        update: Document,
        returning: ReturnDocument,
        session: Option<&S::Session>,
    ) -> Result<Option<Document>, StoreError> {
        let (filter, _) = unwrap_query(query)?;
        if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
            return Err(StoreError::InvalidArgument(
                "update must be a non-empty document of update operators".to_string(),
            ));
        }
        debug!("find_one_and_update {} filter={}", self.namespace, filter);
        self.store
            .find_one_and_update(&self.namespace, filter, update, returning, session)
            .await
    }

    pub async fn find_one_and_replace(
        &self,
        query: Document,
        replacement: Document,
        returning: ReturnDocument,
        session: Option<&S::Session>,
    ) -> Result<Option<Document>, StoreError> {
        let (filter, _) = unwrap_query(query)?;
        reject_operator_keys(&replacement, "replacement")?;
        debug!("find_one_and_replace {} filter={}", self.namespace, filter);
        self.store
            .find_one_and_replace(&self.namespace, filter, replacement, returning, session)
            .await
    }

    pub async fn find_one_and_delete(
        &self,
        query: Document,
        session: Option<&S::Session>,
    ) -> Result<Option<Document>, StoreError> {
        let (filter, _) = unwrap_query(query)?;
        debug!("find_one_and_delete {} filter={}", self.namespace, filter);
        self.store
            .find_one_and_delete(&self.namespace, filter, session)
            .await
    }
}

/// Split a `{ $query, $orderby }` wrapper into a filter and sort
pub fn unwrap_query(mut query: Document) -> Result<(Document, Option<Document>), StoreError> {
    if !query.contains_key("$query") {
        if query.contains_key("$orderby") {
            return Err(StoreError::InvalidArgument("$orderby requires $query".to_string()));
        }
        return Ok((query, None));
    }

    let filter = match query.remove("$query") {
        Some(Bson::Document(filter)) => filter,
        _ => return Err(StoreError::InvalidArgument("$query must be a document".to_string())),
    };
    let sort = match query.remove("$orderby") {
        Some(Bson::Document(sort)) => Some(sort),
        None => None,
        _ => return Err(StoreError::InvalidArgument("$orderby must be a document".to_string())),
    };
    if let Some(key) = query.keys().next() {
        return Err(StoreError::InvalidArgument(format!(
            "unexpected key '{}' beside $query",
            key
        )));
    }
    Ok((filter, sort))
}

fn prepare_read(query: Document, mut options: ReadOptions) -> Result<(Document, ReadOptions), StoreError> {
    let (filter, sort) = unwrap_query(query)?;
    if options.sort.is_none() {
        options.sort = sort;
    }
    if matches!(options.limit, Some(limit) if limit < 0) {
        return Err(StoreError::InvalidArgument("limit must not be negative".to_string()));
    }
    Ok((filter, options))
}

fn reject_operator_keys(document: &Document, what: &str) -> Result<(), StoreError> {
    match document.keys().find(|k| k.starts_with('$')) {
        Some(key) => Err(StoreError::InvalidArgument(format!(
            "{} must not contain operator key '{}'",
            what, key
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use mongodb::bson::doc;

    fn items() -> (Arc<MemoryStore>, Collection<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let collection = Collection::new(Arc::clone(&store), Namespace::new("test", "items"));
        (store, collection)
    }

    #[tokio::test]
    async fn update_one_sets_fields_on_the_first_match() {
        let (store, collection) = items();
        collection.create_one(doc! { "_id": 1, "name": "a" }, None).await.unwrap();

        assert!(collection.update_one(doc! { "_id": 1 }, doc! { "name": "b", "qty": 2 }, None).await.unwrap());
        assert!(!collection.update_one(doc! { "_id": 2 }, doc! { "name": "c" }, None).await.unwrap());
        assert_eq!(
            store.documents(collection.namespace()).await,
            vec![doc! { "_id": 1, "name": "b", "qty": 2 }]
        );
    }

    #[tokio::test]
    async fn update_one_rejects_empty_and_operator_fields() {
        let (store, collection) = items();
        collection.create_one(doc! { "_id": 1, "name": "a" }, None).await.unwrap();

        let err = collection.update_one(doc! { "_id": 1 }, doc! {}, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        let err = collection
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "name": "b" } }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(store.documents(collection.namespace()).await, vec![doc! { "_id": 1, "name": "a" }]);
    }

    #[test]
    fn unwraps_query_wrapper() {
        let (filter, sort) = unwrap_query(doc! { "$query": { "a": 1 }, "$orderby": { "a": -1 } }).unwrap();
        assert_eq!(filter, doc! { "a": 1 });
        assert_eq!(sort, Some(doc! { "a": -1 }));

        let (filter, sort) = unwrap_query(doc! { "a": 1 }).unwrap();
        assert_eq!(filter, doc! { "a": 1 });
        assert!(sort.is_none());
    }

    #[test]
    fn rejects_malformed_wrappers() {
        assert!(unwrap_query(doc! { "$query": 1 }).is_err());
        assert!(unwrap_query(doc! { "$orderby": { "a": 1 } }).is_err());
        assert!(unwrap_query(doc! { "$query": {}, "b": 2 }).is_err());
    }

    #[test]
    fn explicit_sort_wins_over_orderby() {
        let options = ReadOptions {
            sort: Some(doc! { "b": 1 }),
            ..Default::default()
        };
        let (_, options) = prepare_read(doc! { "$query": {}, "$orderby": { "a": 1 } }, options).unwrap();
        assert_eq!(options.sort, Some(doc! { "b": 1 }));
        assert!(prepare_read(doc! {}, ReadOptions::limit(-1)).is_err());
    }
}
