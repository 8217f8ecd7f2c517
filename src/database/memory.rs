use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::store::{
    DocumentStore, Namespace, ReadOptions, ReturnDocument, StoreError, StoreSession, TransactionOptions,
    UpdateOutcome,
};
use crate::filter::{FilterError, FilterOrder, FilterWhere};

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Read,
    Write,
    Commit,
}

/// Session and transaction counters, used to check that sessions are never leaked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
}

#[derive(Default)]
struct Inner {
    collections: Mutex<HashMap<Namespace, Vec<Document>>>,
    validators: Mutex<HashMap<Namespace, Document>>,
    faults: Mutex<Vec<(FaultPoint, StoreError)>>,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
}

impl Inner {
    async fn take_fault(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().await;
        match faults.iter().position(|(p, _)| *p == point) {
            Some(index) => Err(faults.remove(index).1),
            None => Ok(()),
        }
    }
}

/// In-process document store.
///
/// Transactions keep a copy of each collection they touch and restore it on
/// abort. Writes made outside the transaction to the same collection are lost
/// on rollback, which is acceptable for a test backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct SessionState {
    in_transaction: bool,
    ended: bool,
    undo: HashMap<Namespace, Vec<Document>>,
}

#[derive(Clone)]
pub struct MemorySession {
    id: Uuid,
    inner: Arc<Inner>,
    state: Arc<Mutex<SessionState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            sessions_started: self.inner.sessions_started.load(Ordering::SeqCst),
            sessions_ended: self.inner.sessions_ended.load(Ordering::SeqCst),
            transactions_started: self.inner.transactions_started.load(Ordering::SeqCst),
            transactions_committed: self.inner.transactions_committed.load(Ordering::SeqCst),
            transactions_aborted: self.inner.transactions_aborted.load(Ordering::SeqCst),
        }
    }

    /// Make the next operation reaching `point` fail with `error`
    pub async fn fail_next(&self, point: FaultPoint, error: StoreError) {
        self.inner.faults.lock().await.push((point, error));
    }

    pub async fn validator(&self, ns: &Namespace) -> Option<Document> {
        self.inner.validators.lock().await.get(ns).cloned()
    }

    /// Raw contents of a collection, bypassing filters
    pub async fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.inner
            .collections
            .lock()
            .await
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }

    async fn check_session(&self, session: Option<&MemorySession>) -> Result<(), StoreError> {
        if let Some(session) = session {
            if session.state.lock().await.ended {
                return Err(StoreError::Session(format!("session {} has ended", session.id)));
            }
        }
        Ok(())
    }

    async fn read_matching(
        &self,
        ns: &Namespace,
        filter: &Document,
        session: Option<&MemorySession>,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_session(session).await?;
        self.inner.take_fault(FaultPoint::Read).await?;
        FilterWhere::validate(filter).map_err(filter_error)?;

        let collections = self.inner.collections.lock().await;
        let mut out = Vec::new();
        for doc in collections.get(ns).into_iter().flatten() {
            if FilterWhere::matches(filter, doc).map_err(filter_error)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    /// Mutate the first matching document in place, recording an undo image when inside a transaction
    async fn modify_first<F>(
        &self,
        ns: &Namespace,
        filter: &Document,
        session: Option<&MemorySession>,
        mutate: F,
    ) -> Result<Option<(Document, Option<Document>)>, StoreError>
    where
        F: FnOnce(&Document) -> Result<Option<Document>, StoreError>,
    {
        self.check_session(session).await?;
        self.inner.take_fault(FaultPoint::Write).await?;
        FilterWhere::validate(filter).map_err(filter_error)?;

        let mut collections = self.inner.collections.lock().await;
        let docs = collections.entry(ns.clone()).or_default();

        let mut index = None;
        for (i, doc) in docs.iter().enumerate() {
            if FilterWhere::matches(filter, doc).map_err(filter_error)? {
                index = Some(i);
                break;
            }
        }
        let Some(index) = index else {
            return Ok(None);
        };

        let before = docs[index].clone();
        let after = mutate(&before)?;
        record_undo(session, ns, docs).await;
        match &after {
            Some(doc) => docs[index] = doc.clone(),
            None => {
                docs.remove(index);
            }
        }
        Ok(Some((before, after)))
    }
}

async fn record_undo(session: Option<&MemorySession>, ns: &Namespace, docs: &[Document]) {
    if let Some(session) = session {
        let mut state = session.state.lock().await;
        if state.in_transaction && !state.undo.contains_key(ns) {
            state.undo.insert(ns.clone(), docs.to_vec());
        }
    }
}

fn filter_error(err: FilterError) -> StoreError {
    StoreError::InvalidArgument(err.to_string())
}

#[async_trait]
impl StoreSession for MemorySession {
    fn id(&self) -> String {
        self.id.to_string()
    }

    async fn start_transaction(&self, _options: &TransactionOptions) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.ended {
            return Err(StoreError::Session(format!("session {} has ended", self.id)));
        }
        if state.in_transaction {
            return Err(StoreError::Session("transaction already in progress".to_string()));
        }
        state.in_transaction = true;
        state.undo.clear();
        self.inner.transactions_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        if !self.state.lock().await.in_transaction {
            return Err(StoreError::Session("no transaction in progress".to_string()));
        }
        self.inner.take_fault(FaultPoint::Commit).await?;

        let mut state = self.state.lock().await;
        state.in_transaction = false;
        state.undo.clear();
        self.inner.transactions_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), StoreError> {
        let undo = {
            let mut state = self.state.lock().await;
            if !state.in_transaction {
                return Err(StoreError::Session("no transaction in progress".to_string()));
            }
            state.in_transaction = false;
            std::mem::take(&mut state.undo)
        };

        let mut collections = self.inner.collections.lock().await;
        for (ns, docs) in undo {
            collections.insert(ns, docs);
        }
        self.inner.transactions_aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Session = MemorySession;

    async fn start_session(&self) -> Result<MemorySession, StoreError> {
        self.inner.sessions_started.fetch_add(1, Ordering::SeqCst);
        let session = MemorySession {
            id: Uuid::new_v4(),
            inner: Arc::clone(&self.inner),
            state: Arc::new(Mutex::new(SessionState::default())),
        };
        debug!("memory session {} started", session.id);
        Ok(session)
    }

    async fn end_session(&self, session: MemorySession) -> Result<(), StoreError> {
        let in_transaction = {
            let mut state = session.state.lock().await;
            if state.ended {
                return Err(StoreError::Session(format!("session {} already ended", session.id)));
            }
            state.ended = true;
            state.in_transaction
        };
        if in_transaction {
            session.abort_transaction().await?;
        }
        self.inner.sessions_ended.fetch_add(1, Ordering::SeqCst);
        debug!("memory session {} ended", session.id);
        Ok(())
    }

    async fn enforce_validator(&self, ns: &Namespace, validator: Document) -> Result<(), StoreError> {
        self.inner.validators.lock().await.insert(ns.clone(), validator);
        self.inner.collections.lock().await.entry(ns.clone()).or_default();
        Ok(())
    }

    async fn count(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> Result<u64, StoreError> {
        Ok(self.read_matching(ns, &filter, session).await?.len() as u64)
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&MemorySession>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.read_matching(ns, &Document::new(), session).await?;
        for stage in pipeline {
            docs = apply_stage(docs, &stage)?;
        }
        Ok(docs)
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: ReadOptions,
        session: Option<&MemorySession>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.read_matching(ns, &filter, session).await?;
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort)?;
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(limit) if limit > 0 => limit as usize,
            _ => usize::MAX,
        };
        let docs = docs.into_iter().skip(skip).take(limit);
        match &options.projection {
            Some(projection) => docs.map(|d| project(d, projection)).collect(),
            None => Ok(docs.collect()),
        }
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        mut options: ReadOptions,
        session: Option<&MemorySession>,
    ) -> Result<Option<Document>, StoreError> {
        options.limit = Some(1);
        Ok(self.find(ns, filter, options, session).await?.into_iter().next())
    }

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        session: Option<&MemorySession>,
    ) -> Result<(), StoreError> {
        self.check_session(session).await?;
        self.inner.take_fault(FaultPoint::Write).await?;

        let id = document
            .get("_id")
            .cloned()
            .ok_or_else(|| StoreError::InvalidArgument("document has no _id".to_string()))?;

        let mut collections = self.inner.collections.lock().await;
        let docs = collections.entry(ns.clone()).or_default();
        if docs.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(StoreError::DuplicateKey(format!("{} _id {}", ns, id)));
        }
        record_undo(session, ns, docs).await;
        docs.push(document);
        Ok(())
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        session: Option<&MemorySession>,
    ) -> Result<UpdateOutcome, StoreError> {
        let result = self
            .modify_first(ns, &filter, session, |doc| apply_update(doc, &update).map(Some))
            .await?;
        Ok(match result {
            Some((before, after)) => UpdateOutcome {
                matched: 1,
                modified: u64::from(after.as_ref() != Some(&before)),
            },
            None => UpdateOutcome::default(),
        })
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
        session: Option<&MemorySession>,
    ) -> Result<Option<Document>, StoreError> {
        let result = self
            .modify_first(ns, &filter, session, |doc| apply_update(doc, &update).map(Some))
            .await?;
        Ok(result.and_then(|(before, after)| match returning {
            ReturnDocument::Before => Some(before),
            ReturnDocument::After => after,
        }))
    }

    async fn find_one_and_replace(
        &self,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
        session: Option<&MemorySession>,
    ) -> Result<Option<Document>, StoreError> {
        let result = self
            .modify_first(ns, &filter, session, |doc| {
                let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
                if let Some(new_id) = replacement.get("_id") {
                    if *new_id != id {
                        return Err(StoreError::InvalidArgument("_id is immutable".to_string()));
                    }
                }
                let mut replaced = Document::new();
                replaced.insert("_id", id);
                for (key, value) in &replacement {
                    if key != "_id" {
                        replaced.insert(key.clone(), value.clone());
                    }
                }
                Ok(Some(replaced))
            })
            .await?;
        Ok(result.and_then(|(before, after)| match returning {
            ReturnDocument::Before => Some(before),
            ReturnDocument::After => after,
        }))
    }

    async fn find_one_and_delete(
        &self,
        ns: &Namespace,
        filter: Document,
        session: Option<&MemorySession>,
    ) -> Result<Option<Document>, StoreError> {
        let result = self.modify_first(ns, &filter, session, |_| Ok(None)).await?;
        Ok(result.map(|(before, _)| before))
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) -> Result<(), StoreError> {
    let infos = FilterOrder::parse(sort).map_err(filter_error)?;
    docs.sort_by(|a, b| FilterOrder::compare(&infos, a, b));
    Ok(())
}

fn project(doc: Document, projection: &Document) -> Result<Document, StoreError> {
    let include = projection
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .any(|(_, v)| is_truthy(v));
    let keep_id = projection.get("_id").map_or(true, is_truthy);

    let mut out = Document::new();
    for (key, value) in doc {
        let keep = if key == "_id" {
            keep_id
        } else if include {
            projection.get(&key).map_or(false, is_truthy)
        } else {
            projection.get(&key).map_or(true, is_truthy)
        };
        if keep {
            out.insert(key, value);
        }
    }
    Ok(out)
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

fn apply_stage(docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>, StoreError> {
    let (name, spec) = match stage.iter().next() {
        Some(entry) if stage.len() == 1 => entry,
        _ => {
            return Err(StoreError::InvalidArgument(
                "pipeline stage must have exactly one key".to_string(),
            ))
        }
    };
    match (name.as_str(), spec) {
        ("$match", Bson::Document(filter)) => {
            FilterWhere::validate(filter).map_err(filter_error)?;
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                if FilterWhere::matches(filter, &doc).map_err(filter_error)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        ("$sort", Bson::Document(sort)) => {
            let mut docs = docs;
            sort_documents(&mut docs, sort)?;
            Ok(docs)
        }
        ("$skip", n) => Ok(docs.into_iter().skip(stage_count(name, n)?).collect()),
        ("$limit", n) => Ok(docs.into_iter().take(stage_count(name, n)?).collect()),
        ("$project", Bson::Document(projection)) => docs.into_iter().map(|d| project(d, projection)).collect(),
        ("$count", Bson::String(field)) => {
            let mut out = Document::new();
            out.insert(field.clone(), docs.len() as i64);
            Ok(if docs.is_empty() { vec![] } else { vec![out] })
        }
        (name, _) => Err(StoreError::InvalidArgument(format!(
            "unsupported pipeline stage {}",
            name
        ))),
    }
}

fn stage_count(name: &str, value: &Bson) -> Result<usize, StoreError> {
    match value {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(StoreError::InvalidArgument(format!("{} requires a non-negative integer", name))),
    }
}

fn apply_update(doc: &Document, update: &Document) -> Result<Document, StoreError> {
    let mut out = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StoreError::InvalidArgument(format!("{} requires a document", op)));
        };
        for (path, value) in fields {
            if path == "_id" {
                return Err(StoreError::InvalidArgument("_id is immutable".to_string()));
            }
            match op.as_str() {
                "$set" => set_path(&mut out, path, value.clone())?,
                "$unset" => unset_path(&mut out, path),
                "$inc" => {
                    let current = get_path(&out, path).cloned().unwrap_or(Bson::Int32(0));
                    set_path(&mut out, path, add_numbers(&current, value)?)?;
                }
                other => {
                    return Err(StoreError::InvalidArgument(format!(
                        "unsupported update operator {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(out)
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(d) => d.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), StoreError> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(child)) => set_path(child, rest, value),
                _ => Err(StoreError::InvalidArgument(format!(
                    "cannot set '{}' through a non-document value",
                    path
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

fn add_numbers(current: &Bson, delta: &Bson) -> Result<Bson, StoreError> {
    let overflow = || StoreError::InvalidArgument(format!("$inc of {} by {} overflows", current, delta));
    Ok(match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a.checked_add(*b).ok_or_else(overflow)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(i64::from(*b)).ok_or_else(overflow)?),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).checked_add(*b).ok_or_else(overflow)?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b).ok_or_else(overflow)?),
        (a, b) => match (crate::filter::as_f64(a), crate::filter::as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => return Err(StoreError::InvalidArgument("$inc requires numeric values".to_string())),
        },
    })
}
