//! In-process document store.
//!
//! Versioned documents give transactions optimistic concurrency; every
//! committed write fans out a fresh snapshot to the push channels that can
//! see it. Faults can be injected on demand, and every channel or
//! maintenance call is journaled.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    BatchWrite, Channel, ChannelEvent, ChannelId, ChannelTarget, Collection, DocPath, Document,
    RemoteStore, StoreTransaction,
};
use crate::config::STORE_MAX_BATCH_WRITES;
use crate::error::{FailureCode, StoreFailure, StoreResult};

/// A journaled store call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Subscribe(String),
    SubscribeRejected(String),
    CloseChannel(ChannelId),
    DisableTransport,
    EnableTransport,
    ClearLocalCache,
    TerminateChannel,
    Commit,
    BatchCommit(usize),
}

struct VersionedDoc {
    data: Value,
    version: u64,
}

struct Listener {
    target: ChannelTarget,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

struct Inner {
    docs: HashMap<DocPath, VersionedDoc>,
    listeners: HashMap<ChannelId, Listener>,
    next_channel: u64,
    next_doc: u64,
    transport_enabled: bool,
    terminated: bool,
    subscribe_failures: VecDeque<StoreFailure>,
    commit_conflicts: u32,
    journal: Vec<StoreCall>,
}

impl Inner {
    fn new() -> Self {
        Self {
            docs: HashMap::new(),
            listeners: HashMap::new(),
            next_channel: 1,
            next_doc: 1,
            transport_enabled: true,
            terminated: false,
            subscribe_failures: VecDeque::new(),
            commit_conflicts: 0,
            journal: Vec::new(),
        }
    }

    fn check_usable(&self) -> StoreResult<()> {
        if self.terminated {
            return Err(StoreFailure::unavailable("channel has been terminated"));
        }
        if !self.transport_enabled {
            return Err(StoreFailure::unavailable("client is offline"));
        }
        Ok(())
    }

    fn allocate_id(&mut self, collection: Collection) -> String {
        let id = format!("{}-{:06}", &collection.as_str()[..2], self.next_doc);
        self.next_doc += 1;
        id
    }

    fn version_of(&self, path: &DocPath) -> Option<u64> {
        self.docs.get(path).map(|d| d.version)
    }

    fn snapshot_for(&self, target: &ChannelTarget) -> Vec<Document> {
        match target {
            ChannelTarget::Document(path) => self
                .docs
                .get(path)
                .map(|d| Document {
                    id: path.id.clone(),
                    data: d.data.clone(),
                })
                .into_iter()
                .collect(),
            ChannelTarget::Query { .. } => {
                let mut docs: Vec<Document> = self
                    .docs
                    .iter()
                    .filter(|(path, d)| target.matches(path, &d.data))
                    .map(|(path, d)| Document {
                        id: path.id.clone(),
                        data: d.data.clone(),
                    })
                    .collect();
                // HashMap order is arbitrary; keep snapshots stable by id.
                docs.sort_by(|a, b| a.id.cmp(&b.id));
                docs
            }
        }
    }

    /// Apply a write and return the document body before it.
    fn write(&mut self, path: DocPath, data: Option<Value>) -> Option<Value> {
        match data {
            Some(data) => {
                let version = self.version_of(&path).map(|v| v + 1).unwrap_or(1);
                self.docs
                    .insert(path, VersionedDoc { data, version })
                    .map(|old| old.data)
            }
            None => self.docs.remove(&path).map(|old| old.data),
        }
    }

    /// Push fresh snapshots to every listener that can see one of `changes`.
    fn notify(&mut self, changes: &[(DocPath, Option<Value>)]) {
        let mut dead = Vec::new();
        for (id, listener) in self.listeners.iter() {
            let affected = changes.iter().any(|(path, before)| {
                let after = self.docs.get(path).map(|d| &d.data);
                before
                    .as_ref()
                    .map(|b| listener.target.matches(path, b))
                    .unwrap_or(false)
                    || after
                        .map(|a| listener.target.matches(path, a))
                        .unwrap_or(false)
            });
            if affected {
                let event = ChannelEvent::Snapshot(self.snapshot_for(&listener.target));
                if listener.sender.send(event).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.listeners.remove(&id);
        }
    }

    fn apply_all(&mut self, writes: Vec<(DocPath, Option<Value>)>) {
        let mut changes = Vec::with_capacity(writes.len());
        for (path, data) in writes {
            let before = self.write(path.clone(), data);
            changes.push((path, before));
        }
        self.notify(&changes);
    }
}

/// In-process [`RemoteStore`] implementation.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    // --- Seeding and inspection ---

    /// Write a document directly, notifying channels.
    pub fn insert_document(&self, path: DocPath, data: Value) {
        self.inner.lock().apply_all(vec![(path, Some(data))]);
    }

    pub fn document(&self, path: &DocPath) -> Option<Value> {
        self.inner.lock().docs.get(path).map(|d| d.data.clone())
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.inner
            .lock()
            .docs
            .keys()
            .filter(|p| p.collection == collection)
            .count()
    }

    pub fn journal(&self) -> Vec<StoreCall> {
        self.inner.lock().journal.clone()
    }

    /// Number of subscribe attempts, successful or not.
    pub fn subscribe_attempts(&self) -> usize {
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|c| matches!(c, StoreCall::Subscribe(_) | StoreCall::SubscribeRejected(_)))
            .count()
    }

    pub fn open_channels(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    // --- Fault injection ---

    /// Reject the next `subscribe` calls with these failures, in order.
    pub fn fail_next_subscribes(&self, failures: impl IntoIterator<Item = StoreFailure>) {
        self.inner.lock().subscribe_failures.extend(failures);
    }

    /// Fail every open channel on `target` with `failure`.
    ///
    /// Returns the number of channels failed.
    pub fn emit_error(&self, target: &ChannelTarget, failure: StoreFailure) -> usize {
        let mut inner = self.inner.lock();
        let ids: Vec<ChannelId> = inner
            .listeners
            .iter()
            .filter(|(_, l)| &l.target == target)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(listener) = inner.listeners.remove(id) {
                let _ = listener.sender.send(ChannelEvent::Error(failure.clone()));
            }
        }
        ids.len()
    }

    /// Push a raw snapshot to every open channel on `target`.
    pub fn push_raw(&self, target: &ChannelTarget, docs: Vec<Document>) -> usize {
        let inner = self.inner.lock();
        let mut sent = 0;
        for listener in inner.listeners.values().filter(|l| &l.target == target) {
            if listener
                .sender
                .send(ChannelEvent::Snapshot(docs.clone()))
                .is_ok()
            {
                sent += 1;
            }
        }
        sent
    }

    /// Make the next `n` transaction commits fail as if a concurrent writer
    /// won the race.
    pub fn inject_commit_conflicts(&self, n: u32) {
        self.inner.lock().commit_conflicts += n;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    reads: HashMap<DocPath, Option<u64>>,
    writes: Vec<(DocPath, Value)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        if let Some((_, data)) = self.writes.iter().rev().find(|(p, _)| p == path) {
            return Ok(Some(Document {
                id: path.id.clone(),
                data: data.clone(),
            }));
        }
        let inner = self.inner.lock();
        inner.check_usable()?;
        let doc = inner.docs.get(path);
        self.reads
            .entry(path.clone())
            .or_insert_with(|| doc.map(|d| d.version));
        Ok(doc.map(|d| Document {
            id: path.id.clone(),
            data: d.data.clone(),
        }))
    }

    fn allocate_id(&mut self, collection: Collection) -> String {
        self.inner.lock().allocate_id(collection)
    }

    fn set(&mut self, path: DocPath, data: Value) {
        self.writes.push((path, data));
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut inner = this.inner.lock();
        inner.check_usable()?;
        inner.journal.push(StoreCall::Commit);

        if inner.commit_conflicts > 0 {
            inner.commit_conflicts -= 1;
            return Err(StoreFailure::conflict("transaction read was invalidated"));
        }
        for (path, version) in &this.reads {
            if inner.version_of(path) != *version {
                return Err(StoreFailure::conflict(format!("{} changed since read", path)));
            }
        }

        let writes = this
            .writes
            .into_iter()
            .map(|(path, data)| (path, Some(data)))
            .collect();
        inner.apply_all(writes);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let inner = self.inner.lock();
        inner.check_usable()?;
        Ok(inner.docs.get(path).map(|d| Document {
            id: path.id.clone(),
            data: d.data.clone(),
        }))
    }

    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        let inner = self.inner.lock();
        inner.check_usable()?;
        Ok(inner.snapshot_for(&ChannelTarget::Query {
            collection,
            field: field.to_string(),
            value: value.clone(),
        }))
    }

    async fn create(&self, collection: Collection, data: Value) -> StoreResult<String> {
        let mut inner = self.inner.lock();
        inner.check_usable()?;
        let id = inner.allocate_id(collection);
        inner.apply_all(vec![(DocPath::new(collection, id.clone()), Some(data))]);
        Ok(id)
    }

    async fn update(
        &self,
        path: &DocPath,
        fields: serde_json::Map<String, Value>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_usable()?;
        let mut data = match inner.docs.get(path) {
            Some(doc) => doc.data.clone(),
            None => {
                return Err(StoreFailure::new(
                    FailureCode::NotFound,
                    format!("no document at {}", path),
                ))
            }
        };
        if let Value::Object(ref mut obj) = data {
            obj.extend(fields);
        } else {
            data = Value::Object(fields);
        }
        inner.apply_all(vec![(path.clone(), Some(data))]);
        Ok(())
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> StoreResult<()> {
        if writes.len() > STORE_MAX_BATCH_WRITES {
            return Err(StoreFailure::new(
                FailureCode::InvalidArgument,
                format!(
                    "batch of {} writes exceeds limit of {}",
                    writes.len(),
                    STORE_MAX_BATCH_WRITES
                ),
            ));
        }
        let mut inner = self.inner.lock();
        inner.check_usable()?;
        inner.journal.push(StoreCall::BatchCommit(writes.len()));
        let writes = writes
            .into_iter()
            .map(|w| match w {
                BatchWrite::Set(path, data) => (path, Some(data)),
                BatchWrite::Delete(path) => (path, None),
            })
            .collect();
        inner.apply_all(writes);
        Ok(())
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.inner.lock().check_usable()?;
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    fn subscribe(&self, target: &ChannelTarget) -> StoreResult<Channel> {
        let mut inner = self.inner.lock();
        let rejection = match inner.check_usable() {
            Err(failure) => Some(failure),
            Ok(()) => inner.subscribe_failures.pop_front(),
        };
        if let Some(failure) = rejection {
            inner.journal.push(StoreCall::SubscribeRejected(target.to_string()));
            return Err(failure);
        }

        inner.journal.push(StoreCall::Subscribe(target.to_string()));
        let id = ChannelId(inner.next_channel);
        inner.next_channel += 1;

        let (sender, events) = mpsc::unbounded_channel();
        // The initial snapshot doubles as the channel's open acknowledgement.
        let _ = sender.send(ChannelEvent::Snapshot(inner.snapshot_for(target)));
        inner.listeners.insert(
            id,
            Listener {
                target: target.clone(),
                sender,
            },
        );
        Ok(Channel { id, events })
    }

    fn close_channel(&self, id: ChannelId) {
        let mut inner = self.inner.lock();
        if inner.listeners.remove(&id).is_some() {
            inner.journal.push(StoreCall::CloseChannel(id));
        }
    }

    async fn disable_transport(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::DisableTransport);
        inner.transport_enabled = false;
        Ok(())
    }

    async fn enable_transport(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::EnableTransport);
        if inner.terminated {
            return Err(StoreFailure::unavailable("channel has been terminated"));
        }
        inner.transport_enabled = true;
        Ok(())
    }

    async fn clear_local_cache(&self) -> StoreResult<()> {
        self.inner.lock().journal.push(StoreCall::ClearLocalCache);
        Ok(())
    }

    async fn terminate_channel(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::TerminateChannel);
        inner.terminated = true;
        // Dropping the senders ends every open channel.
        inner.listeners.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_target(pocket: &str) -> ChannelTarget {
        ChannelTarget::Query {
            collection: Collection::Transactions,
            field: "pocketId".to_string(),
            value: json!(pocket),
        }
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = MemoryStore::new();
        store.insert_document(DocPath::pocket("p1"), json!({"name": "Household"}));

        let mut channel = store
            .subscribe(&ChannelTarget::Document(DocPath::pocket("p1")))
            .unwrap();

        match channel.events.recv().await.unwrap() {
            ChannelEvent::Snapshot(docs) => {
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].data["name"], "Household");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_channel_sees_matching_writes_only() {
        let store = MemoryStore::new();
        let mut channel = store.subscribe(&log_target("p1")).unwrap();
        let _initial = channel.events.recv().await.unwrap();

        store
            .create(Collection::Transactions, json!({"pocketId": "p2"}))
            .await
            .unwrap();
        store
            .create(Collection::Transactions, json!({"pocketId": "p1"}))
            .await
            .unwrap();

        match channel.events.recv().await.unwrap() {
            ChannelEvent::Snapshot(docs) => assert_eq!(docs.len(), 1),
            other => panic!("Expected snapshot, got {:?}", other),
        }
        assert!(channel.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_error_ends_channel() {
        let store = MemoryStore::new();
        let target = log_target("p1");
        let mut channel = store.subscribe(&target).unwrap();
        let _initial = channel.events.recv().await.unwrap();

        assert_eq!(store.emit_error(&target, StoreFailure::unavailable("blip")), 1);
        assert!(matches!(
            channel.events.recv().await,
            Some(ChannelEvent::Error(_))
        ));
        assert!(channel.events.recv().await.is_none());
        assert_eq!(store.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_transaction_conflict_on_concurrent_write() {
        let store = MemoryStore::new();
        let path = DocPath::pocket("p1");
        store.insert_document(path.clone(), json!({"balance": 0}));

        let mut txn = store.begin_transaction().await.unwrap();
        txn.get(&path).await.unwrap();
        txn.set(path.clone(), json!({"balance": 10}));

        // A concurrent writer lands first.
        store.insert_document(path.clone(), json!({"balance": 5}));

        let result = txn.commit().await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(store.document(&path).unwrap()["balance"], 5);
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let store = MemoryStore::new();
        let writes = (0..=STORE_MAX_BATCH_WRITES)
            .map(|i| BatchWrite::Delete(DocPath::entry(&i.to_string())))
            .collect();
        let result = store.commit_batch(writes).await;
        assert_eq!(result.unwrap_err().code, FailureCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_terminate_rejects_subscribers() {
        let store = MemoryStore::new();
        let target = log_target("p1");
        let _channel = store.subscribe(&target).unwrap();

        store.terminate_channel().await.unwrap();
        assert_eq!(store.open_channels(), 0);
        assert!(store.subscribe(&target).is_err());
        assert!(store.enable_transport().await.is_err());
    }
}
