//! The remote document store collaborator.
//!
//! The sync subsystem only ever talks to the store through [`RemoteStore`]:
//! - Document reads, queries, and partial updates
//! - Atomic read-modify-write transactions with optimistic concurrency
//! - Bounded batch writes
//! - Push channels delivering snapshots until they fail once
//! - Destructive channel maintenance used by the recovery ladder
//!
//! [`MemoryStore`] is an in-process implementation with fault injection.

mod memory;

pub use memory::{MemoryStore, StoreCall};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::StoreResult;
use crate::types::{ResourceKey, ResourceKind};

/// Named document collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Pockets,
    Transactions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Pockets => "pockets",
            Collection::Transactions => "transactions",
        }
    }
}

/// Location of a single document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: Collection,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }

    pub fn pocket(id: &str) -> Self {
        Self::new(Collection::Pockets, id)
    }

    pub fn entry(id: &str) -> Self {
        Self::new(Collection::Transactions, id)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.id)
    }
}

/// A document as stored: id plus JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// What a push channel watches.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelTarget {
    /// A single document.
    Document(DocPath),
    /// Every document in `collection` whose `field` equals `value`.
    Query {
        collection: Collection,
        field: String,
        value: Value,
    },
}

impl ChannelTarget {
    /// The channel target backing a subscribable resource.
    pub fn for_resource(key: &ResourceKey) -> Self {
        match key.kind {
            ResourceKind::Pocket => ChannelTarget::Document(DocPath::pocket(key.id.as_str())),
            ResourceKind::Transactions => ChannelTarget::Query {
                collection: Collection::Transactions,
                field: "pocketId".to_string(),
                value: Value::String(key.id.as_str().to_string()),
            },
        }
    }

    /// Whether a document at `path` with body `data` is visible to this target.
    pub fn matches(&self, path: &DocPath, data: &Value) -> bool {
        match self {
            ChannelTarget::Document(target) => target == path,
            ChannelTarget::Query {
                collection,
                field,
                value,
            } => *collection == path.collection && data.get(field) == Some(value),
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::Document(path) => write!(f, "{}", path),
            ChannelTarget::Query {
                collection,
                field,
                value,
            } => write!(f, "{}?{}={}", collection.as_str(), field, value),
        }
    }
}

/// Identifier of one push channel instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Events on a push channel.
///
/// `Snapshot` may arrive any number of times; `Error` arrives at most once,
/// after which the channel delivers nothing more.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Snapshot(Vec<Document>),
    Error(crate::error::StoreFailure),
}

/// A live push channel. Close it with [`RemoteStore::close_channel`].
pub struct Channel {
    pub id: ChannelId,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// One write within a batch commit.
#[derive(Clone, Debug)]
pub enum BatchWrite {
    Set(DocPath, Value),
    Delete(DocPath),
}

/// Transactional read/write handle.
///
/// Reads are tracked; commit fails with an `Aborted` failure when any read
/// document changed since it was read. Writes are buffered until commit.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>>;

    /// Reserve a server-side id for a new document.
    fn allocate_id(&mut self, collection: Collection) -> String;

    fn set(&mut self, path: DocPath, data: Value);

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// The remote multi-writer document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>>;

    /// Create a document with a server-assigned id.
    async fn create(&self, collection: Collection, data: Value) -> StoreResult<String>;

    /// Merge top-level `fields` into an existing document.
    async fn update(
        &self,
        path: &DocPath,
        fields: serde_json::Map<String, Value>,
    ) -> StoreResult<()>;

    /// Commit writes atomically. Fails when the batch exceeds the store limit.
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> StoreResult<()>;

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Open a push channel. The initial snapshot is delivered as the first event.
    fn subscribe(&self, target: &ChannelTarget) -> StoreResult<Channel>;

    /// Close a channel. Closing an unknown or closed channel is a no-op.
    fn close_channel(&self, id: ChannelId);

    // --- Channel maintenance ---

    async fn disable_transport(&self) -> StoreResult<()>;

    async fn enable_transport(&self) -> StoreResult<()>;

    async fn clear_local_cache(&self) -> StoreResult<()>;

    /// Tear the channel machinery down. Not reversible in-process.
    async fn terminate_channel(&self) -> StoreResult<()>;
}
