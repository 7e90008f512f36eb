//! Replicated key-value store backends.
//!
//! The coordination core talks to the store through the [`KvBackend`]
//! trait: exact-key puts, prefix range reads, atomic multi-op
//! transactions, guarded compare-and-swap, prefix watches, and member
//! management. Two implementations are provided:
//! - `etcd`: client for the embedded etcd cluster (production).
//! - `memory`: single-process in-memory store for development/testing.
//!
//! [`KvConnector`] abstracts dialing so that callers which want a
//! fresh client per operation (the metadata facade) can get one
//! without knowing the backend.

use async_trait::async_trait;
use tokio::sync::mpsc;

use sharevol_proto::error::SvResult;
use sharevol_proto::volume::KvPair;

pub mod etcd;
pub mod memory;

/// One operation inside an atomic transaction.
#[derive(Debug, Clone)]
pub enum TxnOp {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

/// Per-operation result of an atomic transaction, in submission order.
#[derive(Debug, Clone)]
pub enum TxnOpResult {
    Put,
    /// The pair if the key existed, `None` otherwise.
    Get(Option<KvPair>),
    Delete,
}

/// Kind of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single event delivered by a prefix watch.
///
/// Events for a given key arrive in the store's linearization order.
/// `prev_value` is populated for puts that overwrote an existing key.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: String,
    pub prev_value: Option<String>,
}

/// A member of the replicated store cluster.
///
/// A member with an empty `name` has been added but has not started
/// yet (a reservation from a partial join).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMember {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
}

/// Trait that all store backends must implement.
///
/// Every operation carries the default request deadline; on timeout or
/// RPC failure it returns `SvError::StoreUnavailable`.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Write a single key.
    async fn put(&self, key: &str, value: &str) -> SvResult<()>;

    /// Delete a single key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> SvResult<()>;

    /// Read all keys under a prefix, sorted descending by key.
    async fn get_prefix(&self, prefix: &str) -> SvResult<Vec<KvPair>>;

    /// Apply a batch of operations atomically, in order.
    async fn txn(&self, ops: Vec<TxnOp>) -> SvResult<Vec<TxnOpResult>>;

    /// Guarded transaction: iff `key` currently holds `old`, replace it
    /// with `new`. Returns whether the swap happened.
    async fn compare_and_put(&self, key: &str, old: &str, new: &str) -> SvResult<bool>;

    /// Subscribe to events for all keys under `prefix`, with
    /// previous-value delivery. The subscription lives until the
    /// receiver is dropped or the backend goes away.
    async fn watch_prefix(&self, prefix: &str) -> SvResult<mpsc::UnboundedReceiver<WatchEvent>>;

    /// List current cluster members.
    async fn member_list(&self) -> SvResult<Vec<StoreMember>>;

    /// Add a member by peer URL. Returns the member list after the add.
    async fn member_add(&self, peer_url: &str) -> SvResult<Vec<StoreMember>>;

    /// Remove a member by id.
    async fn member_remove(&self, id: u64) -> SvResult<()>;
}

/// Dials a backend. Callers that need robustness across store leader
/// changes open a fresh client per call and drop it on return.
#[async_trait]
pub trait KvConnector: Send + Sync {
    async fn connect(&self) -> SvResult<Box<dyn KvBackend>>;
}
