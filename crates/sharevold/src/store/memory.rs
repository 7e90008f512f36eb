//! In-memory store backend.
//!
//! Designed for development and testing. One mutex guards the map,
//! the watcher list, and the member list, so every operation (and the
//! watch events it emits) is linearized exactly like a single-member
//! replicated store. Clones share the same state, which lets a test
//! run several "hosts" against one store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use sharevol_proto::error::SvResult;
use sharevol_proto::volume::KvPair;

use super::{EventKind, KvBackend, KvConnector, StoreMember, TxnOp, TxnOpResult, WatchEvent};

struct MemWatcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct MemState {
    map: BTreeMap<String, String>,
    watchers: Vec<MemWatcher>,
    members: Vec<StoreMember>,
    next_member_id: u64,
}

impl MemState {
    /// Fan an event out to matching subscribers. Called with the state
    /// lock held so delivery order equals mutation order.
    fn emit(&mut self, event: WatchEvent) {
        self.watchers
            .retain(|w| !event.key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
    }

    fn put(&mut self, key: &str, value: &str) {
        let prev_value = self.map.insert(key.to_string(), value.to_string());
        self.emit(WatchEvent {
            kind: EventKind::Put,
            key: key.to_string(),
            value: value.to_string(),
            prev_value,
        });
    }

    fn delete(&mut self, key: &str) {
        if let Some(prev_value) = self.map.remove(key) {
            self.emit(WatchEvent {
                kind: EventKind::Delete,
                key: key.to_string(),
                value: String::new(),
                prev_value: Some(prev_value),
            });
        }
    }
}

/// A shared in-memory store. Cloning yields another handle to the same
/// state.
#[derive(Clone)]
pub struct MemBackend {
    state: Arc<Mutex<MemState>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState {
                map: BTreeMap::new(),
                watchers: Vec::new(),
                members: vec![StoreMember {
                    id: 1,
                    name: "local".to_string(),
                    peer_urls: vec!["http://127.0.0.1:2380".to_string()],
                }],
                next_member_id: 2,
            })),
        }
    }

    /// Replace the member list (test setup for join scenarios).
    pub fn set_members(&self, members: Vec<StoreMember>) {
        let mut state = self.state.lock().unwrap();
        state.next_member_id = members.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        state.members = members;
    }

    /// Current value of a key (test inspection).
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().map.get(key).cloned()
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemBackend {
    async fn put(&self, key: &str, value: &str) -> SvResult<()> {
        self.state.lock().unwrap().put(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SvResult<()> {
        self.state.lock().unwrap().delete(key);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> SvResult<Vec<KvPair>> {
        let state = self.state.lock().unwrap();
        let mut pairs: Vec<KvPair> = state
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvPair::new(k.clone(), v.clone()))
            .collect();
        pairs.reverse();
        Ok(pairs)
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> SvResult<Vec<TxnOpResult>> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                TxnOp::Put { key, value } => {
                    state.put(&key, &value);
                    TxnOpResult::Put
                }
                TxnOp::Get { key } => TxnOpResult::Get(
                    state
                        .map
                        .get(&key)
                        .map(|v| KvPair::new(key.clone(), v.clone())),
                ),
                TxnOp::Delete { key } => {
                    state.delete(&key);
                    TxnOpResult::Delete
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn compare_and_put(&self, key: &str, old: &str, new: &str) -> SvResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.map.get(key).map(String::as_str) == Some(old) {
            state.put(key, new);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn watch_prefix(&self, prefix: &str) -> SvResult<mpsc::UnboundedReceiver<WatchEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().watchers.push(MemWatcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn member_list(&self) -> SvResult<Vec<StoreMember>> {
        Ok(self.state.lock().unwrap().members.clone())
    }

    async fn member_add(&self, peer_url: &str) -> SvResult<Vec<StoreMember>> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_member_id;
        state.next_member_id += 1;
        // A freshly added member has not started, hence the empty name.
        state.members.push(StoreMember {
            id,
            name: String::new(),
            peer_urls: vec![peer_url.to_string()],
        });
        Ok(state.members.clone())
    }

    async fn member_remove(&self, id: u64) -> SvResult<()> {
        self.state.lock().unwrap().members.retain(|m| m.id != id);
        Ok(())
    }
}

/// Connector returning handles to one shared in-memory store.
pub struct MemConnector {
    backend: MemBackend,
}

impl MemConnector {
    pub fn new(backend: MemBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl KvConnector for MemConnector {
    async fn connect(&self) -> SvResult<Box<dyn KvBackend>> {
        Ok(Box::new(self.backend.clone()))
    }
}
