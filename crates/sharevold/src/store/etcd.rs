//! etcd-backed store client.
//!
//! Wraps `etcd-client` behind [`KvBackend`]. Every RPC is bounded by
//! the default request deadline; the watch stream is pumped into the
//! trait's channel by a background task that ends when the receiver
//! is dropped.

use std::future::Future;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, SortOrder, SortTarget, Txn,
    TxnOp as EtcdTxnOp, TxnOpResponse, WatchOptions,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sharevol_proto::defaults::REQUEST_TIMEOUT;
use sharevol_proto::error::{SvError, SvResult};
use sharevol_proto::volume::KvPair;

use super::{EventKind, KvBackend, KvConnector, StoreMember, TxnOp, TxnOpResult, WatchEvent};

/// Bound a store RPC by the default request deadline.
async fn with_deadline<T, F>(fut: F) -> SvResult<T>
where
    F: Future<Output = Result<T, etcd_client::Error>>,
{
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(SvError::StoreUnavailable(e.to_string())),
        Err(_) => Err(SvError::StoreUnavailable("request timed out".into())),
    }
}

fn member_from(m: &etcd_client::Member) -> StoreMember {
    StoreMember {
        id: m.id(),
        name: m.name().to_string(),
        peer_urls: m.peer_urls().to_vec(),
    }
}

/// A connected etcd client.
pub struct EtcdBackend {
    client: Client,
}

impl EtcdBackend {
    /// Connect to the first reachable endpoint in `endpoints`.
    ///
    /// The connection itself is verified with a member-list RPC so a
    /// successful return means the member actually answers.
    pub async fn connect(endpoints: &[String]) -> SvResult<Self> {
        let connect = Client::connect(
            endpoints,
            Some(
                etcd_client::ConnectOptions::new()
                    .with_connect_timeout(REQUEST_TIMEOUT)
                    .with_timeout(REQUEST_TIMEOUT),
            ),
        );
        let client = match tokio::time::timeout(REQUEST_TIMEOUT, connect).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return Err(SvError::StoreUnavailable(e.to_string())),
            Err(_) => return Err(SvError::StoreUnavailable("connect timed out".into())),
        };

        let backend = Self { client };
        backend.member_list().await?;
        Ok(backend)
    }

    /// Clone the inner client handle for a mutable call.
    ///
    /// `etcd_client::Client` is a cheap handle over shared channels;
    /// its methods take `&mut self`.
    fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn put(&self, key: &str, value: &str) -> SvResult<()> {
        let mut client = self.client();
        with_deadline(client.put(key, value, None)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SvResult<()> {
        let mut client = self.client();
        with_deadline(client.delete(key, None)).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> SvResult<Vec<KvPair>> {
        let mut client = self.client();
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Descend);
        let resp = with_deadline(client.get(prefix, Some(options))).await?;

        let mut pairs = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match (kv.key_str(), kv.value_str()) {
                (Ok(k), Ok(v)) => pairs.push(KvPair::new(k, v)),
                _ => warn!("skipping non-utf8 key under prefix {}", prefix),
            }
        }
        Ok(pairs)
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> SvResult<Vec<TxnOpResult>> {
        let mut client = self.client();
        let etcd_ops: Vec<EtcdTxnOp> = ops
            .iter()
            .map(|op| match op {
                TxnOp::Put { key, value } => EtcdTxnOp::put(key.as_str(), value.as_str(), None),
                TxnOp::Get { key } => EtcdTxnOp::get(key.as_str(), None),
                TxnOp::Delete { key } => EtcdTxnOp::delete(key.as_str(), None),
            })
            .collect();

        let txn = Txn::new().and_then(etcd_ops);
        let resp = with_deadline(client.txn(txn)).await?;

        let mut results = Vec::with_capacity(ops.len());
        for op_resp in resp.op_responses() {
            let result = match op_resp {
                TxnOpResponse::Put(_) => TxnOpResult::Put,
                TxnOpResponse::Delete(_) => TxnOpResult::Delete,
                TxnOpResponse::Get(get) => {
                    let pair = get.kvs().first().and_then(|kv| {
                        match (kv.key_str(), kv.value_str()) {
                            (Ok(k), Ok(v)) => Some(KvPair::new(k, v)),
                            _ => None,
                        }
                    });
                    TxnOpResult::Get(pair)
                }
                TxnOpResponse::Txn(_) => {
                    return Err(SvError::StoreUnavailable(
                        "unexpected nested transaction response".into(),
                    ))
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn compare_and_put(&self, key: &str, old: &str, new: &str) -> SvResult<bool> {
        let mut client = self.client();
        let txn = Txn::new()
            .when([Compare::value(key, CompareOp::Equal, old)])
            .and_then([EtcdTxnOp::put(key, new, None)]);
        let resp = with_deadline(client.txn(txn)).await?;
        Ok(resp.succeeded())
    }

    async fn watch_prefix(&self, prefix: &str) -> SvResult<mpsc::UnboundedReceiver<WatchEvent>> {
        let mut client = self.client();
        let options = WatchOptions::new().with_prefix().with_prev_key();
        let (watcher, mut stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(|e| SvError::StoreUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            // Keep the watcher alive for the lifetime of the stream.
            let _watcher = watcher;
            loop {
                let resp = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        debug!("watch stream on {} closed by server", prefix);
                        break;
                    }
                    Err(e) => {
                        warn!("watch stream on {} failed: {}", prefix, e);
                        break;
                    }
                };

                for event in resp.events() {
                    let kind = match event.event_type() {
                        EventType::Put => EventKind::Put,
                        EventType::Delete => EventKind::Delete,
                    };
                    let Some(kv) = event.kv() else { continue };
                    let (Ok(key), Ok(value)) = (kv.key_str(), kv.value_str()) else {
                        warn!("skipping non-utf8 watch event under {}", prefix);
                        continue;
                    };
                    let prev_value = event
                        .prev_kv()
                        .and_then(|prev| prev.value_str().ok())
                        .map(str::to_string);

                    let delivered = tx.send(WatchEvent {
                        kind,
                        key: key.to_string(),
                        value: value.to_string(),
                        prev_value,
                    });
                    if delivered.is_err() {
                        // Receiver dropped; tear the subscription down.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn member_list(&self) -> SvResult<Vec<StoreMember>> {
        let mut client = self.client();
        let resp = with_deadline(client.member_list()).await?;
        Ok(resp.members().iter().map(member_from).collect())
    }

    async fn member_add(&self, peer_url: &str) -> SvResult<Vec<StoreMember>> {
        let mut client = self.client();
        with_deadline(client.member_add(vec![peer_url.to_string()], None)).await?;
        self.member_list().await
    }

    async fn member_remove(&self, id: u64) -> SvResult<()> {
        let mut client = self.client();
        with_deadline(client.member_remove(id)).await?;
        Ok(())
    }
}

/// Connector that dials a fixed endpoint list on every call, in order,
/// returning the first member that answers.
pub struct EtcdConnector {
    endpoints: Vec<String>,
}

impl EtcdConnector {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl KvConnector for EtcdConnector {
    async fn connect(&self) -> SvResult<Box<dyn KvBackend>> {
        let mut last_err = SvError::StoreUnavailable("no store endpoints configured".into());
        for endpoint in &self.endpoints {
            match EtcdBackend::connect(std::slice::from_ref(endpoint)).await {
                Ok(backend) => return Ok(Box::new(backend)),
                Err(e) => {
                    debug!("store endpoint {} unreachable: {}", endpoint, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
