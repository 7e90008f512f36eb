//! Typed volume-metadata facade over the replicated store.
//!
//! This is the surface the volume-driver layer calls. Every method
//! dials a fresh store client through the connector and drops it on
//! return, so a stale connection from before a store leader change can
//! never wedge more than one call.

use std::sync::Arc;

use tracing::{info, warn};

use sharevol_proto::defaults::PREFIX_STATE;
use sharevol_proto::error::{SvError, SvResult};
use sharevol_proto::volume::{gref_key, info_key, state_key, volume_name, KvPair};

use crate::store::{KvConnector, TxnOp, TxnOpResult};

/// Facade for per-volume {State, GlobalRefcount, Info} keys.
#[derive(Clone)]
pub struct VolumeMeta {
    connector: Arc<dyn KvConnector>,
}

impl VolumeMeta {
    pub fn new(connector: Arc<dyn KvConnector>) -> Self {
        Self { connector }
    }

    /// Update or create volume metadata.
    ///
    /// A single entry is a plain put; multiple entries are applied as
    /// one atomic transaction.
    pub async fn write_vol_metadata(&self, entries: &[KvPair]) -> SvResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let store = self.connector.connect().await?;
        if entries.len() == 1 {
            store.put(&entries[0].key, &entries[0].value).await
        } else {
            let ops = entries
                .iter()
                .map(|e| TxnOp::Put {
                    key: e.key.clone(),
                    value: e.value.clone(),
                })
                .collect();
            store.txn(ops).await.map(|_| ())
        }
    }

    /// Read volume metadata keys in one transaction.
    ///
    /// Returns one pair per found key. If every key is missing the
    /// volume does not exist. A volume with only some of its keys
    /// violates the write-atomicity contract; that is a bug or external
    /// tampering, and limping along risks corrupting data, so we stop
    /// the process.
    pub async fn read_vol_metadata(&self, keys: &[String]) -> SvResult<Vec<KvPair>> {
        let store = self.connector.connect().await?;
        let ops = keys
            .iter()
            .map(|k| TxnOp::Get { key: k.clone() })
            .collect();
        let results = store.txn(ops).await?;

        let mut entries = Vec::with_capacity(keys.len());
        for result in results {
            if let TxnOpResult::Get(Some(pair)) = result {
                entries.push(pair);
            }
        }

        if entries.is_empty() {
            return Err(SvError::VolumeDoesNotExist);
        }
        if entries.len() < keys.len() {
            panic!(
                "volume metadata corrupt: found {} of {} keys",
                entries.len(),
                keys.len()
            );
        }
        Ok(entries)
    }

    /// Delete all three metadata keys of `name` in one transaction.
    /// Keys that are already absent are not an error.
    pub async fn delete_vol_metadata(&self, name: &str) -> SvResult<()> {
        let store = self.connector.connect().await?;
        let ops = vec![
            TxnOp::Delete {
                key: state_key(name),
            },
            TxnOp::Delete {
                key: gref_key(name),
            },
            TxnOp::Delete {
                key: info_key(name),
            },
        ];
        store.txn(ops).await.map(|_| ())
    }

    /// Names of all volumes known to the store, sorted descending by
    /// their State key.
    pub async fn list_volume_name(&self) -> SvResult<Vec<String>> {
        let store = self.connector.connect().await?;
        let pairs = store.get_prefix(PREFIX_STATE).await?;
        Ok(pairs
            .iter()
            .filter_map(|p| volume_name(&p.key, PREFIX_STATE))
            .map(str::to_string)
            .collect())
    }

    /// Guarded swap: iff `key` holds `old`, replace it with `new`.
    ///
    /// Store failures are reported as a lost swap; the cause is logged
    /// and the caller's state machine treats it like losing the race.
    pub async fn compare_and_put(&self, key: &str, old: &str, new: &str) -> bool {
        let store = match self.connector.connect().await {
            Ok(store) => store,
            Err(e) => {
                warn!("compare-and-put on {}: store unreachable: {}", key, e);
                return false;
            }
        };

        match store.compare_and_put(key, old, new).await {
            Ok(swapped) => {
                if !swapped {
                    info!("compare-and-put on {}: precondition not met", key);
                }
                swapped
            }
            Err(e) => {
                warn!("compare-and-put on {} failed: {}", key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemBackend, MemConnector};
    use sharevol_proto::volume::VolState;

    fn meta_over(store: &MemBackend) -> VolumeMeta {
        VolumeMeta::new(Arc::new(MemConnector::new(store.clone())))
    }

    fn vol_keys(name: &str) -> Vec<String> {
        vec![state_key(name), gref_key(name), info_key(name)]
    }

    fn vol_entries(name: &str) -> Vec<KvPair> {
        vec![
            KvPair::new(state_key(name), VolState::Ready.as_str()),
            KvPair::new(gref_key(name), "0"),
            KvPair::new(info_key(name), "{\"size\":\"1gb\"}"),
        ]
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        meta.write_vol_metadata(&vol_entries("v1")).await.unwrap();
        let entries = meta.read_vol_metadata(&vol_keys("v1")).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].value, "Ready");
    }

    #[tokio::test]
    async fn test_single_entry_write_is_plain_put() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        meta.write_vol_metadata(&[KvPair::new(state_key("v1"), "Ready")])
            .await
            .unwrap();
        assert_eq!(store.value_of(&state_key("v1")).as_deref(), Some("Ready"));
    }

    #[tokio::test]
    async fn test_read_missing_volume() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        let err = meta.read_vol_metadata(&vol_keys("ghost")).await.unwrap_err();
        assert_eq!(err, SvError::VolumeDoesNotExist);
    }

    #[tokio::test]
    #[should_panic(expected = "volume metadata corrupt")]
    async fn test_partial_metadata_panics() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        // Simulated corruption: only the State key exists.
        meta.write_vol_metadata(&[KvPair::new(state_key("v4"), "Ready")])
            .await
            .unwrap();
        let _ = meta.read_vol_metadata(&vol_keys("v4")).await;
    }

    #[tokio::test]
    async fn test_delete_then_read() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        meta.write_vol_metadata(&vol_entries("v2")).await.unwrap();
        meta.delete_vol_metadata("v2").await.unwrap();
        let err = meta.read_vol_metadata(&vol_keys("v2")).await.unwrap_err();
        assert_eq!(err, SvError::VolumeDoesNotExist);

        // Deleting again silently succeeds.
        meta.delete_vol_metadata("v2").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_volume_names_descending() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        for name in ["alpha", "charlie", "bravo"] {
            meta.write_vol_metadata(&vol_entries(name)).await.unwrap();
        }
        let names = meta.list_volume_name().await.unwrap();
        assert_eq!(names, vec!["charlie", "bravo", "alpha"]);
    }

    #[tokio::test]
    async fn test_compare_and_put_via_facade() {
        let store = MemBackend::new();
        let meta = meta_over(&store);

        meta.write_vol_metadata(&vol_entries("v3")).await.unwrap();
        let key = state_key("v3");
        assert!(meta.compare_and_put(&key, "Ready", "Intermediate").await);
        assert!(!meta.compare_and_put(&key, "Ready", "Intermediate").await);
        assert_eq!(
            store.value_of(&key).as_deref(),
            Some(VolState::Intermediate.as_str())
        );
    }
}
