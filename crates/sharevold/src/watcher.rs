//! Global-refcount watcher and the SMB lifecycle state machine.
//!
//! Every manager runs one watcher subscribed to the global-refcount
//! key prefix. All watchers see the same events; the compare-and-swap
//! into `Intermediate` is the serialization point that picks exactly
//! one host to start or stop the SMB server for a volume.
//!
//! The watcher reacts only to the 0↔1 refcount boundary. Creates
//! without a previous value, deletes, and counts beyond one are all
//! someone else's business.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use sharevol_proto::defaults::{GREF_NONE, GREF_SINGLE, PREFIX_GREF};
use sharevol_proto::volume::{state_key, volume_name, VolState};

use crate::metadata::VolumeMeta;
use crate::smb::SmbController;
use crate::store::{EventKind, WatchEvent};

/// Long-lived task driving the per-volume SMB lifecycle.
pub struct RefcountWatcher {
    meta: VolumeMeta,
    smb: Arc<dyn SmbController>,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    shutdown: Arc<Notify>,
}

impl RefcountWatcher {
    pub fn new(
        meta: VolumeMeta,
        smb: Arc<dyn SmbController>,
        events: mpsc::UnboundedReceiver<WatchEvent>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            meta,
            smb,
            events,
            shutdown,
        }
    }

    /// Consume watch events until the channel closes or shutdown is
    /// signalled. Events are handled one at a time, in delivery order.
    pub async fn run(mut self) {
        info!("refcount watcher started on prefix {}", PREFIX_GREF);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("refcount watcher shutting down");
                    return;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("watch channel closed, refcount watcher exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: WatchEvent) {
        if event.kind != EventKind::Put {
            return;
        }
        // A put without a previous value is the key's creation, not a
        // refcount transition.
        let Some(prev) = event.prev_value.as_deref() else {
            return;
        };
        let Some(volume) = volume_name(&event.key, PREFIX_GREF) else {
            warn!("watch event for foreign key {}", event.key);
            return;
        };

        match (prev, event.value.as_str()) {
            (GREF_NONE, GREF_SINGLE) => {
                info!("volume {}: global refcount 0 -> 1", volume);
                self.serve(volume).await;
            }
            (GREF_SINGLE, GREF_NONE) => {
                info!("volume {}: global refcount 1 -> 0", volume);
                self.release(volume).await;
            }
            _ => {}
        }
    }

    /// First mounter arrived: claim the transition and start SMB.
    async fn serve(&self, volume: &str) {
        let key = state_key(volume);
        let claimed = self
            .meta
            .compare_and_put(&key, VolState::Ready.as_str(), VolState::Intermediate.as_str())
            .await;
        if !claimed {
            // Another host won the claim; no side effects here.
            return;
        }

        if self.smb.start(volume).await {
            let mounted = self
                .meta
                .compare_and_put(
                    &key,
                    VolState::Intermediate.as_str(),
                    VolState::Mounted.as_str(),
                )
                .await;
            if !mounted {
                // Unreachable unless STATE was mutated externally
                // mid-transition; park the volume for the operator.
                error!("volume {}: lost Intermediate while serving", volume);
                self.park_error(&key, volume).await;
            }
        } else {
            error!("volume {}: SMB start failed", volume);
            self.park_error(&key, volume).await;
        }
    }

    /// Last unmounter left: claim the transition and stop SMB.
    async fn release(&self, volume: &str) {
        let key = state_key(volume);
        let claimed = self
            .meta
            .compare_and_put(
                &key,
                VolState::Mounted.as_str(),
                VolState::Intermediate.as_str(),
            )
            .await;
        if !claimed {
            return;
        }

        if self.smb.stop(volume).await {
            let ready = self
                .meta
                .compare_and_put(
                    &key,
                    VolState::Intermediate.as_str(),
                    VolState::Ready.as_str(),
                )
                .await;
            if !ready {
                error!("volume {}: lost Intermediate while releasing", volume);
                self.park_error(&key, volume).await;
            }
        } else {
            error!("volume {}: SMB stop failed", volume);
            self.park_error(&key, volume).await;
        }
    }

    /// Park a half-transitioned volume in the Error state. There is no
    /// automatic recovery; an operator resets STATE once the SMB side
    /// is understood.
    async fn park_error(&self, key: &str, volume: &str) {
        let parked = self
            .meta
            .compare_and_put(
                key,
                VolState::Intermediate.as_str(),
                VolState::Error.as_str(),
            )
            .await;
        if !parked {
            error!("volume {}: could not park in Error state", volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::metadata::VolumeMeta;
    use crate::store::memory::{MemBackend, MemConnector};
    use crate::store::KvBackend;
    use sharevol_proto::volume::gref_key;

    /// Recording SMB controller; `healthy` controls start's outcome.
    struct RecordingSmb {
        starts: AtomicUsize,
        stops: AtomicUsize,
        healthy: bool,
    }

    impl RecordingSmb {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                healthy,
            })
        }
    }

    #[async_trait::async_trait]
    impl SmbController for RecordingSmb {
        async fn start(&self, _volume: &str) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.healthy
        }

        async fn stop(&self, _volume: &str) -> bool {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.healthy
        }
    }

    async fn spawn_watcher(store: &MemBackend, smb: Arc<RecordingSmb>) -> Arc<Notify> {
        let events = store.watch_prefix(PREFIX_GREF).await.unwrap();
        let meta = VolumeMeta::new(Arc::new(MemConnector::new(store.clone())));
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(RefcountWatcher::new(meta, smb, events, shutdown.clone()).run());
        shutdown
    }

    /// Poll until the state key holds `want` or the deadline passes.
    async fn wait_for_state(store: &MemBackend, volume: &str, want: VolState) {
        let key = state_key(volume);
        for _ in 0..200 {
            if store.value_of(&key).as_deref() == Some(want.as_str()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "volume {} never reached {} (currently {:?})",
            volume,
            want,
            store.value_of(&key)
        );
    }

    async fn seed_volume(store: &MemBackend, volume: &str, state: VolState, gref: &str) {
        store
            .put(&state_key(volume), state.as_str())
            .await
            .unwrap();
        store.put(&gref_key(volume), gref).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_mount_starts_smb() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(true);
        seed_volume(&store, "v1", VolState::Ready, "0").await;

        let _shutdown = spawn_watcher(&store, smb.clone()).await;
        store.put(&gref_key("v1"), "1").await.unwrap();

        wait_for_state(&store, "v1", VolState::Mounted).await;
        assert_eq!(smb.starts.load(Ordering::SeqCst), 1);
        assert_eq!(smb.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_hosts_race_one_start() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(true);
        seed_volume(&store, "v1", VolState::Ready, "0").await;

        // Two watchers on the same store, as on two cluster hosts.
        let _s1 = spawn_watcher(&store, smb.clone()).await;
        let _s2 = spawn_watcher(&store, smb.clone()).await;
        store.put(&gref_key("v1"), "1").await.unwrap();

        wait_for_state(&store, "v1", VolState::Mounted).await;
        // Give the losing watcher time to (incorrectly) act.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(smb.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_smb_start_failure_parks_in_error() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(false);
        seed_volume(&store, "v2", VolState::Ready, "0").await;

        let _shutdown = spawn_watcher(&store, smb.clone()).await;
        store.put(&gref_key("v2"), "1").await.unwrap();

        wait_for_state(&store, "v2", VolState::Error).await;

        // Later refcount events find no Ready/Mounted state to claim
        // and must not touch the SMB server again.
        store.put(&gref_key("v2"), "0").await.unwrap();
        store.put(&gref_key("v2"), "1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(smb.starts.load(Ordering::SeqCst), 1);
        assert_eq!(smb.stops.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.value_of(&state_key("v2")).as_deref(),
            Some(VolState::Error.as_str())
        );
    }

    #[tokio::test]
    async fn test_last_unmount_stops_smb() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(true);
        seed_volume(&store, "v3", VolState::Mounted, "1").await;

        let _shutdown = spawn_watcher(&store, smb.clone()).await;
        store.put(&gref_key("v3"), "0").await.unwrap();

        wait_for_state(&store, "v3", VolState::Ready).await;
        assert_eq!(smb.stops.load(Ordering::SeqCst), 1);
        assert_eq!(smb.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_boundary_events_ignored() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(true);
        seed_volume(&store, "v4", VolState::Ready, "0").await;

        let _shutdown = spawn_watcher(&store, smb.clone()).await;

        // Creation (no previous value) of another volume's refcount.
        store.put(&gref_key("v5"), "0").await.unwrap();
        // Climb past the boundary: 1 -> 2 -> 1 must all be ignored.
        store.put(&gref_key("v4"), "1").await.unwrap();
        wait_for_state(&store, "v4", VolState::Mounted).await;
        store.put(&gref_key("v4"), "2").await.unwrap();
        store.put(&gref_key("v4"), "1").await.unwrap();
        // Unchanged put.
        store.put(&gref_key("v4"), "1").await.unwrap();
        // Deletion events carry no transition either.
        store.delete(&gref_key("v5")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(smb.starts.load(Ordering::SeqCst), 1);
        assert_eq!(smb.stops.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.value_of(&state_key("v4")).as_deref(),
            Some(VolState::Mounted.as_str())
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_watcher() {
        let store = MemBackend::new();
        let smb = RecordingSmb::new(true);
        seed_volume(&store, "v6", VolState::Ready, "0").await;

        let shutdown = spawn_watcher(&store, smb.clone()).await;
        // notify_one stores a permit, so the signal is not lost even if
        // the watcher task has not reached its select yet.
        shutdown.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Events after shutdown go unhandled.
        store.put(&gref_key("v6"), "1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(smb.starts.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.value_of(&state_key("v6")).as_deref(),
            Some(VolState::Ready.as_str())
        );
    }
}
