//! SMB server control.
//!
//! The watcher brings the per-volume SMB export up on exactly one host
//! while the volume's global refcount is non-zero. The controller
//! contract is deliberately narrow: start and stop, success reported
//! as a plain boolean. A failed start/stop parks the volume in the
//! Error state upstream; the controller itself never retries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

/// Trait the refcount watcher drives the SMB server through.
#[async_trait]
pub trait SmbController: Send + Sync {
    /// Bring up an SMB export for `volume`. Returns true iff the
    /// export is operational.
    async fn start(&self, volume: &str) -> bool;

    /// Tear down the SMB export for `volume`. Returns true iff the
    /// export is gone.
    async fn stop(&self, volume: &str) -> bool;
}

/// Controller that manages Samba usershares through the `net` tool.
///
/// Each served volume is exported as a usershare named after the
/// volume, rooted at `<mount_root>/<volume>`.
pub struct UserShareController {
    mount_root: PathBuf,
    net_bin: String,
}

impl UserShareController {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            net_bin: "net".to_string(),
        }
    }

    fn share_path(&self, volume: &str) -> PathBuf {
        self.mount_root.join(volume)
    }

    async fn run_net(&self, args: &[&str]) -> bool {
        match Command::new(&self.net_bin).args(args).status().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                error!("net {:?} exited with {}", args, status);
                false
            }
            Err(e) => {
                error!("failed to run net {:?}: {}", args, e);
                false
            }
        }
    }
}

#[async_trait]
impl SmbController for UserShareController {
    async fn start(&self, volume: &str) -> bool {
        let path = self.share_path(volume);
        let Some(path_str) = path.to_str() else {
            error!("share path for {} is not valid utf-8", volume);
            return false;
        };
        if !Path::new(path_str).is_dir() {
            error!("mount point {} missing, cannot export {}", path_str, volume);
            return false;
        }

        info!("exporting {} at {}", volume, path_str);
        self.run_net(&[
            "usershare",
            "add",
            volume,
            path_str,
            "sharevol export",
            "Everyone:F",
            "guest_ok=y",
        ])
        .await
    }

    async fn stop(&self, volume: &str) -> bool {
        info!("removing export for {}", volume);
        self.run_net(&["usershare", "delete", volume]).await
    }
}
