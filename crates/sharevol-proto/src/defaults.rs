//! Tunable operational defaults for the sharevol plugin.
//!
//! This module centralizes the configurable defaults that can be
//! overridden via CLI flags, plus the fixed key-schema constants that
//! every cluster member must agree on.

use std::time::Duration;

// ─── Store Endpoints ────────────────────────────────────────────────────────

/// Port on which store clients talk to the members.
pub const DEFAULT_CLIENT_PORT: u16 = 2379;

/// Port on which store peers talk to each other.
pub const DEFAULT_PEER_PORT: u16 = 2380;

/// Interface the store listens on.
pub const DEFAULT_LISTEN_INTERFACE: &str = "0.0.0.0";

/// URL scheme for store endpoints.
pub const DEFAULT_SCHEME: &str = "http://";

/// Token identifying this deployment's store cluster.
pub const CLUSTER_TOKEN: &str = "sharevol-etcd-cluster";

/// Cluster-state flag for forming a new store cluster.
pub const CLUSTER_STATE_NEW: &str = "new";

/// Cluster-state flag for joining an existing store cluster.
pub const CLUSTER_STATE_EXISTING: &str = "existing";

/// Default path of the store binary spawned by bootstrap.
pub const DEFAULT_STORE_BIN: &str = "/usr/local/bin/etcd";

// ─── Timeouts ───────────────────────────────────────────────────────────────

/// Per-operation deadline for store requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between local-store readiness probes during bootstrap.
pub const CHECK_SLEEP: Duration = Duration::from_secs(1);

// ─── Key Schema ─────────────────────────────────────────────────────────────
//
// Each volume has three metadata keys. Each key terminates in the name
// of the volume, preceded by one of these prefixes. The prefixes must
// stay distinct and none may be a prefix of another.

/// Prefix of the per-volume State key.
pub const PREFIX_STATE: &str = "SVOL_stat_";

/// Prefix of the per-volume global refcount key.
pub const PREFIX_GREF: &str = "SVOL_gref_";

/// Prefix of the per-volume Info key (opaque driver metadata).
pub const PREFIX_INFO: &str = "SVOL_info_";

/// Global refcount value meaning "at least one host mounted".
pub const GREF_SINGLE: &str = "1";

/// Global refcount value meaning "no host mounted".
pub const GREF_NONE: &str = "0";

// ─── SMB Export ─────────────────────────────────────────────────────────────

/// Default root under which served volumes are mounted and exported.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/sharevol";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_not_prefixes_of_each_other() {
        let prefixes = [PREFIX_STATE, PREFIX_GREF, PREFIX_INFO];
        for a in &prefixes {
            for b in &prefixes {
                if a != b {
                    assert!(!a.starts_with(b), "{} is a prefix of {}", b, a);
                }
            }
        }
    }
}
