/// Volume state machine values and the per-volume key schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::defaults::{PREFIX_GREF, PREFIX_INFO, PREFIX_STATE};

/// Lifecycle state of a shared volume, stored as a string under the
/// volume's State key.
///
/// The coordination core only drives the `Ready`/`Intermediate`/
/// `Mounted`/`Error` cycle; `Creating` and `Deleting` belong to the
/// external volume driver and are opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolState {
    /// Volume metadata is being created.
    Creating,
    /// Metadata exists, no host currently serves SMB for this volume.
    Ready,
    /// Exactly one host has won a serve/release transition.
    Intermediate,
    /// Exactly one host is serving SMB; clients may mount.
    Mounted,
    /// Volume metadata is being removed.
    Deleting,
    /// A transition failed; operator intervention required.
    Error,
}

impl VolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolState::Creating => "Creating",
            VolState::Ready => "Ready",
            VolState::Intermediate => "Intermediate",
            VolState::Mounted => "Mounted",
            VolState::Deleting => "Deleting",
            VolState::Error => "Error",
        }
    }
}

impl fmt::Display for VolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" => Ok(VolState::Creating),
            "Ready" => Ok(VolState::Ready),
            "Intermediate" => Ok(VolState::Intermediate),
            "Mounted" => Ok(VolState::Mounted),
            "Deleting" => Ok(VolState::Deleting),
            "Error" => Ok(VolState::Error),
            other => Err(format!("unknown volume state: {}", other)),
        }
    }
}

/// A key/value pair as stored in the replicated store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// State key for a volume name.
pub fn state_key(name: &str) -> String {
    format!("{}{}", PREFIX_STATE, name)
}

/// Global refcount key for a volume name.
pub fn gref_key(name: &str) -> String {
    format!("{}{}", PREFIX_GREF, name)
}

/// Info key for a volume name.
pub fn info_key(name: &str) -> String {
    format!("{}{}", PREFIX_INFO, name)
}

/// Strip a known prefix off a full key, yielding the volume name.
///
/// Returns `None` if the key does not carry the prefix.
pub fn volume_name<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            VolState::Creating,
            VolState::Ready,
            VolState::Intermediate,
            VolState::Mounted,
            VolState::Deleting,
            VolState::Error,
        ] {
            assert_eq!(state.as_str().parse::<VolState>().unwrap(), state);
        }
        assert!("Exploded".parse::<VolState>().is_err());
    }

    #[test]
    fn test_key_schema() {
        assert_eq!(state_key("vol1"), "SVOL_stat_vol1");
        assert_eq!(gref_key("vol1"), "SVOL_gref_vol1");
        assert_eq!(info_key("vol1"), "SVOL_info_vol1");
        assert_eq!(volume_name("SVOL_gref_vol1", PREFIX_GREF), Some("vol1"));
        assert_eq!(volume_name("SVOL_stat_vol1", PREFIX_GREF), None);
    }
}
