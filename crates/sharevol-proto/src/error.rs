/// Sharevol error types.
///
/// One enum covers every failure class the coordination core can
/// surface. Partial volume metadata (some keys present, some missing)
/// is deliberately NOT represented here: it violates the write
/// atomicity contract and the reader panics instead of returning.

use serde::{Deserialize, Serialize};

/// Unified error type for all sharevol operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SvError {
    /// The container orchestrator could not be reached or gave an
    /// unusable answer. Fatal for bootstrap, never for the process.
    #[error("orchestrator unavailable: {0}")]
    Orchestrator(String),

    /// The orchestrator reports no cluster leader.
    #[error("no cluster leader found")]
    NoLeader,

    /// The locally spawned store did not accept a client connection
    /// before the bootstrap window closed.
    #[error("store did not come up before timeout")]
    BootstrapTimeout,

    /// A store RPC failed or timed out.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// None of the requested metadata keys exist.
    #[error("no such volume")]
    VolumeDoesNotExist,

    /// The store subprocess could not be spawned.
    #[error("failed to spawn store process: {0}")]
    StoreSpawn(String),
}

/// Result type alias for sharevol operations.
pub type SvResult<T> = Result<T, SvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SvError::NoLeader.to_string(), "no cluster leader found");
        assert_eq!(
            SvError::StoreUnavailable("deadline exceeded".into()).to_string(),
            "store unavailable: deadline exceeded"
        );
    }
}
