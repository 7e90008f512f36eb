//! # sharevol-proto
//!
//! Shared types for the sharevol cluster-shared volume plugin.
//!
//! This crate defines the error taxonomy, tunable defaults, node role
//! types, and the per-volume key schema shared by the daemon and any
//! future tooling. It performs no I/O.

pub mod defaults;
pub mod error;
pub mod node;
pub mod volume;

// Re-export commonly used types at the crate root
pub use error::{SvError, SvResult};
pub use node::{NodeInfo, NodeRole};
pub use volume::{KvPair, VolState};
