//! Concurrency layer for shardgate
//!
//! This crate implements shard-level conflict arbitration with:
//! - ConflictRegistry: Key and transaction indices behind one lock
//! - PrepareVerdict: First-to-prepare-wins outcome against each peer
//! - ConsistencyReport: Cross-check of the two indices
//! - ShardRegistries: One registry per open shard

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consistency;
mod index;
pub mod registry;
pub mod shards;
pub mod verdict;

pub use consistency::{ConsistencyReport, Violation};
pub use registry::{ConflictRegistry, RegistryStats};
pub use shards::ShardRegistries;
pub use verdict::PrepareVerdict;

// Re-export the shared types for convenience
pub use shardgate_core::{RegistryConfig, RegistryError, ShardId, TxnId};
