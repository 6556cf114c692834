//! # shardgate
//!
//! Shard-level transaction conflict registry.
//!
//! A shard coordinator admits multi-key transactions, declares the keys each
//! one will touch, and asks the registry at commit-validation time whether the
//! transaction may proceed against the peers it overlaps with. The first
//! transaction to prepare wins against every peer that has not prepared yet.
//!
//! ## Quick Start
//!
//! ```
//! use shardgate::prelude::*;
//!
//! let shards: ShardRegistries<TxnId, String> = ShardRegistries::new();
//! let registry = shards.open_shard(ShardId::new(0))?;
//! let ids = TxnIdAllocator::new();
//!
//! let t1 = ids.next();
//! let t2 = ids.next();
//! registry.register(t1, ["doc-a".to_string(), "doc-b".to_string()]);
//! registry.register(t2, ["doc-b".to_string()]);
//!
//! // t1 prepares first and wins against t2
//! assert!(registry.prepare(&t1).wins_all());
//! assert_eq!(registry.prepare(&t2).get(&t1), Some(false));
//!
//! // Release unconditionally, whatever the outcome
//! registry.release(&t1);
//! registry.release(&t2);
//! assert!(shards.close_shard(ShardId::new(0))?.is_empty());
//! # Ok::<(), RegistryError>(())
//! ```
//!
//! ## Crates
//!
//! - [`shardgate_core`] - Identifiers, errors, configuration
//! - [`shardgate_concurrency`] - The registry, verdicts, consistency check,
//!   per-shard table

#![warn(missing_docs)]

pub mod prelude;

pub use shardgate_concurrency::{
    ConflictRegistry, ConsistencyReport, PrepareVerdict, RegistryStats, ShardRegistries,
    Violation,
};
pub use shardgate_core::{
    RegistryConfig, RegistryError, Result, ShardId, TxnId, TxnIdAllocator,
};
