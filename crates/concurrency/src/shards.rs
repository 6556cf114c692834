//! One conflict registry per shard
//!
//! `ShardRegistries` keeps the registries of every open shard in a DashMap
//! keyed by [`ShardId`]. Shards never share a registry and no arbitration
//! happens across shards.
//!
//! Closing a shard closes its registry. Callers still holding the `Arc` of a
//! closed shard's registry see it empty, and any `register`, `prepare` or
//! `release` through it fails with [`RegistryError::Closed`].

use crate::registry::ConflictRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shardgate_core::config::RegistryConfig;
use shardgate_core::error::{RegistryError, Result};
use shardgate_core::types::ShardId;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{info, warn};

/// Table of per-shard conflict registries
pub struct ShardRegistries<T, K> {
    shards: DashMap<ShardId, Arc<ConflictRegistry<T, K>>>,
    config: RegistryConfig,
}

impl<T, K> ShardRegistries<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty table using the default registry configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty table; every shard opened gets `config`
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            shards: DashMap::new(),
            config,
        }
    }

    /// Open a fresh registry for `shard`
    ///
    /// # Errors
    ///
    /// [`RegistryError::ShardAlreadyOpen`] if the shard already has one.
    pub fn open_shard(&self, shard: ShardId) -> Result<Arc<ConflictRegistry<T, K>>> {
        match self.shards.entry(shard) {
            Entry::Occupied(_) => Err(RegistryError::ShardAlreadyOpen(shard)),
            Entry::Vacant(vacant) => {
                let registry = Arc::new(ConflictRegistry::for_shard(shard, self.config.clone()));
                vacant.insert(Arc::clone(&registry));
                info!(shard = %shard, "Opened conflict registry");
                Ok(registry)
            }
        }
    }

    /// Registry of an open shard
    pub fn shard(&self, shard: ShardId) -> Option<Arc<ConflictRegistry<T, K>>> {
        self.shards.get(&shard).map(|entry| Arc::clone(entry.value()))
    }

    /// Close `shard`, discarding its registry state
    ///
    /// Returns the ids of transactions that were still registered. Their
    /// coordinator never released them.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ShardNotOpen`] if the shard is not open.
    pub fn close_shard(&self, shard: ShardId) -> Result<Vec<T>> {
        let (_, registry) = self
            .shards
            .remove(&shard)
            .ok_or(RegistryError::ShardNotOpen(shard))?;

        let abandoned = registry.close();
        if !abandoned.is_empty() {
            warn!(
                shard = %shard,
                abandoned = abandoned.len(),
                "Closed shard with live transactions still registered"
            );
        }
        info!(shard = %shard, "Closed conflict registry");
        Ok(abandoned)
    }

    /// True if `shard` is open
    pub fn is_open(&self, shard: ShardId) -> bool {
        self.shards.contains_key(&shard)
    }

    /// Number of open shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Ids of open shards, sorted
    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.shards.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Registered transactions across all open shards
    pub fn total_transactions(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().size()).sum()
    }
}

impl<T, K> Default for ShardRegistries<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> std::fmt::Debug for ShardRegistries<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRegistries")
            .field("shard_count", &self.shard_count())
            .field("total_transactions", &self.total_transactions())
            .finish()
    }
}
