//! Key and transaction indices
//!
//! `RegistryState` holds the two mutually-derived maps behind the registry:
//!
//! ```text
//! by_key:  key  -> { txn, ... }                 (holder index)
//! by_txn:  txn  -> { keys, conflicts, prepared } (declared keys, conflict set, mark)
//! ```
//!
//! Every method here mutates both maps together and assumes the caller holds
//! the registry lock. Precondition violations are detected before anything is
//! touched, so an `Err` always leaves the state as it was.

use rustc_hash::{FxHashMap, FxHashSet};
use shardgate_core::error::{RegistryError, Result};
use shardgate_core::types::ShardId;
use std::fmt::Debug;
use std::hash::Hash;

/// Per-transaction record
#[derive(Debug, Clone)]
pub(crate) struct TxnEntry<K> {
    /// Keys declared at registration
    pub(crate) keys: FxHashSet<K>,
    /// Declared keys that at least one other live transaction also declares
    pub(crate) conflicts: FxHashSet<K>,
    /// Set once by `prepare`, never cleared
    pub(crate) prepared: bool,
}

impl<K> TxnEntry<K> {
    fn new() -> Self {
        Self {
            keys: FxHashSet::default(),
            conflicts: FxHashSet::default(),
            prepared: false,
        }
    }
}

/// What `register` did, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegisterOutcome {
    pub(crate) declared: usize,
    pub(crate) contended: usize,
}

/// Both indices of one registry
#[derive(Debug)]
pub(crate) struct RegistryState<T, K> {
    pub(crate) by_key: FxHashMap<K, FxHashSet<T>>,
    pub(crate) by_txn: FxHashMap<T, TxnEntry<K>>,
    /// Set by `close`; every later register/prepare/release is rejected
    pub(crate) closed: bool,
    shard: Option<ShardId>,
}

impl<T, K> RegistryState<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            by_key: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            by_txn: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            closed: false,
            shard: None,
        }
    }

    /// Name `shard` in the error returned once this state is closed
    pub(crate) fn on_shard(mut self, shard: Option<ShardId>) -> Self {
        self.shard = shard;
        self
    }

    pub(crate) fn register<I>(&mut self, txn: &T, keys: I) -> Result<RegisterOutcome>
    where
        I: IntoIterator<Item = K>,
    {
        self.ensure_open()?;
        if self.by_txn.contains_key(txn) {
            return Err(RegistryError::already_registered(txn));
        }

        let mut entry = TxnEntry::new();
        for key in keys {
            if entry.keys.contains(&key) {
                continue;
            }
            let holders = self.by_key.entry(key.clone()).or_default();
            holders.insert(txn.clone());
            if holders.len() > 1 {
                // Holders beyond the first already carry the key from when
                // the second one arrived.
                if holders.len() == 2 {
                    for other in holders.iter().filter(|h| *h != txn) {
                        if let Some(other_entry) = self.by_txn.get_mut(other) {
                            other_entry.conflicts.insert(key.clone());
                        }
                    }
                }
                entry.conflicts.insert(key.clone());
            }
            entry.keys.insert(key);
        }

        let outcome = RegisterOutcome {
            declared: entry.keys.len(),
            contended: entry.conflicts.len(),
        };
        self.by_txn.insert(txn.clone(), entry);
        Ok(outcome)
    }

    /// Remove `txn` from both indices and return its final record
    pub(crate) fn release(&mut self, txn: &T) -> Result<TxnEntry<K>> {
        self.ensure_open()?;
        let entry = self
            .by_txn
            .remove(txn)
            .ok_or_else(|| RegistryError::not_registered(txn, "release"))?;

        for key in &entry.keys {
            let Some(holders) = self.by_key.get_mut(key) else {
                continue;
            };
            holders.remove(txn);
            match holders.len() {
                0 => {
                    self.by_key.remove(key);
                }
                1 => {
                    if let Some(survivor) = holders.iter().next() {
                        if let Some(survivor_entry) = self.by_txn.get_mut(survivor) {
                            survivor_entry.conflicts.remove(key);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(entry)
    }

    /// Mark `txn` prepared and return the verdict against every peer
    ///
    /// `true` means the peer had not prepared yet, so `txn` wins against it.
    pub(crate) fn prepare(&mut self, txn: &T) -> Result<FxHashMap<T, bool>> {
        self.ensure_open()?;
        let entry = self
            .by_txn
            .get(txn)
            .ok_or_else(|| RegistryError::not_registered(txn, "prepare"))?;
        if entry.prepared {
            return Err(RegistryError::already_prepared(txn));
        }

        let mut outcomes = FxHashMap::default();
        for key in &entry.conflicts {
            let Some(holders) = self.by_key.get(key) else {
                continue;
            };
            for peer in holders.iter().filter(|h| *h != txn) {
                if outcomes.contains_key(peer) {
                    continue;
                }
                let peer_prepared = self.by_txn.get(peer).is_some_and(|e| e.prepared);
                outcomes.insert(peer.clone(), !peer_prepared);
            }
        }

        if let Some(entry) = self.by_txn.get_mut(txn) {
            entry.prepared = true;
        }
        Ok(outcomes)
    }

    /// Reject all further mutations and remove every transaction, returning
    /// their ids. Closing twice returns nothing the second time.
    pub(crate) fn close(&mut self) -> Vec<T> {
        self.closed = true;
        self.by_key.clear();
        self.by_txn.drain().map(|(txn, _)| txn).collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RegistryError::closed(self.shard));
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.by_txn.len()
    }

    pub(crate) fn contended_key_count(&self) -> usize {
        self.by_key.values().filter(|h| h.len() > 1).count()
    }

    pub(crate) fn prepared_count(&self) -> usize {
        self.by_txn.values().filter(|e| e.prepared).count()
    }
}
