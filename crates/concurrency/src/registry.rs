//! Conflict registry for one storage shard
//!
//! Tracks the keys every admitted transaction declared, detects overlap, and
//! arbitrates at prepare time which side of a conflicting pair proceeds.
//!
//! ## Protocol
//!
//! ```text
//! 1. register(txn, keys) - on admission; records keys, marks contended keys
//! 2. prepare(txn)        - during commit validation; irrevocable mark + verdict
//! 3. release(txn)        - on commit OR abort; erases every trace of txn
//! ```
//!
//! Per transaction: `Unregistered -> Registered -> Prepared -> removed`, where
//! `release` may also go straight from `Registered` to removed. Nothing ever
//! returns to `Registered`. Id uniqueness is the allocator's job; the registry
//! keeps no memory of released ids and does not enforce it.
//!
//! Once closed, a registry is empty for good: `register`, `prepare` and
//! `release` fail with [`RegistryError::Closed`].
//!
//! ## Arbitration
//!
//! First to prepare wins. `prepare(t)` reports `true` against every peer that
//! has not prepared yet and `false` against every peer that already has. The
//! verdict is only meaningful because all calls are serialized through one
//! lock: whichever `prepare` the lock admits first necessarily sees its peer
//! unprepared.

use crate::consistency::{self, ConsistencyReport};
use crate::index::RegistryState;
use crate::verdict::PrepareVerdict;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use shardgate_core::config::RegistryConfig;
use shardgate_core::error::{RegistryError, Result};
use shardgate_core::types::ShardId;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, error};

/// Point-in-time counters for a registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered transactions
    pub transactions: usize,
    /// Registered transactions that have prepared
    pub prepared: usize,
    /// Keys with at least one holder
    pub indexed_keys: usize,
    /// Keys with more than one holder
    pub contended_keys: usize,
}

/// Shard-level transaction conflict registry
///
/// Generic over the transaction id type `T` and key type `K`. Ids are
/// allocated by the caller and compared only for equality.
///
/// # Thread Safety
///
/// Every operation, including the read-only ones, runs under a single
/// registry-wide lock. Calls are fully serialized, so the index invariants
/// can be reasoned about as if the registry were single-threaded.
///
/// # Precondition Violations
///
/// Double register, prepare or release of an unregistered id, and double
/// prepare are coordinator bugs. `register`, `prepare` and `release` log an
/// error and panic on them. The `try_` variants return the
/// [`RegistryError`] instead and leave the registry untouched; callers must
/// still treat it as fatal.
///
/// # Example
///
/// ```
/// use shardgate_concurrency::ConflictRegistry;
///
/// let registry: ConflictRegistry<u64, &str> = ConflictRegistry::new();
/// registry.register(1, ["a", "b"]);
/// registry.register(2, ["b", "c"]);
///
/// let verdict = registry.prepare(&1);
/// assert_eq!(verdict.get(&2), Some(true));
///
/// registry.release(&1);
/// registry.release(&2);
/// assert_eq!(registry.size(), 0);
/// ```
pub struct ConflictRegistry<T, K> {
    state: Mutex<RegistryState<T, K>>,
    config: RegistryConfig,
    /// Only used to label log events
    shard: Option<ShardId>,
}

impl<T, K> ConflictRegistry<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    /// Create a registry with the default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with the given configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState::with_capacity(config.initial_capacity)),
            config,
            shard: None,
        }
    }

    /// Create a registry whose log events and errors carry `shard`
    pub fn for_shard(shard: ShardId, config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(
                RegistryState::with_capacity(config.initial_capacity).on_shard(Some(shard)),
            ),
            config,
            shard: Some(shard),
        }
    }

    /// Shard this registry was created for, if any
    pub fn shard(&self) -> Option<ShardId> {
        self.shard
    }

    /// Configuration in effect
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Register `txn` as holding `keys`
    ///
    /// Duplicate keys collapse into one declaration; an empty key set is
    /// allowed. Every key that now has more than one holder enters the
    /// conflict set of each of its holders.
    ///
    /// # Panics
    ///
    /// If `txn` is already registered or the registry is closed.
    #[track_caller]
    pub fn register<I>(&self, txn: T, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        if let Err(e) = self.try_register(txn, keys) {
            self.fatal(e);
        }
    }

    /// Register `txn`, returning an error instead of panicking
    pub fn try_register<I>(&self, txn: T, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
    {
        let mut state = self.state.lock();
        let outcome = state.register(&txn, keys)?;
        self.verify(&state);
        drop(state);

        debug!(
            shard = ?self.shard,
            txn = ?txn,
            keys = outcome.declared,
            contended = outcome.contended,
            "Registered transaction"
        );
        Ok(())
    }

    /// Prepare `txn` and arbitrate against its conflicting peers
    ///
    /// Sets the prepared mark irrevocably. The returned verdict holds one
    /// entry per peer sharing at least one key with `txn`: `true` if the peer
    /// had not prepared yet (`txn` wins), `false` if it had. Nothing is
    /// removed or aborted here.
    ///
    /// # Panics
    ///
    /// If `txn` is not registered, has already prepared, or the registry is
    /// closed.
    #[track_caller]
    pub fn prepare(&self, txn: &T) -> PrepareVerdict<T> {
        match self.try_prepare(txn) {
            Ok(verdict) => verdict,
            Err(e) => self.fatal(e),
        }
    }

    /// Prepare `txn`, returning an error instead of panicking
    pub fn try_prepare(&self, txn: &T) -> Result<PrepareVerdict<T>> {
        let mut state = self.state.lock();
        let verdict = PrepareVerdict::new(state.prepare(txn)?);
        self.verify(&state);
        drop(state);

        debug!(
            shard = ?self.shard,
            txn = ?txn,
            peers = verdict.len(),
            lost = verdict.lost_to().count(),
            "Prepared transaction"
        );
        Ok(verdict)
    }

    /// Release `txn`, whatever its outcome
    ///
    /// Removes `txn` from every holder set, drops keys nobody holds anymore,
    /// and clears the contended mark of a key left with a single holder.
    ///
    /// # Panics
    ///
    /// If `txn` is not registered, including when it was already released, or
    /// the registry is closed.
    #[track_caller]
    pub fn release(&self, txn: &T) {
        if let Err(e) = self.try_release(txn) {
            self.fatal(e);
        }
    }

    /// Release `txn`, returning an error instead of panicking
    pub fn try_release(&self, txn: &T) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.release(txn)?;
        self.verify(&state);
        drop(state);

        debug!(
            shard = ?self.shard,
            txn = ?txn,
            keys = entry.keys.len(),
            prepared = entry.prepared,
            "Released transaction"
        );
        Ok(())
    }

    /// Close the registry, returning the ids still registered
    ///
    /// Used when the shard closes. Transactions still registered at that
    /// point were abandoned by their coordinator. Emptying the indices and
    /// rejecting later mutations happen under one lock acquisition, so no
    /// `register` can slip in between. Closing again returns nothing.
    pub fn close(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let abandoned = state.close();
        self.verify(&state);
        abandoned
    }

    /// True once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of registered transactions
    pub fn size(&self) -> usize {
        self.state.lock().len()
    }

    /// True if no transaction is registered
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Keys `txn` declared, or `None` if it is not registered
    pub fn keys_of(&self, txn: &T) -> Option<FxHashSet<K>> {
        self.state.lock().by_txn.get(txn).map(|e| e.keys.clone())
    }

    /// Declared keys of `txn` that another live transaction also declared
    pub fn conflicts_of(&self, txn: &T) -> Option<FxHashSet<K>> {
        self.state.lock().by_txn.get(txn).map(|e| e.conflicts.clone())
    }

    /// Transactions currently declaring `key`
    pub fn holders_of(&self, key: &K) -> FxHashSet<T> {
        self.state
            .lock()
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// True if `txn` is registered
    pub fn is_registered(&self, txn: &T) -> bool {
        self.state.lock().by_txn.contains_key(txn)
    }

    /// True if `txn` is registered and has prepared
    pub fn is_prepared(&self, txn: &T) -> bool {
        self.state
            .lock()
            .by_txn
            .get(txn)
            .is_some_and(|e| e.prepared)
    }

    /// Current counters
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            transactions: state.len(),
            prepared: state.prepared_count(),
            indexed_keys: state.by_key.len(),
            contended_keys: state.contended_key_count(),
        }
    }

    /// Check that the key and transaction indices agree
    pub fn check_consistency(&self) -> ConsistencyReport {
        let state = self.state.lock();
        consistency::check(&*state)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn verify(&self, state: &RegistryState<T, K>) {
        if !self.config.verify_after_mutation {
            return;
        }
        if let Err(e) = consistency::check(state).into_result() {
            self.fatal(e);
        }
    }

    #[cold]
    #[track_caller]
    fn fatal(&self, err: RegistryError) -> ! {
        error!(shard = ?self.shard, error = %err, "Conflict registry coordination failure");
        panic!("{}", err)
    }
}

impl<T, K> Default for ConflictRegistry<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> std::fmt::Debug for ConflictRegistry<T, K>
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictRegistry")
            .field("shard", &self.shard)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    type Registry = ConflictRegistry<u64, &'static str>;

    fn set(keys: &[&'static str]) -> FxHashSet<&'static str> {
        keys.iter().copied().collect()
    }

    fn checked() -> Registry {
        ConflictRegistry::with_config(RegistryConfig::new().verify_after_mutation(true))
    }

    #[test]
    fn test_registry_creation() {
        let registry = Registry::new();
        assert_eq!(registry.size(), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.shard(), None);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn test_for_shard_labels_registry() {
        let registry: Registry =
            ConflictRegistry::for_shard(ShardId::new(5), RegistryConfig::new());
        assert_eq!(registry.shard(), Some(ShardId::new(5)));
        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("ConflictRegistry"));
        assert!(debug_str.contains("stats"));
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    #[test]
    fn test_overlapping_pair_first_prepare_wins() {
        let registry = checked();
        registry.register(1, ["a", "b"]);
        registry.register(2, ["b", "c"]);

        assert_eq!(registry.conflicts_of(&1), Some(set(&["b"])));
        assert_eq!(registry.conflicts_of(&2), Some(set(&["b"])));

        let first = registry.prepare(&1);
        assert_eq!(first.len(), 1);
        assert_eq!(first.get(&2), Some(true));
        assert!(first.wins_all());

        let second = registry.prepare(&2);
        assert_eq!(second.len(), 1);
        assert_eq!(second.get(&1), Some(false));
        assert!(!second.wins_all());
    }

    #[test]
    fn test_uncontended_prepare_is_empty() {
        let registry = checked();
        registry.register(1, ["x"]);
        let verdict = registry.prepare(&1);
        assert!(verdict.is_empty());
        assert!(verdict.wins_all());
        registry.release(&1);
        assert_eq!(registry.size(), 0);
        assert!(registry.holders_of(&"x").is_empty());
    }

    #[test]
    fn test_survivor_loses_contended_mark() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.register(2, ["a"]);
        registry.register(3, ["a"]);

        registry.release(&2);
        assert!(registry.conflicts_of(&1).unwrap().contains("a"));
        assert!(registry.conflicts_of(&3).unwrap().contains("a"));

        registry.release(&3);
        assert!(registry.conflicts_of(&1).unwrap().is_empty());
        assert_eq!(
            registry.holders_of(&"a"),
            [1].into_iter().collect::<FxHashSet<_>>()
        );
    }

    #[test]
    fn test_disjoint_keys_never_conflict() {
        let registry = checked();
        registry.register(1, ["a", "b"]);
        registry.register(2, ["c", "d"]);
        assert!(registry.conflicts_of(&1).unwrap().is_empty());
        assert!(registry.conflicts_of(&2).unwrap().is_empty());
        assert!(registry.prepare(&1).is_empty());
        assert!(registry.prepare(&2).is_empty());
    }

    #[test]
    fn test_empty_key_set() {
        let registry = checked();
        registry.register(1, std::iter::empty());
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.keys_of(&1), Some(FxHashSet::default()));
        assert!(registry.prepare(&1).is_empty());
        registry.release(&1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_then_release_restores_state() {
        let registry = checked();
        registry.register(1, ["a", "b"]);
        let before_a = registry.holders_of(&"a");
        let before_stats = registry.stats();

        registry.register(2, ["a", "z"]);
        registry.release(&2);

        assert_eq!(registry.holders_of(&"a"), before_a);
        assert!(registry.holders_of(&"z").is_empty());
        assert_eq!(registry.stats(), before_stats);
        assert!(registry.conflicts_of(&1).unwrap().is_empty());
    }

    #[test]
    fn test_released_id_can_register_again() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.register(2, ["a"]);
        registry.prepare(&1);
        registry.release(&1);

        // No memory of the released id: it comes back unprepared
        registry.register(1, ["b"]);
        assert!(!registry.is_prepared(&1));
        assert!(registry.conflicts_of(&1).unwrap().is_empty());
        assert!(registry.conflicts_of(&2).unwrap().is_empty());
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_peer_counted_once_across_shared_keys() {
        let registry = checked();
        registry.register(1, ["a", "b"]);
        registry.register(2, ["a", "b"]);
        registry.register(3, ["b"]);
        let verdict = registry.prepare(&1);
        assert_eq!(verdict.len(), 2);
        assert_eq!(verdict.get(&2), Some(true));
        assert_eq!(verdict.get(&3), Some(true));
    }

    #[test]
    fn test_mixed_verdict_against_prepared_and_unprepared_peers() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.register(2, ["a", "b"]);
        registry.register(3, ["b"]);
        registry.prepare(&3);

        let verdict = registry.prepare(&2);
        assert_eq!(verdict.get(&1), Some(true));
        assert_eq!(verdict.get(&3), Some(false));
        assert_eq!(verdict.lost_to().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_prepared_peer_released_no_longer_reported() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.register(2, ["a"]);
        registry.prepare(&1);
        registry.release(&1);
        assert!(registry.prepare(&2).is_empty());
    }

    #[test]
    fn test_release_after_prepare() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.prepare(&1);
        assert!(registry.is_prepared(&1));
        registry.release(&1);
        assert!(!registry.is_registered(&1));
        assert!(!registry.is_prepared(&1));
        assert_eq!(registry.keys_of(&1), None);
    }

    #[test]
    fn test_stats() {
        let registry = checked();
        registry.register(1, ["a", "b"]);
        registry.register(2, ["b"]);
        registry.prepare(&2);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                transactions: 2,
                prepared: 1,
                indexed_keys: 2,
                contended_keys: 1,
            }
        );
    }

    #[test]
    fn test_close() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.register(2, ["a"]);
        assert!(!registry.is_closed());

        let mut abandoned = registry.close();
        abandoned.sort();
        assert_eq!(abandoned, vec![1, 2]);
        assert!(registry.is_closed());
        assert!(registry.is_empty());
        assert!(registry.check_consistency().is_consistent());
        assert!(registry.close().is_empty());
    }

    #[test]
    fn test_closed_registry_rejects_protocol_calls() {
        let registry = checked();
        registry.register(1, ["a"]);
        registry.close();

        assert_eq!(
            registry.try_register(2, ["a"]).unwrap_err(),
            RegistryError::closed(None)
        );
        assert_eq!(registry.try_prepare(&1).unwrap_err(), RegistryError::closed(None));
        assert_eq!(registry.try_release(&1).unwrap_err(), RegistryError::closed(None));
        assert!(registry.is_empty());
        assert!(registry.holders_of(&"a").is_empty());
    }

    #[test]
    #[should_panic(expected = "conflict registry is closed")]
    fn test_register_after_close_is_fatal() {
        let registry = Registry::new();
        registry.close();
        registry.register(1, ["a"]);
    }

    #[test]
    #[should_panic(expected = "registry of shard-5 is closed")]
    fn test_prepare_after_close_is_fatal() {
        let registry: Registry =
            ConflictRegistry::for_shard(ShardId::new(5), RegistryConfig::new());
        registry.register(1, ["a"]);
        registry.close();
        registry.prepare(&1);
    }

    // ========================================================================
    // Precondition violations
    // ========================================================================

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_double_register_is_fatal() {
        let registry = Registry::new();
        registry.register(1, ["a"]);
        registry.register(1, ["b"]);
    }

    #[test]
    #[should_panic(expected = "prepare called on unregistered transaction")]
    fn test_prepare_unregistered_is_fatal() {
        let registry = Registry::new();
        registry.prepare(&1);
    }

    #[test]
    #[should_panic(expected = "already prepared")]
    fn test_double_prepare_is_fatal() {
        let registry = Registry::new();
        registry.register(1, ["a"]);
        registry.prepare(&1);
        registry.prepare(&1);
    }

    #[test]
    #[should_panic(expected = "release called on unregistered transaction")]
    fn test_double_release_is_fatal() {
        let registry = Registry::new();
        registry.register(1, ["a"]);
        registry.release(&1);
        registry.release(&1);
    }

    #[test]
    fn test_try_variants_leave_state_untouched() {
        let registry = checked();
        registry.register(1, ["a"]);

        let err = registry.try_register(1, ["b"]).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        assert!(err.is_precondition_violation());
        assert_eq!(registry.keys_of(&1), Some(set(&["a"])));
        assert!(registry.holders_of(&"b").is_empty());

        let err = registry.try_prepare(&2).unwrap_err();
        assert_eq!(err, RegistryError::not_registered(&2u64, "prepare"));

        registry.prepare(&1);
        let err = registry.try_prepare(&1).unwrap_err();
        assert_eq!(err, RegistryError::already_prepared(&1u64));
        assert!(registry.is_prepared(&1));

        let err = registry.try_release(&2).unwrap_err();
        assert_eq!(err, RegistryError::not_registered(&2u64, "release"));
        assert_eq!(registry.size(), 1);
        assert!(registry.check_consistency().is_consistent());
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[test]
    fn test_concurrent_prepare_has_exactly_one_winner() {
        use std::thread;

        for _ in 0..50 {
            let registry = Arc::new(Registry::new());
            registry.register(1, ["hot"]);
            registry.register(2, ["hot"]);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [1u64, 2]
                .into_iter()
                .map(|txn| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        registry.prepare(&txn).wins_all()
                    })
                })
                .collect();

            let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(wins.iter().filter(|w| **w).count(), 1, "wins: {:?}", wins);
        }
    }

    #[test]
    fn test_concurrent_register_release_stays_consistent() {
        use std::thread;

        let registry: Arc<ConflictRegistry<u64, u32>> = Arc::new(ConflictRegistry::new());
        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let txn = worker * 1_000 + i;
                        let keys = [(i % 7) as u32, (i % 11) as u32 + 100];
                        registry.register(txn, keys);
                        if i % 3 == 0 {
                            registry.prepare(&txn);
                        }
                        registry.release(&txn);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(registry.is_empty());
        assert_eq!(registry.stats().indexed_keys, 0);
        assert!(registry.check_consistency().is_consistent());
    }
}
