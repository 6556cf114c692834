//! Identifier types shared across the workspace
//!
//! This module defines the identifiers a shard coordinator hands to the
//! conflict registry:
//! - [`TxnId`]: Opaque handle for one in-flight transaction
//! - [`ShardId`]: Identifier of the storage shard a registry belongs to
//! - [`TxnIdAllocator`]: Monotonic source of fresh [`TxnId`]s

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an in-flight transaction
///
/// The registry only ever compares TxnIds for equality; ordering and the
/// numeric value carry no meaning to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Wrap a raw transaction number
    ///
    /// # Examples
    ///
    /// ```
    /// use shardgate_core::types::TxnId;
    ///
    /// let id = TxnId::new(7);
    /// assert_eq!(id.as_u64(), 7);
    /// ```
    pub const fn new(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Get the raw transaction number
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TxnId {
    fn from(raw: u64) -> Self {
        TxnId(raw)
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Identifier of a storage shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(u32);

impl ShardId {
    /// Wrap a raw shard number
    pub const fn new(raw: u32) -> Self {
        ShardId(raw)
    }

    /// Get the raw shard number
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ShardId {
    fn from(raw: u32) -> Self {
        ShardId(raw)
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Allocates transaction identifiers
///
/// Monotonically increasing, never reuses a value. The last id handed out is
/// `u64::MAX - 1`; asking for another panics instead of wrapping. The
/// conflict registry never allocates identifiers itself; a coordinator owns
/// one of these (or any other source of unique ids) and passes the results in.
///
/// # Thread Safety
///
/// `next()` is a single atomic compare-and-swap loop, so concurrent callers
/// always receive distinct ids.
#[derive(Debug)]
pub struct TxnIdAllocator {
    next: AtomicU64,
}

impl TxnIdAllocator {
    /// Create an allocator whose first id is 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an allocator whose first id is `first`
    ///
    /// Used when ids below `first` may still be referenced elsewhere.
    pub fn starting_at(first: u64) -> Self {
        TxnIdAllocator {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next transaction id
    ///
    /// # Panics
    ///
    /// If the id space is exhausted. Ids never wrap.
    pub fn next(&self) -> TxnId {
        match self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
        {
            Ok(id) => TxnId(id),
            Err(_) => panic!("transaction id space exhausted"),
        }
    }

    /// Peek at the id the next call to [`next`](Self::next) would return
    pub fn peek(&self) -> TxnId {
        TxnId(self.next.load(Ordering::SeqCst))
    }
}

impl Default for TxnIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
