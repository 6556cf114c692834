//! Arbitration result of `prepare`

use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Outcome of preparing a transaction against its conflicting peers
///
/// Maps every peer sharing at least one contended key to `true` when the
/// preparing transaction wins against it (the peer had not prepared yet) or
/// `false` when the peer prepared first. An empty verdict means there was no
/// contention at all.
///
/// Losing is not an error. The coordinator decides what a loss means, usually
/// abort and retry.
#[derive(Debug, Clone)]
pub struct PrepareVerdict<T> {
    outcomes: FxHashMap<T, bool>,
}

impl<T: Eq + Hash> PrepareVerdict<T> {
    pub(crate) fn new(outcomes: FxHashMap<T, bool>) -> Self {
        Self { outcomes }
    }

    /// Outcome against `peer`, or `None` if it is not a peer
    pub fn get(&self, peer: &T) -> Option<bool> {
        self.outcomes.get(peer).copied()
    }

    /// True if there were no peers or every peer was beaten
    pub fn wins_all(&self) -> bool {
        self.outcomes.values().all(|won| *won)
    }

    /// Peers this transaction won against
    pub fn winners_against(&self) -> impl Iterator<Item = &T> {
        self.outcomes
            .iter()
            .filter(|(_, won)| **won)
            .map(|(peer, _)| peer)
    }

    /// Peers that prepared first
    pub fn lost_to(&self) -> impl Iterator<Item = &T> {
        self.outcomes
            .iter()
            .filter(|(_, won)| !**won)
            .map(|(peer, _)| peer)
    }

    /// Number of peers
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True if the transaction had no contended keys
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Iterate over `(peer, won)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&T, bool)> {
        self.outcomes.iter().map(|(peer, won)| (peer, *won))
    }

    /// Unwrap into the raw peer mapping
    pub fn into_map(self) -> FxHashMap<T, bool> {
        self.outcomes
    }
}

impl<T: Eq + Hash> PartialEq for PrepareVerdict<T> {
    fn eq(&self, other: &Self) -> bool {
        self.outcomes == other.outcomes
    }
}

impl<T: Eq + Hash> Eq for PrepareVerdict<T> {}

impl<T> Default for PrepareVerdict<T> {
    fn default() -> Self {
        Self {
            outcomes: FxHashMap::default(),
        }
    }
}
