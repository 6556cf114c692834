//! Consistency check over the registry indices
//!
//! [`check`] is a pure function: it reads both indices and reports every
//! place where they disagree. It never runs on the normal call path; tests
//! call it directly and registries configured with `verify_after_mutation`
//! run it after each mutation.
//!
//! Checked properties:
//! - Every holder of a key is registered and declares that key
//! - Every declared key lists its transaction as a holder
//! - No key is indexed with an empty holder set
//! - A transaction's conflict set is exactly its declared keys with more than
//!   one holder

use crate::index::RegistryState;
use shardgate_core::error::{RegistryError, Result};
use std::fmt::{self, Debug};
use std::hash::Hash;

/// One disagreement between the indices
///
/// Keys and transaction ids are rendered with `Debug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Holder set names a transaction that is not registered
    HolderNotRegistered {
        /// Indexed key
        key: String,
        /// Unknown holder
        txn: String,
    },
    /// Holder set names a transaction that did not declare the key
    HolderNotDeclared {
        /// Indexed key
        key: String,
        /// Holder lacking the declaration
        txn: String,
    },
    /// Declared key whose holder set does not list the transaction
    MissingHolder {
        /// Declared key
        key: String,
        /// Transaction absent from the holder set
        txn: String,
    },
    /// Key indexed with no holders
    EmptyHolderSet {
        /// Indexed key
        key: String,
    },
    /// Conflict set differs from the contended subset of declared keys
    ConflictMismatch {
        /// Transaction whose conflict set is wrong
        txn: String,
        /// Contended keys absent from the conflict set
        missing: Vec<String>,
        /// Keys in the conflict set that are not contended
        unexpected: Vec<String>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::HolderNotRegistered { key, txn } => {
                write!(f, "key {} held by unregistered transaction {}", key, txn)
            }
            Violation::HolderNotDeclared { key, txn } => {
                write!(f, "key {} held by {} which did not declare it", key, txn)
            }
            Violation::MissingHolder { key, txn } => {
                write!(f, "{} declares key {} but is not among its holders", txn, key)
            }
            Violation::EmptyHolderSet { key } => write!(f, "key {} has no holders", key),
            Violation::ConflictMismatch {
                txn,
                missing,
                unexpected,
            } => write!(
                f,
                "conflict set of {} is missing [{}] and has extra [{}]",
                txn,
                missing.join(", "),
                unexpected.join(", ")
            ),
        }
    }
}

/// Result of a consistency check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    violations: Vec<Violation>,
    transactions_checked: usize,
    keys_checked: usize,
}

impl ConsistencyReport {
    /// True if no violations were found
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    /// All violations found
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of registered transactions inspected
    pub fn transactions_checked(&self) -> usize {
        self.transactions_checked
    }

    /// Number of indexed keys inspected
    pub fn keys_checked(&self) -> usize {
        self.keys_checked
    }

    /// Convert into `Ok(())` or [`RegistryError::Inconsistent`]
    pub fn into_result(self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        Err(RegistryError::Inconsistent {
            violations: self.violations.len(),
            detail: self.to_string(),
        })
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() {
            return write!(
                f,
                "consistent ({} transactions, {} keys)",
                self.transactions_checked, self.keys_checked
            );
        }
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

fn render(value: &impl Debug) -> String {
    format!("{:?}", value)
}

/// Check both indices of `state` against each other
pub(crate) fn check<T, K>(state: &RegistryState<T, K>) -> ConsistencyReport
where
    T: Eq + Hash + Clone + Debug,
    K: Eq + Hash + Clone + Debug,
{
    let mut violations = Vec::new();

    for (key, holders) in &state.by_key {
        if holders.is_empty() {
            violations.push(Violation::EmptyHolderSet { key: render(key) });
        }
        for txn in holders {
            match state.by_txn.get(txn) {
                None => violations.push(Violation::HolderNotRegistered {
                    key: render(key),
                    txn: render(txn),
                }),
                Some(entry) if !entry.keys.contains(key) => {
                    violations.push(Violation::HolderNotDeclared {
                        key: render(key),
                        txn: render(txn),
                    })
                }
                Some(_) => {}
            }
        }
    }

    for (txn, entry) in &state.by_txn {
        let mut missing = Vec::new();
        for key in &entry.keys {
            let holders = state.by_key.get(key);
            if !holders.is_some_and(|h| h.contains(txn)) {
                violations.push(Violation::MissingHolder {
                    key: render(key),
                    txn: render(txn),
                });
            }
            let contended = holders.is_some_and(|h| h.len() > 1);
            if contended && !entry.conflicts.contains(key) {
                missing.push(render(key));
            }
        }

        let mut unexpected: Vec<String> = entry
            .conflicts
            .iter()
            .filter(|key| {
                !entry.keys.contains(*key)
                    || !state.by_key.get(*key).is_some_and(|h| h.len() > 1)
            })
            .map(render)
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            missing.sort();
            unexpected.sort();
            violations.push(Violation::ConflictMismatch {
                txn: render(txn),
                missing,
                unexpected,
            });
        }
    }

    ConsistencyReport {
        violations,
        transactions_checked: state.by_txn.len(),
        keys_checked: state.by_key.len(),
    }
}
