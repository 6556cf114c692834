//! Error types for registry coordination failures
//!
//! Every variant here describes a caller bug or an index that has drifted
//! out of consistency. Losing arbitration in `prepare` is NOT an error; it is
//! reported through the prepare verdict.

use crate::types::ShardId;
use thiserror::Error;

/// Coordination errors raised by the conflict registry and shard table
///
/// Transaction ids are carried as their `Debug` rendering so the error type
/// stays independent of the id type a registry is instantiated with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `register` called for an id that is still registered
    #[error("transaction {txn} is already registered")]
    AlreadyRegistered {
        /// Offending transaction id
        txn: String,
    },

    /// `prepare` or `release` called for an id that is not registered
    #[error("{operation} called on unregistered transaction {txn}")]
    NotRegistered {
        /// Offending transaction id
        txn: String,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// `prepare` called twice for the same id
    #[error("transaction {txn} is already prepared")]
    AlreadyPrepared {
        /// Offending transaction id
        txn: String,
    },

    /// The key and transaction indices disagree
    #[error("registry index is inconsistent ({violations} violation(s)): {detail}")]
    Inconsistent {
        /// Number of violations found
        violations: usize,
        /// Rendering of the violations
        detail: String,
    },

    /// A registry is already open for this shard
    #[error("{0} already has an open registry")]
    ShardAlreadyOpen(ShardId),

    /// No registry is open for this shard
    #[error("{0} has no open registry")]
    ShardNotOpen(ShardId),

    /// `register`, `prepare` or `release` reached a registry after it was closed
    #[error("{} is closed", closed_target(.shard))]
    Closed {
        /// Shard the registry belonged to, if it was opened for one
        shard: Option<ShardId>,
    },
}

fn closed_target(shard: &Option<ShardId>) -> String {
    match shard {
        Some(shard) => format!("registry of {}", shard),
        None => "conflict registry".to_string(),
    }
}

impl RegistryError {
    /// Build an [`AlreadyRegistered`](Self::AlreadyRegistered) error
    pub fn already_registered(txn: &impl std::fmt::Debug) -> Self {
        RegistryError::AlreadyRegistered {
            txn: format!("{:?}", txn),
        }
    }

    /// Build a [`NotRegistered`](Self::NotRegistered) error
    pub fn not_registered(txn: &impl std::fmt::Debug, operation: &'static str) -> Self {
        RegistryError::NotRegistered {
            txn: format!("{:?}", txn),
            operation,
        }
    }

    /// Build an [`AlreadyPrepared`](Self::AlreadyPrepared) error
    pub fn already_prepared(txn: &impl std::fmt::Debug) -> Self {
        RegistryError::AlreadyPrepared {
            txn: format!("{:?}", txn),
        }
    }

    /// Build a [`Closed`](Self::Closed) error
    pub fn closed(shard: Option<ShardId>) -> Self {
        RegistryError::Closed { shard }
    }

    /// Check if this error is a violated call precondition
    ///
    /// Precondition violations mean the coordinator is broken. They are never
    /// retryable. Using a registry after its shard closed counts as one.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            RegistryError::AlreadyRegistered { .. }
                | RegistryError::NotRegistered { .. }
                | RegistryError::AlreadyPrepared { .. }
                | RegistryError::Closed { .. }
        )
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
