//! Registry configuration
//!
//! Use the builder pattern to configure a registry:
//!
//! ```
//! use shardgate_core::config::RegistryConfig;
//!
//! let config = RegistryConfig::new()
//!     .verify_after_mutation(true)
//!     .initial_capacity(1024);
//! assert!(config.verify_after_mutation);
//! ```

use serde::{Deserialize, Serialize};

/// Options for a conflict registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Run the consistency check after every mutation
    ///
    /// Defaults to on in debug builds and off in release builds. An
    /// inconsistency found this way is fatal.
    pub verify_after_mutation: bool,
    /// Number of transactions and keys to pre-size the indices for
    pub initial_capacity: usize,
}

impl RegistryConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable post-mutation consistency checks
    pub fn verify_after_mutation(mut self, enabled: bool) -> Self {
        self.verify_after_mutation = enabled;
        self
    }

    /// Pre-size the indices
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            verify_after_mutation: cfg!(debug_assertions),
            initial_capacity: 0,
        }
    }
}
