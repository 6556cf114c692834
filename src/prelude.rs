//! Convenient imports for shardgate.
//!
//! ```
//! use shardgate::prelude::*;
//!
//! let registry: ConflictRegistry<TxnId, u64> = ConflictRegistry::new();
//! registry.register(TxnId::new(1), [42]);
//! ```

// Registry
pub use crate::{ConflictRegistry, PrepareVerdict, ShardRegistries};

// Error handling and configuration
pub use crate::{RegistryConfig, RegistryError, Result};

// Identifiers
pub use crate::{ShardId, TxnId, TxnIdAllocator};
