//! Core types for shardgate
//!
//! This crate defines the types shared by every layer:
//! - [`TxnId`], [`ShardId`]: Identifiers handed to the registry
//! - [`TxnIdAllocator`]: Monotonic transaction id source
//! - [`RegistryError`]: Coordination failures
//! - [`RegistryConfig`]: Registry options

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use types::{ShardId, TxnId, TxnIdAllocator};
