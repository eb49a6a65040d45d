//! Account registry for Claude backend identities
//!
//! The registry is the authoritative, externally managed list of backend
//! accounts. This crate exposes a read-only view of it: the `Account` record,
//! the `AccountRegistry` trait the pool consumes, and the Redis-backed
//! implementation. The middleware never writes account state back — health
//! marks live in memory only, on the pool side.

pub mod account;
pub mod client;
pub mod error;

pub use account::Account;
pub use client::RedisRegistry;
pub use error::{Error, Result};

use std::future::Future;
use std::pin::Pin;

/// Read-only view of the external account registry.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn AccountRegistry>`).
pub trait AccountRegistry: Send + Sync {
    /// List every account record currently present in the registry.
    ///
    /// Records are returned raw; the admission predicate (`Account::is_admissible`)
    /// is applied by the pool, not here.
    fn list_active_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>>;
}
