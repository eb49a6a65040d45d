//! Account selection and health management for the Claude middleware
//!
//! Multiplexes many clients over a smaller set of backend accounts. The pool
//! holds an immutable snapshot of eligible accounts refreshed from the
//! registry; the health tracker keeps in-memory cooldown deadlines for
//! rate-limited and problematic accounts; the selector picks one account per
//! request under a tiered degradation policy.
//!
//! Request lifecycle:
//! 1. Background task refreshes the pool snapshot from the registry every 30 s
//! 2. Handler selects an account: healthy (least recently used) before
//!    rate-limited before problematic
//! 3. Upstream outcome is classified and marked on the health tracker
//! 4. Marks expire on their own; expired entries are evicted lazily on read
//!
//! Health state is process-local and never persisted. A mark is a speculative
//! hint, not a commitment: a marked account can still be served from a lower
//! tier rather than failing the request outright.

pub mod health;
pub mod pool;
pub mod refresh;
pub mod selector;

pub use health::HealthTracker;
pub use pool::{AccountPool, PoolSnapshot};
pub use refresh::{REFRESH_INTERVAL, spawn_refresh_task};
pub use selector::select_account;
