//! Account pool snapshots
//!
//! The pool holds the current set of admissible accounts as an immutable
//! snapshot behind an `Arc`. Refresh builds a new snapshot and swaps the
//! pointer, so readers always observe either the whole previous snapshot or
//! the whole next one. Reading a snapshot never suspends.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use claude_registry::{Account, AccountRegistry};
use tracing::{debug, error, info};

/// An immutable view of the eligible accounts at one refresh.
#[derive(Debug, Default)]
pub struct PoolSnapshot {
    pub accounts: Vec<Account>,
    /// When the snapshot was published; `None` until the first successful
    /// refresh.
    pub last_refresh: Option<Instant>,
}

/// Eligible-account pool, refreshed from the registry.
///
/// Many readers, one writer: request handlers call `snapshot()`, the refresh
/// task (plus the initial synchronous refresh at startup) calls `refresh()`.
pub struct AccountPool {
    registry: Arc<dyn AccountRegistry>,
    snapshot: RwLock<Arc<PoolSnapshot>>,
}

impl AccountPool {
    /// Create an empty pool. Serves no accounts until the first refresh.
    pub fn new(registry: Arc<dyn AccountRegistry>) -> Self {
        Self {
            registry,
            snapshot: RwLock::new(Arc::new(PoolSnapshot::default())),
        }
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fetch accounts from the registry, apply the admission predicate, and
    /// publish a new snapshot. On registry failure the previous snapshot stays
    /// in place.
    pub async fn refresh(&self) {
        debug!("refreshing account pool");
        let records = match self.registry.list_active_accounts().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "account refresh failed, keeping previous snapshot");
                return;
            }
        };

        let listed = records.len();
        let accounts: Vec<Account> = records.into_iter().filter(|a| a.is_admissible()).collect();
        let admitted = accounts.len();

        let next = Arc::new(PoolSnapshot {
            accounts,
            last_refresh: Some(Instant::now()),
        });
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = next;

        info!(admitted, listed, "account pool refreshed");
    }
}
