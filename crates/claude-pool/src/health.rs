//! In-memory cooldown tables for account health
//!
//! Two tables map account id to a deadline: `rate_limited` (set on upstream
//! 429) and `problematic` (set on any failure attributable to the account).
//! An account can sit in both at once. Entries expire on their own; an
//! expired entry is evicted the next time it is read.
//!
//! All operations are synchronous and hold the lock only briefly, so health
//! checks never suspend the request task.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Cooldown after an upstream 429. Also the problematic cooldown for
/// rate-limit reasons.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Cooldown for authentication/authorization failures (401/403).
const AUTH_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Cooldown for upstream server errors (5xx).
const SERVER_ERROR_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// Cooldown for everything else (network errors and future reasons).
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct Tables {
    rate_limited: HashMap<String, Instant>,
    problematic: HashMap<String, Instant>,
}

/// Shared cooldown state for all accounts.
///
/// A single `RwLock` guards both tables: checks take the read lock and only
/// upgrade to the write lock when they observe an expired entry to evict.
#[derive(Default)]
pub struct HealthTracker {
    tables: RwLock<Tables>,
}

/// Map a mark reason to its cooldown. Substring matching keeps the
/// classification tolerant of new reason strings: any reason naming a 5xx
/// status lands in the server-error bucket without code changes.
fn cooldown_for(reason: &str) -> Duration {
    if reason.contains("401") || reason.contains("403") {
        AUTH_COOLDOWN
    } else if reason.contains("429") {
        RATE_LIMIT_COOLDOWN
    } else if reason.contains('5') {
        SERVER_ERROR_COOLDOWN
    } else {
        DEFAULT_COOLDOWN
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an account rate limited for the next hour.
    pub fn mark_rate_limited(&self, account_id: &str) {
        let deadline = Instant::now() + RATE_LIMIT_COOLDOWN;
        self.write_tables()
            .rate_limited
            .insert(account_id.to_string(), deadline);
        warn!(account_id, "account marked as rate limited");
    }

    /// Mark an account problematic for a reason-dependent cooldown.
    ///
    /// Rate-limit reasons additionally mark the account rate limited, so a 429
    /// shows up in both tables.
    pub fn mark_problematic(&self, account_id: &str, reason: &str) {
        if reason.contains("429") {
            self.mark_rate_limited(account_id);
        }
        let cooldown = cooldown_for(reason);
        let deadline = Instant::now() + cooldown;
        self.write_tables()
            .problematic
            .insert(account_id.to_string(), deadline);
        warn!(
            account_id,
            reason,
            cooldown_secs = cooldown.as_secs(),
            "account marked as problematic"
        );
    }

    /// Whether the account currently holds a live rate-limit mark.
    pub fn is_rate_limited(&self, account_id: &str) -> bool {
        self.rate_limit_deadline(account_id).is_some()
    }

    /// The account's live rate-limit deadline, if any. Expired entries are
    /// evicted as a side effect. The selector uses the deadline to order the
    /// rate-limited tier by earliest mark.
    pub fn rate_limit_deadline(&self, account_id: &str) -> Option<Instant> {
        let deadline = self.read_tables().rate_limited.get(account_id).copied()?;
        if Instant::now() >= deadline {
            let mut tables = self.write_tables();
            // Re-check under the write lock: the account may have been
            // re-marked between dropping the read lock and taking this one.
            if tables
                .rate_limited
                .get(account_id)
                .is_some_and(|d| Instant::now() >= *d)
            {
                tables.rate_limited.remove(account_id);
                debug!(account_id, "rate limit cooldown expired");
            }
            return None;
        }
        Some(deadline)
    }

    /// Whether the account currently holds a live problematic mark. Expired
    /// entries are evicted as a side effect.
    pub fn is_problematic(&self, account_id: &str) -> bool {
        let deadline = match self.read_tables().problematic.get(account_id).copied() {
            Some(deadline) => deadline,
            None => return false,
        };
        if Instant::now() >= deadline {
            let mut tables = self.write_tables();
            if tables
                .problematic
                .get(account_id)
                .is_some_and(|d| Instant::now() >= *d)
            {
                tables.problematic.remove(account_id);
                debug!(account_id, "problem cooldown expired");
            }
            return false;
        }
        true
    }

    fn read_tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Force any existing marks for the account to the expired state.
    #[cfg(test)]
    pub(crate) fn expire_marks(&self, account_id: &str) {
        let now = Instant::now();
        let mut tables = self.write_tables();
        if let Some(deadline) = tables.rate_limited.get_mut(account_id) {
            *deadline = now;
        }
        if let Some(deadline) = tables.problematic.get_mut(account_id) {
            *deadline = now;
        }
    }

    /// Overwrite the rate-limit deadline directly (tier ordering tests).
    #[cfg(test)]
    pub(crate) fn set_rate_limit_deadline(&self, account_id: &str, deadline: Instant) {
        self.write_tables()
            .rate_limited
            .insert(account_id.to_string(), deadline);
    }
}
