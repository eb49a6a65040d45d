//! Tiered account selection
//!
//! Candidates are split into three tiers: healthy, rate-limited-only, and
//! problematic. A lower tier is only consulted when every higher tier is
//! empty — serving with a degraded account beats returning an error to the
//! client, because marks are speculative and may be stale.

use std::time::Instant;

use claude_registry::Account;
use tracing::{debug, info};

use crate::health::HealthTracker;

/// Pick one account from the snapshot, never returning `exclude_id`.
///
/// - Healthy tier: least recently used. `last_used_at` is an RFC-3339 string,
///   so lexicographic order is chronological order; ties keep pool order.
/// - Rate-limited tier: earliest live rate-limit mark.
/// - Problematic tier: first in pool order.
///
/// Returns `None` when no candidate remains after exclusion.
pub fn select_account<'a>(
    accounts: &'a [Account],
    health: &HealthTracker,
    exclude_id: &str,
) -> Option<&'a Account> {
    let mut healthy: Vec<&Account> = Vec::new();
    let mut rate_limited: Vec<(&Account, Instant)> = Vec::new();
    let mut problematic: Vec<&Account> = Vec::new();

    for account in accounts {
        if account.id == exclude_id {
            continue;
        }
        if health.is_problematic(&account.id) {
            problematic.push(account);
        } else if let Some(deadline) = health.rate_limit_deadline(&account.id) {
            rate_limited.push((account, deadline));
        } else {
            healthy.push(account);
        }
    }

    if let Some(&first) = healthy.first() {
        let mut selected = first;
        for &account in &healthy[1..] {
            if account.last_used_at < selected.last_used_at {
                selected = account;
            }
        }
        debug!(account_id = %selected.id, name = %selected.name, "selected available account");
        return Some(selected);
    }

    if let Some(&(first, first_deadline)) = rate_limited.first() {
        let mut selected = first;
        let mut earliest = first_deadline;
        for &(account, deadline) in &rate_limited[1..] {
            if deadline < earliest {
                selected = account;
                earliest = deadline;
            }
        }
        info!(
            account_id = %selected.id,
            name = %selected.name,
            "all accounts unavailable, using rate limited account"
        );
        return Some(selected);
    }

    if let Some(&selected) = problematic.first() {
        info!(
            account_id = %selected.id,
            name = %selected.name,
            "all accounts have issues, using problematic account"
        );
        return Some(selected);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn account(id: &str, last_used_at: &str) -> Account {
        Account {
            id: id.into(),
            name: id.into(),
            is_active: true,
            status: "active".into(),
            last_used_at: last_used_at.into(),
            expires_at: 0,
        }
    }

    #[test]
    fn empty_pool_returns_none() {
        let health = HealthTracker::new();
        assert!(select_account(&[], &health, "").is_none());
    }

    #[test]
    fn healthy_tier_prefers_least_recently_used() {
        let accounts = vec![
            account("a", "2024-01-03T00:00:00Z"),
            account("b", "2024-01-01T00:00:00Z"),
            account("c", "2024-01-02T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn lru_ties_break_by_pool_order() {
        let accounts = vec![
            account("first", "2024-01-01T00:00:00Z"),
            account("second", "2024-01-01T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "first");
    }

    #[test]
    fn missing_last_used_sorts_first() {
        let accounts = vec![
            account("used", "2024-01-01T00:00:00Z"),
            account("never", ""),
        ];
        let health = HealthTracker::new();
        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "never");
    }

    #[test]
    fn excluded_account_is_never_returned() {
        let accounts = vec![
            account("a", "2024-01-01T00:00:00Z"),
            account("b", "2024-01-02T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        // "a" is the LRU pick, but excluded
        let selected = select_account(&accounts, &health, "a").unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn sole_account_equal_to_exclusion_returns_none() {
        let accounts = vec![account("only", "2024-01-01T00:00:00Z")];
        let health = HealthTracker::new();
        assert!(select_account(&accounts, &health, "only").is_none());
    }

    #[test]
    fn healthy_tier_wins_over_degraded_tiers() {
        let accounts = vec![
            account("limited", "2024-01-01T00:00:00Z"),
            account("broken", "2024-01-02T00:00:00Z"),
            account("fresh", "2024-01-03T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        health.mark_rate_limited("limited");
        health.mark_problematic("broken", "network_error");

        // "fresh" has the latest last_used_at but is the only healthy account
        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "fresh");
    }

    #[test]
    fn rate_limited_tier_wins_over_problematic() {
        let accounts = vec![
            account("broken", "2024-01-01T00:00:00Z"),
            account("limited", "2024-01-02T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        health.mark_problematic("broken", "http_error_503");
        health.mark_rate_limited("limited");

        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "limited");
    }

    #[test]
    fn rate_limited_tier_picks_earliest_mark() {
        let accounts = vec![
            account("late", "2024-01-01T00:00:00Z"),
            account("early", "2024-01-02T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        let now = Instant::now();
        health.set_rate_limit_deadline("late", now + Duration::from_secs(3600));
        health.set_rate_limit_deadline("early", now + Duration::from_secs(600));

        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "early");
    }

    #[test]
    fn problematic_tier_picks_first_in_pool_order() {
        let accounts = vec![
            account("a", "2024-01-02T00:00:00Z"),
            account("b", "2024-01-01T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        health.mark_problematic("a", "http_error_500");
        health.mark_problematic("b", "http_error_500");

        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "a");
    }

    #[test]
    fn account_in_both_tables_lands_in_problematic_tier() {
        let accounts = vec![
            account("both", "2024-01-01T00:00:00Z"),
            account("limited", "2024-01-02T00:00:00Z"),
        ];
        let health = HealthTracker::new();
        // A 429 marks both tables; "both" must not be treated as merely
        // rate limited ahead of its problematic state
        health.mark_problematic("both", "http_error_429");
        health.mark_rate_limited("limited");

        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "limited");
    }

    #[test]
    fn expired_marks_restore_the_healthy_tier() {
        let accounts = vec![account("a", "2024-01-01T00:00:00Z")];
        let health = HealthTracker::new();
        health.mark_problematic("a", "network_error");
        health.expire_marks("a");

        let selected = select_account(&accounts, &health, "").unwrap();
        assert_eq!(selected.id, "a");
    }

    #[test]
    fn all_excluded_or_empty_tiers_return_none() {
        let accounts = vec![account("a", "2024-01-01T00:00:00Z")];
        let health = HealthTracker::new();
        health.mark_problematic("a", "network_error");
        // Problematic tier would serve "a", but it is excluded
        assert!(select_account(&accounts, &health, "a").is_none());
    }
}
