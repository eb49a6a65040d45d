//! Account record and the admission predicate

use std::collections::HashMap;

/// Status tags that keep an account out of the pool even when it is active.
pub const EXCLUDED_STATUSES: &[&str] = &["error", "banned", "oauth_revoked"];

/// A backend identity as stored in the registry.
///
/// `last_used_at` is an RFC-3339 string and is only ever read: least-recently-
/// used ordering compares it lexicographically, which matches chronological
/// order for ISO-8601 timestamps. The middleware never writes the field back,
/// so LRU rotation depends on the registry owner updating it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub status: String,
    pub last_used_at: String,
    /// Epoch milliseconds, informational only.
    pub expires_at: i64,
}

impl Account {
    /// Build an account from a registry hash. Returns `None` when the record
    /// has no `id`; every other field falls back to a default so one malformed
    /// field does not drop the whole record.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("id")?.clone();
        Some(Self {
            id,
            name: fields.get("name").cloned().unwrap_or_default(),
            is_active: fields.get("isActive").is_some_and(|v| v == "true"),
            status: fields.get("status").cloned().unwrap_or_default(),
            last_used_at: fields.get("lastUsedAt").cloned().unwrap_or_default(),
            expires_at: fields
                .get("expiresAt")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    /// Admission predicate: only active accounts whose status is not in the
    /// exclusion set are eligible for the pool.
    pub fn is_admissible(&self) -> bool {
        self.is_active && !EXCLUDED_STATUSES.contains(&self.status.as_str())
    }
}
