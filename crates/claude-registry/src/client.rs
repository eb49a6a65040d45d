//! Redis-backed registry client
//!
//! Accounts live as hashes under `claude:account:<id>`. The client lists
//! matching keys and reads each hash; unreadable or id-less records are
//! skipped so one bad entry cannot poison a refresh.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::account::Account;
use crate::error::{Error, Result};
use crate::AccountRegistry;

/// Key pattern for account hashes in the registry.
pub const ACCOUNT_KEY_PATTERN: &str = "claude:account:*";

/// Registry client over a shared Redis connection manager.
///
/// `ConnectionManager` reconnects on its own and is cheap to clone, so one
/// registry instance can serve concurrent refreshes.
pub struct RedisRegistry {
    manager: ConnectionManager,
}

impl RedisRegistry {
    /// Connect and verify the connection with a PING.
    ///
    /// `url` is a `redis://` connection URL carrying host, port, password and
    /// database index. The service treats a failed initial connection as fatal.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Connect(e.to_string()))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<()>(&mut manager)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        Ok(Self { manager })
    }
}

impl AccountRegistry for RedisRegistry {
    fn list_active_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>> {
        let mut conn = self.manager.clone();
        Box::pin(async move {
            let keys: Vec<String> = conn
                .keys(ACCOUNT_KEY_PATTERN)
                .await
                .map_err(|e| Error::Query(e.to_string()))?;

            let mut accounts = Vec::with_capacity(keys.len());
            for key in keys {
                let fields: HashMap<String, String> = match conn.hgetall(&key).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        warn!(key, error = %e, "skipping unreadable account record");
                        continue;
                    }
                };
                match Account::from_fields(&fields) {
                    Some(account) => accounts.push(account),
                    None => warn!(key, "skipping account record without an id"),
                }
            }
            Ok(accounts)
        })
    }
}
