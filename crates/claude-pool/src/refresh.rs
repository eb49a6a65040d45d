//! Periodic pool refresh
//!
//! A single background task owns the write side of the pool. The cadence is
//! measured from the end of the previous refresh, so a slow registry call
//! delays the next attempt rather than stacking them. Refresh failures are
//! logged inside the pool and do not stop the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::pool::AccountPool;

/// Time between the end of one refresh and the start of the next.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the background refresh task.
///
/// The task runs until `shutdown` observes a change (or its sender is
/// dropped), then exits cleanly. Returns the task's `JoinHandle` so the
/// service can await it during shutdown.
pub fn spawn_refresh_task(
    pool: Arc<AccountPool>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => pool.refresh().await,
                _ = shutdown.changed() => {
                    info!("account refresh task stopping");
                    break;
                }
            }
        }
    })
}
