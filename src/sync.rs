//! Periodic reconciliation of the local user list with the bouncer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::conn::Conn;
use crate::error::HandlerResult;
use crate::pending::PendingError;
use crate::store;

/// Rebuild the user map from the bouncer: list every account, then fetch
/// each account's bindhost. The listing and the per-user queries share
/// correlation keys with the chat commands, so the whole pass runs under
/// the corresponding named locks.
pub async fn run_user_sync(conn: &Arc<Conn>) -> HandlerResult {
    let _list_guard = conn.pending.lock("user_list").await;

    conn.user_list_reset();
    conn.store().state.users.clear();
    let rx = conn.pending.begin("user_list")?;
    conn.send(&["znc", "listusers"]).await;
    rx.await
        .map_err(|_| PendingError::Cancelled("user_list".into()))?;

    let users: Vec<String> = conn.store().state.users.keys().cloned().collect();
    info!(count = users.len(), "Fetching bindhosts for listed users");
    for user in &users {
        let host = {
            let _guard = conn.pending.lock("bindhost").await;
            let rx = conn.pending.begin("bindhost")?;
            conn.module_msg("controlpanel", &format!("Get BindHost {user}"))
                .await;
            rx.await
                .map_err(|_| PendingError::Cancelled("bindhost".into()))?
        };
        conn.store()
            .state
            .users
            .insert(user.clone(), Some(host));
    }

    let dupes = {
        let mut store = conn.store();
        store.save()?;
        store.reload()?;
        store::duplicate_bindhosts(&store.state.users)
    };
    if !dupes.is_empty() {
        conn.chan_log(&format!(
            "WARNING: Duplicate BindHosts found: {}",
            dupes.join(", ")
        ))
        .await;
    }
    Ok(())
}

/// Background task that resynchronizes on a fixed cadence. Runs once
/// immediately when the local user map is empty (fresh state file), then
/// on every tick.
pub fn spawn_sync_task(conn: Arc<Conn>) {
    tokio::spawn(async move {
        let period = Duration::from_secs(conn.config.sync_interval_secs);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; only act on it when there
        // is no user state yet.
        ticker.tick().await;
        if conn.store().state.users.is_empty() {
            if let Err(e) = run_user_sync(&conn).await {
                warn!(error = %e, "Initial user sync failed");
            }
        }
        loop {
            ticker.tick().await;
            if conn.is_quitting() {
                return;
            }
            if let Err(e) = run_user_sync(&conn).await {
                warn!(error = %e, "Periodic user sync failed");
            }
        }
    });
}
