//! bnckeeper entry point: load config, wire up the connection, run until
//! told to quit (optionally re-executing for a restart).

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bnckeeper::config::Config;
use bnckeeper::conn::{Client, Conn};
use bnckeeper::handlers::Registry;
use bnckeeper::store::Store;
use bnckeeper::sync;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        server = %config.server.host,
        nick = %config.server.nick,
        "Starting bnckeeper"
    );

    let store = Store::load(&config.data_file)?;
    let (conn, rx) = Conn::new(config, store);
    let registry = Arc::new(Registry::new());

    {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; restarting");
                conn.shutdown(true).await;
            }
        });
    }

    sync::spawn_sync_task(Arc::clone(&conn));

    let restart = Client::new(conn, registry, rx).run().await;
    if restart {
        info!("Restart requested; re-executing");
        restart_process()?;
    }
    Ok(())
}

/// Replace the current process with a fresh copy of itself, preserving
/// arguments. Only returns on failure.
#[cfg(unix)]
fn restart_process() -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(anyhow::anyhow!("exec failed: {err}"))
}

#[cfg(not(unix))]
fn restart_process() -> anyhow::Result<()> {
    Err(anyhow::anyhow!("restart is only supported on unix"))
}
