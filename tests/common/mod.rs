//! Shared harness: an in-process bot with the wire replaced by channels.
//!
//! Tests feed raw IRC lines through the dispatcher and assert on the
//! outbound lines the bot queues in response; no sockets are involved.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use bnckeeper::config::Config;
use bnckeeper::conn::Conn;
use bnckeeper::event::Event;
use bnckeeper::handlers::Registry;
use bnckeeper::proto::Line;
use bnckeeper::store::Store;

pub struct Harness {
    pub conn: Arc<Conn>,
    pub registry: Arc<Registry>,
    pub out_rx: mpsc::Receiver<String>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config_extra("")
    }

    /// Build a bot around a temp state file. `extra` is appended to the
    /// top-level config section before the table headers.
    pub fn with_config_extra(extra: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_file = dir.path().join("bnc.json");
        let config_text = format!(
            r##"
admins = ["op!*@staff.example"]
log_channel = "#bnc-admin"
data_file = "{}"
{extra}

[server]
host = "irc.example.net"
port = 6667

[bnc]
host = "bnc.example.net"
network = "example"
"##,
            data_file.display()
        );
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, config_text).expect("write config");
        let config = Config::load(&config_path).expect("parse config");

        let store = Store::load(&data_file).expect("init store");
        let (conn, rx) = Conn::new(config, store);
        let registry = Arc::new(Registry::new());
        Self {
            conn,
            registry,
            out_rx: rx.out_rx,
            _dir: dir,
        }
    }

    /// Feed one raw server-to-client line through the dispatcher.
    pub async fn feed(&self, raw: &str) {
        let line = Line::parse(raw).expect("parse test line");
        let event = Event::from_line(&line, &self.conn.nick());
        self.registry.dispatch(&self.conn, &event).await;
    }

    /// Next outbound line, or panic after a short wait.
    pub async fn next_out(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.out_rx.recv())
            .await
            .expect("timed out waiting for outbound line")
            .expect("outbound channel closed")
    }

    /// Outbound line if one is already queued.
    pub fn try_out(&mut self) -> Option<String> {
        self.out_rx.try_recv().ok()
    }

    /// Drop any outbound lines already queued.
    pub fn drain(&mut self) {
        while self.out_rx.try_recv().is_ok() {}
    }
}
