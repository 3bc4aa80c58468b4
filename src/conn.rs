//! Connection lifecycle and the bot-side surface built on top of it.
//!
//! [`Conn`] owns the authoritative notion of "connected" and the single
//! outbound send path; everything the command handlers do to the outside
//! world goes through it. [`Client`] drives the transport: connect,
//! register, pump lines, reconnect on drop, stop on deliberate quit.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{HandlerError, HandlerResult};
use crate::event::Event;
use crate::handlers::Registry;
use crate::pending::{Pending, PendingError};
use crate::proto::Line;
use crate::store::Store;
use crate::util;

/// Outbound line buffer; lines submitted while disconnected sit here
/// until the next successful connection drains them.
const OUTBOUND_CHANNEL_SIZE: usize = 1024;

/// Pause between reconnect attempts. There is deliberately no backoff or
/// retry limit; persistent failures are an operator problem.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Grace period after QUIT for the line to flush before the run loop is
/// told to stop.
const QUIT_GRACE: Duration = Duration::from_secs(1);

/// Shared bot state and the single outbound send path.
pub struct Conn {
    pub config: Config,
    pub pending: Pending,
    store: Mutex<Store>,
    out_tx: mpsc::Sender<String>,
    shutdown_tx: mpsc::Sender<bool>,
    nick: RwLock<String>,
    quitting: AtomicBool,
    /// Terminator frames seen for the in-flight user listing.
    user_list_seps: AtomicU8,
}

/// Receiving halves owned by the run loop (and by tests, which inspect
/// outbound traffic directly).
pub struct ConnRx {
    pub out_rx: mpsc::Receiver<String>,
    pub shutdown_rx: mpsc::Receiver<bool>,
}

impl Conn {
    pub fn new(config: Config, store: Store) -> (Arc<Self>, ConnRx) {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let nick = config.server.nick.clone();
        let conn = Arc::new(Self {
            config,
            pending: Pending::new(),
            store: Mutex::new(store),
            out_tx,
            shutdown_tx,
            nick: RwLock::new(nick),
            quitting: AtomicBool::new(false),
            user_list_seps: AtomicU8::new(0),
        });
        (
            conn,
            ConnRx {
                out_rx,
                shutdown_rx,
            },
        )
    }

    /// The bot's current nick (tracked through NICK changes).
    pub fn nick(&self) -> String {
        self.nick.read().clone()
    }

    pub fn set_nick(&self, nick: &str) {
        *self.nick.write() = nick.to_string();
    }

    /// Queue one raw line on the outbound path.
    pub async fn send_line(&self, line: String) {
        if self.out_tx.send(line).await.is_err() {
            warn!("Outbound channel closed; dropping line");
        }
    }

    /// Queue a line assembled from space-separated tokens.
    pub async fn send(&self, parts: &[&str]) {
        self.send_line(parts.join(" ")).await;
    }

    pub async fn msg(&self, target: &str, text: &str) {
        self.send_line(format!("PRIVMSG {target} :{text}")).await;
    }

    pub async fn notice(&self, target: &str, text: &str) {
        self.send_line(format!("NOTICE {target} :{text}")).await;
    }

    /// Message one of the bouncer's pseudo-user modules.
    pub async fn module_msg(&self, module: &str, cmd: &str) {
        let target = format!("{}{}", self.config.status_prefix, module);
        self.msg(&target, cmd).await;
    }

    /// Mirror an operational message to the log channel, if configured.
    pub async fn chan_log(&self, text: &str) {
        info!(message = %text, "chan_log");
        if let Some(chan) = self.config.log_channel.clone() {
            self.msg(&chan, text).await;
        }
    }

    /// Whether `mask` matches any configured admin pattern.
    pub fn is_admin(&self, mask: &str) -> bool {
        util::mask_matches_any(mask, &self.config.admins)
    }

    /// Query the bouncer's admin flag for an account.
    ///
    /// Holds the `bncadmin` lock for the whole register-send-await-consume
    /// cycle so concurrent flows cannot overwrite each other's future.
    pub async fn is_bnc_admin(&self, name: &str) -> Result<bool, HandlerError> {
        let _guard = self.pending.lock("bncadmin").await;
        let rx = self.pending.begin("bncadmin")?;
        self.module_msg("controlpanel", &format!("Get Admin {name}"))
            .await;
        let value = rx
            .await
            .map_err(|_| PendingError::Cancelled("bncadmin".into()))?;
        Ok(value.eq_ignore_ascii_case("true"))
    }

    /// Direct access to the persisted state. Guards must not be held
    /// across awaits; mutation helpers below save-on-write.
    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock()
    }

    pub fn add_queue(&self, requester: &str, registered: &str) -> HandlerResult {
        let mut store = self.store.lock();
        store
            .state
            .queue
            .insert(requester.to_string(), registered.to_string());
        store.save()?;
        Ok(())
    }

    /// Remove a queue entry; returns false when it was not present.
    pub fn rem_queue(&self, requester: &str) -> Result<bool, HandlerError> {
        let mut store = self.store.lock();
        if store.state.queue.remove(requester).is_none() {
            return Ok(false);
        }
        store.save()?;
        Ok(true)
    }

    /// Allocate an unused bindhost, or decline after a bounded number of
    /// draws.
    pub async fn get_bind_host(&self) -> Result<String, HandlerError> {
        let allocated = {
            let store = self.store.lock();
            util::allocate_bindhost(self.config.bindhost_net, &store.state.users)
        };
        match allocated {
            Some(host) => Ok(host),
            None => {
                self.chan_log("ERROR: bindhost allocation hit the collision limit")
                    .await;
                Err(HandlerError::BindHostExhausted)
            }
        }
    }

    /// Provision a bouncer account for `nick` and memo the credentials.
    pub async fn add_user(&self, nick: &str) -> HandlerResult {
        let username = if util::is_username_valid(nick) {
            nick.to_string()
        } else {
            let sanitized = util::sanitize_username(nick);
            self.chan_log(&format!(
                "WARNING: Invalid username '{nick}'; sanitizing to {sanitized}"
            ))
            .await;
            sanitized
        };

        let passwd = util::gen_password();
        let host = self.get_bind_host().await?;
        let bnc = &self.config.bnc;

        self.module_msg(
            "controlpanel",
            &format!("cloneuser {} {username}", bnc.template_user),
        )
        .await;
        self.module_msg("controlpanel", &format!("Set Password {username} {passwd}"))
            .await;
        self.module_msg("controlpanel", &format!("Set BindHost {username} {host}"))
            .await;
        self.module_msg("controlpanel", &format!("Set Nick {username} {nick}"))
            .await;
        self.module_msg("controlpanel", &format!("Set AltNick {username} {nick}_"))
            .await;
        self.module_msg("controlpanel", &format!("Set Ident {username} {nick}"))
            .await;
        self.module_msg("controlpanel", &format!("Set Realname {username} {nick}"))
            .await;
        self.send(&["znc", "saveconfig"]).await;
        self.module_msg(
            "controlpanel",
            &format!("reconnect {username} {}", bnc.network),
        )
        .await;
        self.msg(
            "MemoServ",
            &format!(
                "SEND {nick} Your BNC auth is Username: {username} Password: {passwd} \
                 (Ports: {} for SSL - {} for NON-SSL) Help: /server {} {} and \
                 /PASS {username}:{passwd}",
                bnc.port_ssl, bnc.port_plain, bnc.host, bnc.port_plain
            ),
        )
        .await;

        let mut store = self.store.lock();
        store.state.users.insert(username, Some(host));
        store.save()?;
        Ok(())
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    /// Send QUIT exactly once; later calls are no-ops.
    pub async fn quit(&self, reason: Option<&str>) {
        if self.quitting.swap(true, Ordering::SeqCst) {
            return;
        }
        let line = match reason {
            Some(reason) => format!("QUIT :{reason}"),
            None => "QUIT".to_string(),
        };
        self.send_line(line).await;
    }

    /// Quit, give the line a moment to flush, then stop the run loop with
    /// the restart flag.
    pub async fn shutdown(&self, restart: bool) {
        self.quit(None).await;
        tokio::time::sleep(QUIT_GRACE).await;
        if self.shutdown_tx.send(restart).await.is_err() {
            warn!("Run loop already gone during shutdown");
        }
    }

    /// Reset the terminator counter for a fresh user listing.
    pub fn user_list_reset(&self) {
        self.user_list_seps.store(0, Ordering::SeqCst);
    }

    /// Count one terminator frame; returns the total seen so far.
    pub fn user_list_mark_sep(&self) -> u8 {
        self.user_list_seps.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Unified plaintext/TLS transport.
enum BotStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for BotStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BotStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BotStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BotStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BotStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BotStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BotStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BotStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BotStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BotStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Upgrade an outbound TCP stream to TLS using the system trust roots.
async fn upgrade_to_tls(
    tcp: TcpStream,
    hostname: &str,
) -> Result<TlsStream<TcpStream>, Box<dyn std::error::Error + Send + Sync>> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &native.errors {
        warn!("Error loading native certs: {}", e);
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(hostname.to_string())?;
    let stream = connector.connect(server_name, tcp).await?;
    info!(hostname = %hostname, "TLS handshake completed");
    Ok(stream)
}

/// Drives the connection: connect, authenticate, pump lines, reconnect.
pub struct Client {
    conn: Arc<Conn>,
    registry: Arc<Registry>,
    rx: ConnRx,
}

impl Client {
    pub fn new(conn: Arc<Conn>, registry: Arc<Registry>, rx: ConnRx) -> Self {
        Self { conn, registry, rx }
    }

    /// Run until a deliberate quit; returns the restart flag.
    pub async fn run(mut self) -> bool {
        loop {
            let server = self.conn.config.server.clone();
            info!(host = %server.host, port = server.port, tls = server.tls, "Connecting");

            // The shutdown channel stays armed while disconnected too, so
            // an operator quit during an outage is not lost to the retry
            // loop.
            let tcp = tokio::select! {
                connected = TcpStream::connect((server.host.as_str(), server.port)) => {
                    match connected {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!(host = %server.host, error = %e, "Connect failed; retrying");
                            if let Some(restart) = self.retry_pause().await {
                                return restart;
                            }
                            continue;
                        }
                    }
                }
                restart = self.rx.shutdown_rx.recv() => {
                    return restart.unwrap_or(false);
                }
            };

            let stream = if server.tls {
                match upgrade_to_tls(tcp, &server.host).await {
                    Ok(tls) => BotStream::Tls(tls),
                    Err(e) => {
                        error!(host = %server.host, error = %e, "TLS handshake failed; retrying");
                        if let Some(restart) = self.retry_pause().await {
                            return restart;
                        }
                        continue;
                    }
                }
            } else {
                BotStream::Plain(tcp)
            };

            let mut framed = Framed::new(stream, LinesCodec::new());

            // Registration happens in fixed order before anything else is
            // allowed onto the wire.
            self.conn.set_nick(&server.nick);
            let mut registration = Vec::new();
            if let Some(pass) = &server.password {
                registration.push(format!("PASS {pass}"));
            }
            registration.push(format!("NICK {}", server.nick));
            registration.push(format!("USER {} 0 * :{}", server.user, server.user));

            let mut registered_ok = true;
            for line in registration {
                if let Err(e) = framed.send(line).await {
                    error!(error = %e, "Failed to send registration; retrying");
                    registered_ok = false;
                    break;
                }
            }
            if !registered_ok {
                if let Some(restart) = self.retry_pause().await {
                    return restart;
                }
                continue;
            }
            info!(host = %server.host, "Connected");

            loop {
                tokio::select! {
                    incoming = framed.next() => match incoming {
                        Some(Ok(raw)) => self.dispatch_raw(&raw).await,
                        Some(Err(e)) => {
                            warn!(error = %e, "Stream error");
                            break;
                        }
                        None => {
                            info!("Connection closed by server");
                            break;
                        }
                    },
                    Some(out) = self.rx.out_rx.recv() => {
                        debug!(line = %out, ">>");
                        if let Err(e) = framed.send(out).await {
                            warn!(error = %e, "Write failed");
                            break;
                        }
                    }
                    restart = self.rx.shutdown_rx.recv() => {
                        return restart.unwrap_or(false);
                    }
                }
            }

            if self.conn.is_quitting() {
                // Deliberate quit: wait for the shutdown signal instead of
                // reconnecting under the operator.
                return self.rx.shutdown_rx.recv().await.unwrap_or(false);
            }

            warn!("Connection dropped; reconnecting");
            if let Some(restart) = self.retry_pause().await {
                return restart;
            }
        }
    }

    /// Pause before the next connection attempt, still listening for the
    /// shutdown signal. Returns the restart flag when shutdown arrives
    /// during the pause.
    async fn retry_pause(&mut self) -> Option<bool> {
        tokio::select! {
            restart = self.rx.shutdown_rx.recv() => Some(restart.unwrap_or(false)),
            _ = tokio::time::sleep(RECONNECT_DELAY) => None,
        }
    }

    async fn dispatch_raw(&self, raw: &str) {
        debug!(line = %raw, "<<");
        let Some(line) = Line::parse(raw) else {
            debug!(line = %raw, "Dropping unparseable line");
            return;
        };
        let event = Event::from_line(&line, &self.conn.nick());
        self.registry.dispatch(&self.conn, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        toml::from_str(
            r##"
admins = ["*!*@staff.example.org"]
log_channel = "#bnc-log"

[server]
host = "irc.example.org"
port = 6667
password = "pass"

[bnc]
host = "bnc.example.org"
network = "ExampleNet"
"##,
        )
        .unwrap()
    }

    fn test_conn() -> (Arc<Conn>, ConnRx, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(dir.path().join("bnc.json")).unwrap();
        let (conn, rx) = Conn::new(test_config(), store);
        (conn, rx, dir)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn quit_is_idempotent() {
        let (conn, mut rx, _dir) = test_conn();
        conn.quit(Some("bye")).await;
        conn.quit(Some("again")).await;
        conn.quit(None).await;
        let sent = drain(&mut rx.out_rx);
        assert_eq!(sent, vec!["QUIT :bye".to_string()]);
        assert!(conn.is_quitting());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_quits_then_signals_restart() {
        let (conn, mut rx, _dir) = test_conn();
        conn.shutdown(true).await;
        assert_eq!(drain(&mut rx.out_rx), vec!["QUIT".to_string()]);
        assert_eq!(rx.shutdown_rx.recv().await, Some(true));
    }

    #[tokio::test]
    async fn shutdown_while_disconnected_stops_run_loop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(dir.path().join("bnc.json")).unwrap();
        let mut config = test_config();
        // Nothing listens here; every connect attempt is refused, keeping
        // the run loop in its retry path.
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9;
        let (conn, rx) = Conn::new(config, store);
        let registry = Arc::new(Registry::new());
        let run = tokio::spawn(Client::new(Arc::clone(&conn), registry, rx).run());

        conn.shutdown(true).await;
        let restart = tokio::time::timeout(Duration::from_secs(30), run)
            .await
            .expect("run loop kept reconnecting after shutdown")
            .unwrap();
        assert!(restart, "restart flag did not reach the run loop");
    }

    #[tokio::test]
    async fn module_msg_uses_status_prefix() {
        let (conn, mut rx, _dir) = test_conn();
        conn.module_msg("controlpanel", "Get BindHost alice").await;
        assert_eq!(
            drain(&mut rx.out_rx),
            vec!["PRIVMSG *controlpanel :Get BindHost alice".to_string()]
        );
    }

    #[tokio::test]
    async fn chan_log_targets_configured_channel() {
        let (conn, mut rx, _dir) = test_conn();
        conn.chan_log("hello").await;
        assert_eq!(
            drain(&mut rx.out_rx),
            vec!["PRIVMSG #bnc-log :hello".to_string()]
        );
    }

    #[tokio::test]
    async fn add_user_issues_fixed_provisioning_sequence() {
        let (conn, mut rx, _dir) = test_conn();
        conn.add_user("alice").await.unwrap();
        let sent = drain(&mut rx.out_rx);

        let expected_prefixes = [
            "PRIVMSG *controlpanel :cloneuser BNCClient alice",
            "PRIVMSG *controlpanel :Set Password alice ",
            "PRIVMSG *controlpanel :Set BindHost alice 127.0.",
            "PRIVMSG *controlpanel :Set Nick alice alice",
            "PRIVMSG *controlpanel :Set AltNick alice alice_",
            "PRIVMSG *controlpanel :Set Ident alice alice",
            "PRIVMSG *controlpanel :Set Realname alice alice",
            "znc saveconfig",
            "PRIVMSG *controlpanel :reconnect alice ExampleNet",
            "PRIVMSG MemoServ :SEND alice Your BNC auth is Username: alice Password: ",
        ];
        assert_eq!(sent.len(), expected_prefixes.len());
        for (line, prefix) in sent.iter().zip(expected_prefixes) {
            assert!(line.starts_with(prefix), "{line:?} !~ {prefix:?}");
        }

        let store = conn.store();
        let host = store.state.users.get("alice").unwrap().as_ref().unwrap();
        assert!(host.starts_with("127.0."));
    }

    #[tokio::test]
    async fn admin_matching_uses_config_patterns() {
        let (conn, _rx, _dir) = test_conn();
        assert!(conn.is_admin("Alice!a@Staff.Example.Org"));
        assert!(!conn.is_admin("mallory!m@users.example.org"));
    }

    #[tokio::test]
    async fn queue_mutations_persist() {
        let (conn, _rx, _dir) = test_conn();
        conn.add_queue("alice", "May 30 2017").unwrap();
        assert!(conn.rem_queue("alice").unwrap());
        assert!(!conn.rem_queue("alice").unwrap());
    }
}
