//! Raw protocol event handlers.
//!
//! These recognize the reply shapes the command flows wait on (WHOIS
//! numerics, NickServ notices, bouncer module output) and resolve the
//! matching pending keys, plus the basics: PING, own-nick tracking, and
//! a wildcard wire trace.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::conn::Conn;
use crate::error::HandlerResult;
use crate::event::Event;
use crate::handlers::{RawHandler, Registry};
use crate::pending::WHOIS_ACCT_PREFIX;
use crate::proto::Line;

/// The listing reply frames its output with three terminator rows; the
/// third one ends collection.
const USER_LIST_FRAMES: u8 = 3;

/// Wildcard handler: trace every event that comes off the wire.
pub struct WireTraceHandler;

#[async_trait]
impl RawHandler for WireTraceHandler {
    async fn handle(
        &self,
        _conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        trace!(command = %event.command, params = ?event.params, "event");
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl RawHandler for PingHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        let pong = Line {
            tags: None,
            prefix: None,
            command: "PONG".to_string(),
            params: event.params.clone(),
        };
        conn.send_line(pong.to_string()).await;
        Ok(())
    }
}

/// 318 RPL_ENDOFWHOIS: resolve any still-pending account lookup for this
/// nick with "not identified".
pub struct WhoisEndHandler;

#[async_trait]
impl RawHandler for WhoisEndHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        if let Some(nick) = event.params.get(1) {
            conn.pending.resolve_whois_end(nick);
        }
        Ok(())
    }
}

/// 330 RPL_WHOISACCOUNT: `<me> <nick> <account> :is logged in as`.
pub struct WhoisAcctHandler;

#[async_trait]
impl RawHandler for WhoisAcctHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        if event.trailing() != Some("is logged in as") {
            return Ok(());
        }
        if let (Some(nick), Some(acct)) = (event.params.get(1), event.params.get(2)) {
            conn.pending
                .resolve(&format!("{WHOIS_ACCT_PREFIX}{nick}"), acct.clone());
        }
        Ok(())
    }
}

/// NickServ INFO output; the registration line looks like
/// `Registered: May 30 00:53:54 2017 UTC (5 days, 19 minutes ago)`.
pub struct NickServInfoHandler;

#[async_trait]
impl RawHandler for NickServInfoHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        let Some(nick) = &event.nick else {
            return Ok(());
        };
        if !nick.eq_ignore_ascii_case("nickserv") {
            return Ok(());
        }
        let Some(text) = event.trailing() else {
            return Ok(());
        };
        if let Some((field, content)) = text.trim().split_once(':') {
            if field == "Registered" {
                conn.pending.resolve("ns_info", content.trim());
            }
        }
        Ok(())
    }
}

/// PRIVMSG: bouncer module replies first, then chat command dispatch.
pub struct PrivmsgHandler;

#[async_trait]
impl RawHandler for PrivmsgHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        let Some(text) = event.trailing().map(str::to_string) else {
            return Ok(());
        };

        // Module pseudo-users live on the bouncer host and carry the
        // status prefix; their output is correlation data, never a
        // command.
        if let (Some(nick), Some(host)) = (&event.nick, &event.host) {
            if host == "znc.in" {
                if let Some(module) = nick.strip_prefix(&conn.config.status_prefix) {
                    handle_module_reply(conn, module, &text);
                    return Ok(());
                }
            }
        }

        if let Some(rest) = text.strip_prefix(&conn.config.command_prefix) {
            let (word, arg) = match rest.split_once(' ') {
                Some((word, arg)) => (word, arg),
                None => (rest, ""),
            };
            registry.dispatch_command(conn, event, word, arg).await;
        }
        Ok(())
    }
}

fn handle_module_reply(conn: &Arc<Conn>, module: &str, text: &str) {
    match module {
        "status" if conn.pending.is_pending("user_list") => {
            if let Some(user) = parse_user_row(text) {
                // Rows accumulate straight into the store; the bindhost
                // is filled in by the follow-up queries.
                conn.store().state.users.insert(user.to_string(), None);
            } else if is_list_frame(text) && conn.user_list_mark_sep() == USER_LIST_FRAMES {
                conn.pending.resolve("user_list", "");
            }
        }
        "controlpanel" => {
            if let Some(rest) = text.strip_prefix("BindHost") {
                if let Some((_, host)) = rest.split_once('=') {
                    conn.pending.resolve("bindhost", host.trim());
                }
            } else if let Some(rest) = text.strip_prefix("Admin") {
                if let Some((_, flag)) = rest.split_once('=') {
                    conn.pending.resolve("bncadmin", flag.trim());
                }
            }
        }
        _ => {}
    }
}

/// A data row of the user listing: `| <username> | <n> | <n> |`.
fn parse_user_row(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix('|')?.strip_suffix('|')?;
    let fields: Vec<&str> = inner.split('|').map(str::trim).collect();
    match fields.as_slice() {
        [user, a, b]
            if !user.is_empty()
                && !a.is_empty()
                && !b.is_empty()
                && a.chars().all(|c| c.is_ascii_digit())
                && b.chars().all(|c| c.is_ascii_digit()) =>
        {
            Some(user)
        }
        _ => None,
    }
}

/// A terminator frame of the user listing: a run of `=` / `+`.
fn is_list_frame(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty() && t.chars().all(|c| c == '=' || c == '+')
}

/// Track our own nick through server-acknowledged NICK changes.
pub struct NickChangeHandler;

#[async_trait]
impl RawHandler for NickChangeHandler {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        _registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult {
        if event.nick.as_deref() == Some(conn.nick().as_str()) {
            if let Some(new_nick) = event.params.first() {
                conn.set_nick(new_nick);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_rows_parse() {
        assert_eq!(parse_user_row("| alice | 1 | 2 |"), Some("alice"));
        assert_eq!(parse_user_row("|bob|0|0|"), Some("bob"));
        assert_eq!(parse_user_row("| Username | Networks | Clients |"), None);
        assert_eq!(parse_user_row("+=======+====+====+"), None);
        assert_eq!(parse_user_row("not a table row"), None);
    }

    #[test]
    fn list_frames_detect() {
        assert!(is_list_frame("==============="));
        assert!(is_list_frame("+====+====+"));
        assert!(!is_list_frame("| alice | 1 | 2 |"));
        assert!(!is_list_frame(""));
    }
}
