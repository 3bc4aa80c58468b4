//! Event dispatch.
//!
//! The [`Registry`] is built once at startup and holds two handler
//! families: raw handlers keyed by exact IRC command (plus a wildcard
//! slot offered every event), and chat command records triggered by
//! prefixed PRIVMSG text.
//!
//! Raw handlers run inline, in registration order; a failing handler is
//! logged and the rest still run. Chat command flows are spawned as
//! independent tasks so they can suspend on correlated replies without
//! stalling the read loop.

mod commands;
mod raw;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::conn::Conn;
use crate::error::HandlerResult;
use crate::event::Event;

/// Handler for raw protocol events.
#[async_trait]
pub trait RawHandler: Send + Sync {
    async fn handle(
        &self,
        conn: &Arc<Conn>,
        registry: &Arc<Registry>,
        event: &Event,
    ) -> HandlerResult;
}

/// Context passed to a chat command flow.
pub struct CommandContext {
    pub conn: Arc<Conn>,
    /// Caller nick.
    pub nick: String,
    /// Caller's full `nick!user@host` mask.
    pub mask: String,
    /// Where the command arrived (channel, or the caller for queries).
    pub target: String,
    /// Argument text after the command word (may be empty).
    pub text: String,
}

impl CommandContext {
    /// First word of the argument text.
    pub fn first_arg(&self) -> &str {
        self.text.split_whitespace().next().unwrap_or("")
    }

    /// Reply where the command arrived.
    pub async fn reply(&self, text: &str) {
        self.conn.msg(&self.target, text).await;
    }

    /// Reply privately to the caller.
    pub async fn reply_private(&self, text: &str) {
        self.conn.msg(&self.nick, text).await;
    }
}

/// Handler for a chat command.
#[async_trait]
pub trait ChatCommand: Send + Sync {
    async fn run(&self, ctx: CommandContext) -> HandlerResult;
}

/// A registered chat command with its gating flags and doc line.
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Caller must match an admin mask pattern.
    pub admin: bool,
    /// Command requires non-empty argument text; without it the doc
    /// line is sent back instead of invoking the handler.
    pub require_param: bool,
    /// One-line usage/documentation text.
    pub help: &'static str,
    handler: Box<dyn ChatCommand>,
}

struct RawEntry {
    /// Exact command to match; empty string is the wildcard slot.
    command: &'static str,
    name: &'static str,
    handler: Box<dyn RawHandler>,
}

/// Registry of raw and chat command handlers.
pub struct Registry {
    raw: Vec<RawEntry>,
    commands: HashMap<&'static str, Arc<CommandSpec>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with all handlers registered.
    pub fn new() -> Self {
        let mut registry = Self {
            raw: Vec::new(),
            commands: HashMap::new(),
        };

        registry.register_raw("", "wire_trace", Box::new(raw::WireTraceHandler));
        registry.register_raw("PING", "ping", Box::new(raw::PingHandler));
        registry.register_raw("318", "whois_end", Box::new(raw::WhoisEndHandler));
        registry.register_raw("330", "whois_acct", Box::new(raw::WhoisAcctHandler));
        registry.register_raw("NOTICE", "nickserv_info", Box::new(raw::NickServInfoHandler));
        registry.register_raw("PRIVMSG", "privmsg", Box::new(raw::PrivmsgHandler));
        registry.register_raw("NICK", "nick_change", Box::new(raw::NickChangeHandler));

        for spec in commands::all() {
            registry.register_command(spec);
        }

        registry
    }

    fn register_raw(
        &mut self,
        command: &'static str,
        name: &'static str,
        handler: Box<dyn RawHandler>,
    ) {
        self.raw.push(RawEntry {
            command,
            name,
            handler,
        });
    }

    fn register_command(&mut self, spec: CommandSpec) {
        let spec = Arc::new(spec);
        self.commands.insert(spec.name, Arc::clone(&spec));
        for alias in spec.aliases {
            self.commands.insert(alias, Arc::clone(&spec));
        }
    }

    /// Look up a chat command by its word (exact match; aliases resolve
    /// to the same record).
    pub fn command(&self, word: &str) -> Option<&Arc<CommandSpec>> {
        self.commands.get(word)
    }

    /// Offer an event to every matching raw handler, in registration
    /// order. One handler failing never prevents the rest from running.
    pub async fn dispatch(self: &Arc<Self>, conn: &Arc<Conn>, event: &Event) {
        for entry in &self.raw {
            if !entry.command.is_empty() && entry.command != event.command {
                continue;
            }
            if let Err(e) = entry.handler.handle(conn, self, event).await {
                error!(handler = entry.name, error = %e, "Error in raw handler");
                conn.chan_log(&format!("Error in {} handler: {e}", entry.name))
                    .await;
            }
        }
    }

    /// Gate and launch a chat command flow.
    ///
    /// Gating order: unknown command is silently ignored; admin-gated
    /// commands from non-admin masks are ignored; a missing required
    /// argument earns the doc line instead of an invocation.
    pub async fn dispatch_command(
        &self,
        conn: &Arc<Conn>,
        event: &Event,
        word: &str,
        text: &str,
    ) {
        let Some(spec) = self.command(word) else {
            return;
        };
        let (Some(nick), Some(mask), Some(target)) = (&event.nick, &event.mask, &event.target)
        else {
            return;
        };
        if spec.admin && !conn.is_admin(mask) {
            return;
        }
        if spec.require_param && text.is_empty() {
            conn.msg(target, spec.help).await;
            return;
        }

        let ctx = CommandContext {
            conn: Arc::clone(conn),
            nick: nick.clone(),
            mask: mask.clone(),
            target: target.clone(),
            text: text.to_string(),
        };
        let spec = Arc::clone(spec);
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            if let Err(e) = spec.handler.run(ctx).await {
                error!(command = spec.name, error = %e, "Error in command handler");
                conn.chan_log(&format!("Error in {} command: {e}", spec.name))
                    .await;
            }
        });
    }
}
