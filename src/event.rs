//! Event type handed to dispatch.
//!
//! One `Event` is built per received line and consumed synchronously by
//! the matching handlers; it is never persisted.

use crate::proto::Line;

/// Commands whose first parameter names the conversation target.
const TARGETED_COMMANDS: &[&str] = &["PRIVMSG", "NOTICE"];

/// A parsed line plus connection context.
#[derive(Debug, Clone)]
pub struct Event {
    /// The command name or numeric.
    pub command: String,
    /// Parameters in wire order.
    pub params: Vec<String>,
    /// Sender nick, when the line carried a user prefix.
    pub nick: Option<String>,
    /// Sender username (ident).
    pub user: Option<String>,
    /// Sender hostname.
    pub host: Option<String>,
    /// Full `nick!user@host` prefix text, for admin mask matching.
    pub mask: Option<String>,
    /// Reply target: the channel the message arrived on, or the sender
    /// nick when it was a private query addressed to us.
    pub target: Option<String>,
}

impl Event {
    /// Derive an event from a parsed line.
    ///
    /// `own_nick` is the bot's current nick; targets equal to it are
    /// folded back to the sender so replies go to the right place.
    pub fn from_line(line: &Line, own_nick: &str) -> Self {
        let (nick, user, host, mask) = match &line.prefix {
            Some(p) => (
                p.nick.clone(),
                p.user.clone(),
                p.host.clone(),
                Some(p.raw.clone()),
            ),
            None => (None, None, None, None),
        };

        let target = if TARGETED_COMMANDS.contains(&line.command.as_str()) {
            line.params.first().map(|t| {
                if t == own_nick {
                    nick.clone().unwrap_or_else(|| t.clone())
                } else {
                    t.clone()
                }
            })
        } else {
            None
        };

        Self {
            command: line.command.clone(),
            params: line.params.clone(),
            nick,
            user,
            host,
            mask,
            target,
        }
    }

    /// Last parameter, if any. For PRIVMSG/NOTICE this is the message text.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: &str) -> Event {
        Event::from_line(&Line::parse(raw).unwrap(), "bnc")
    }

    #[test]
    fn channel_message_targets_channel() {
        let ev = event(":alice!a@h PRIVMSG #chan :hello");
        assert_eq!(ev.nick.as_deref(), Some("alice"));
        assert_eq!(ev.target.as_deref(), Some("#chan"));
        assert_eq!(ev.trailing(), Some("hello"));
    }

    #[test]
    fn private_query_targets_sender() {
        let ev = event(":alice!a@h PRIVMSG bnc :hello");
        assert_eq!(ev.target.as_deref(), Some("alice"));
    }

    #[test]
    fn numeric_has_no_target() {
        let ev = event(":irc.example.com 318 bnc alice :End of /WHOIS list.");
        assert_eq!(ev.target, None);
        assert_eq!(ev.mask.as_deref(), Some("irc.example.com"));
    }

    #[test]
    fn prefixless_line_has_no_identity() {
        let ev = event("PING :token");
        assert_eq!(ev.nick, None);
        assert_eq!(ev.mask, None);
    }
}
