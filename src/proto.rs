//! IRC wire format parsing and assembly.
//!
//! IRC message format:
//! ```text
//! [@tags] [:prefix] <command> [params...] [:trailing]
//! ```
//!
//! Line framing (splitting the byte stream on `\r\n`) is handled by
//! `LinesCodec` at the connection layer; this module takes one complete
//! line and breaks it into tags, prefix, command, and parameters.

use std::fmt;

/// A parsed IRC line.
///
/// `params` preserves wire order; the trailing parameter (if any) is the
/// last entry and may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Raw IRCv3 tags string (without the leading `@`), if present.
    pub tags: Option<String>,
    /// Message prefix (origin), if present.
    pub prefix: Option<Prefix>,
    /// The command name or numeric.
    pub command: String,
    /// Command parameters, including the trailing parameter.
    pub params: Vec<String>,
}

impl Line {
    /// Parse a single IRC line.
    ///
    /// Returns `None` when the line cannot yield at least a command; the
    /// caller drops such lines with a log event rather than failing the
    /// connection.
    pub fn parse(input: &str) -> Option<Self> {
        let mut rest = input.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        // Tags come first, up to the first space.
        let tags = if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, after) = tagged.split_once(' ')?;
            rest = after.trim_start_matches(' ');
            Some(tags.to_string())
        } else {
            None
        };

        // Then the prefix, up to the first space.
        let prefix = if let Some(prefixed) = rest.strip_prefix(':') {
            let (raw, after) = prefixed.split_once(' ')?;
            rest = after.trim_start_matches(' ');
            Some(Prefix::parse(raw))
        } else {
            None
        };

        // Everything after " :" is one trailing parameter.
        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_string();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }
}

impl fmt::Display for Line {
    /// Assemble the wire form: space-joined tokens with the final
    /// parameter prefixed by `:` when it needs the trailing marker.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            write!(f, "@{} ", tags)?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix.raw)?;
        }
        write!(f, "{}", self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// Decomposed message prefix: `nick[!user][@host]`.
///
/// Any of user/host may be absent; `raw` keeps the original text for
/// reassembly and mask matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub nick: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub raw: String,
}

impl Prefix {
    /// Split a prefix into its components.
    ///
    /// The nick is the segment before an optional `!user`, itself before
    /// an optional `@host`.
    pub fn parse(s: &str) -> Self {
        let (before_at, host) = match s.split_once('@') {
            Some((before, host)) => (before, opt(host)),
            None => (s, None),
        };
        let (nick, user) = match before_at.split_once('!') {
            Some((nick, user)) => (opt(nick), opt(user)),
            None => (opt(before_at), None),
        };

        Self {
            nick,
            user,
            host,
            raw: s.to_string(),
        }
    }
}

fn opt(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
