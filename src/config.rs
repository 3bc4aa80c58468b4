//! Configuration loading.
//!
//! Loaded once at startup from a TOML file given on argv; immutable for
//! the process lifetime. A restart is required to pick up changes.

use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// IRC server connection settings.
    pub server: ServerConfig,
    /// BNC service settings used when provisioning accounts.
    pub bnc: BncConfig,
    /// Admin mask glob patterns (`nick!user@host`).
    #[serde(default)]
    pub admins: Vec<String>,
    /// Prefix of the bouncer's status/module pseudo-users.
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,
    /// Chat command prefix.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Operational log channel; `None` disables channel logging.
    pub log_channel: Option<String>,
    /// Path to the persisted queue/account document.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Full-resync interval in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Address pool bindhosts are drawn from.
    #[serde(default = "default_bindhost_net")]
    pub bindhost_net: Ipv4Net,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// IRC server connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    #[serde(default)]
    pub tls: bool,
    /// Server password sent with PASS before registration.
    pub password: Option<String>,
    /// Bot nickname.
    #[serde(default = "default_nick")]
    pub nick: String,
    /// Username/realname for USER registration.
    #[serde(default = "default_nick")]
    pub user: String,
}

/// Details of the bouncer service itself, reproduced in credential memos
/// and in the post-provision reconnect command.
#[derive(Debug, Clone, Deserialize)]
pub struct BncConfig {
    /// Hostname users connect their clients to.
    pub host: String,
    /// SSL client port.
    #[serde(default = "default_port_ssl")]
    pub port_ssl: u16,
    /// Plaintext client port.
    #[serde(default = "default_port_plain")]
    pub port_plain: u16,
    /// ZNC network name new accounts are reconnected to.
    pub network: String,
    /// Template account cloned for new users.
    #[serde(default = "default_template_user")]
    pub template_user: String,
}

fn default_status_prefix() -> String {
    "*".to_string()
}

fn default_command_prefix() -> String {
    ".".to_string()
}

fn default_data_file() -> PathBuf {
    PathBuf::from("bnc.json")
}

fn default_sync_interval() -> u64 {
    8 * 60 * 60
}

fn default_bindhost_net() -> Ipv4Net {
    "127.0.0.0/16".parse().expect("static network literal")
}

fn default_nick() -> String {
    "bnc".to_string()
}

fn default_port_ssl() -> u16 {
    5457
}

fn default_port_plain() -> u16 {
    5456
}

fn default_template_user() -> String {
    "BNCClient".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
host = "irc.example.org"
port = 6667
password = "bnc:hunter2"

[bnc]
host = "bnc.example.org"
network = "ExampleNet"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.host, "irc.example.org");
        assert!(!config.server.tls);
        assert_eq!(config.server.nick, "bnc");
        assert_eq!(config.status_prefix, "*");
        assert_eq!(config.command_prefix, ".");
        assert_eq!(config.sync_interval_secs, 8 * 60 * 60);
        assert_eq!(config.bindhost_net.to_string(), "127.0.0.0/16");
        assert_eq!(config.bnc.port_ssl, 5457);
        assert_eq!(config.bnc.port_plain, 5456);
        assert_eq!(config.bnc.template_user, "BNCClient");
        assert!(config.admins.is_empty());
        assert!(config.log_channel.is_none());
    }

    #[test]
    fn full_config_overrides() {
        let config: Config = toml::from_str(
            r##"
admins = ["*!*@staff.example.org"]
status_prefix = "&"
command_prefix = "!"
log_channel = "#bnc-log"
data_file = "/var/lib/bnckeeper/bnc.json"
sync_interval_secs = 3600
bindhost_net = "10.7.0.0/24"

[server]
host = "irc.example.org"
port = 6697
tls = true
password = "secret"
nick = "keeper"
user = "keeper"

[bnc]
host = "bnc.example.org"
network = "ExampleNet"
port_ssl = 7001
port_plain = 7000
template_user = "Template"
"##,
        )
        .unwrap();
        assert!(config.server.tls);
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.log_channel.as_deref(), Some("#bnc-log"));
        assert_eq!(config.bindhost_net.prefix_len(), 24);
        assert_eq!(config.admins.len(), 1);
    }
}
