//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the bot works out of the box.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_nickname")]
    pub nickname: String,
    #[serde(default)]
    pub dcc: DccConfig,
    #[serde(default)]
    pub nickserv: NickServConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            dcc: DccConfig::default(),
            nickserv: NickServConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// DCC listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DccConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// `0` picks an ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Skips the lookup service when set.
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default = "default_ip_lookup_url")]
    pub ip_lookup_url: String,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Peers pre-registered at startup.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_host: default_listen_host(),
            listen_port: 0,
            public_ip: None,
            ip_lookup_url: default_ip_lookup_url(),
            read_chunk: default_read_chunk(),
            workers: default_workers(),
            peers: Vec::new(),
        }
    }
}

/// A nickname expected to connect from `ip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub nick: String,
    pub ip: String,
}

/// NickServ status lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NickServConfig {
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
}

impl Default for NickServConfig {
    fn default() -> Self {
        Self {
            status_timeout_secs: default_status_timeout(),
        }
    }
}

/// Tracing and event log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub events_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            events_enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_nickname() -> String {
    "DevBot".to_string()
}
fn default_true() -> bool {
    true
}
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_ip_lookup_url() -> String {
    "https://api.ipify.org".to_string()
}
fn default_read_chunk() -> usize {
    512
}
fn default_workers() -> usize {
    4
}
fn default_status_timeout() -> u64 {
    10
}
fn default_filter() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "~/.local/share/dccbot/logs".to_string()
}
