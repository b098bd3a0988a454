pub mod model;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use model::{AppConfig, DccConfig, LoggingConfig, NickServConfig, PeerConfig};

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dccbot")
        .join("config.toml")
}

/// Load the config from `path`, or from the user config directory when no
/// path is given. A missing default file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = config_path();
            if !p.exists() {
                return Ok(AppConfig::default());
            }
            p
        }
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).with_context(|| "Failed to parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.nickname, "DevBot");
        assert!(cfg.dcc.enabled);
        assert_eq!(cfg.dcc.listen_port, 0);
        assert_eq!(cfg.dcc.read_chunk, 512);
        assert_eq!(cfg.nickserv.status_timeout_secs, 10);
        assert!(!cfg.logging.events_enabled);
    }

    #[test]
    fn test_peers_and_overrides() {
        let cfg = parse_config(
            r#"
            nickname = "MCPBot"

            [dcc]
            listen_port = 40000
            public_ip = "203.0.113.7"

            [[dcc.peers]]
            nick = "alice"
            ip = "10.0.0.5"

            [logging]
            events_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.nickname, "MCPBot");
        assert_eq!(cfg.dcc.listen_port, 40000);
        assert_eq!(cfg.dcc.public_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(cfg.dcc.peers.len(), 1);
        assert_eq!(cfg.dcc.peers[0].nick, "alice");
        assert!(cfg.logging.events_enabled);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "nickname = \"PMDevBot\"\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().nickname, "PMDevBot");
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
