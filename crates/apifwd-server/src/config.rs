//! Server configuration: TOML file + `PORT` environment + CLI overrides.

use apifwd_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8654
}
fn default_max_frame_size() -> usize {
    1_048_576
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub max_frame_size: Option<usize>,
    pub log_level: Option<String>,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl ServerConfig {
    /// Load config from TOML file, then apply `PORT` and CLI overrides.
    ///
    /// Precedence, highest first: CLI, `PORT`, file, defaults. A missing
    /// config file means defaults; an unreadable or invalid one is an error.
    pub fn load(
        config_path: Option<&Path>,
        env_port: Option<&str>,
        cli: CliOverrides,
    ) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let port = cli
            .port
            .or_else(|| env_port.and_then(port_from_env))
            .unwrap_or(file_config.server.port);

        Ok(Self {
            bind: cli.bind.unwrap_or(file_config.server.bind),
            port,
            max_frame_size: cli
                .max_frame_size
                .unwrap_or(file_config.server.max_frame_size),
            log_level: cli.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Socket address to listen on.
    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address {:?}: {e}", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Parse a `PORT` value. Unparsable or zero values are ignored.
fn port_from_env(value: &str) -> Option<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => {
            warn!(value, "ignoring invalid PORT");
            None
        }
        Ok(port) => Some(port),
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(contents: &str) -> PathBuf {
        use rand::Rng;
        let name = format!("apifwd-config-{:x}.toml", rand::thread_rng().gen::<u64>());
        let path = std::env::temp_dir().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::load(None, None, CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 8654);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.max_frame_size, 1_048_576);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join("apifwd-definitely-missing.toml");
        let cfg = ServerConfig::load(Some(&path), None, CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 8654);
    }

    #[test]
    fn file_then_env_then_cli() {
        let path = temp_config("[server]\nport = 9000\nbind = \"127.0.0.1\"\nmax_frame_size = 2048\n");

        let cfg = ServerConfig::load(Some(&path), None, CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.max_frame_size, 2048);

        let cfg = ServerConfig::load(Some(&path), Some("9100"), CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 9100);

        let cli = CliOverrides {
            port: Some(9200),
            ..Default::default()
        };
        let cfg = ServerConfig::load(Some(&path), Some("9100"), cli).unwrap();
        assert_eq!(cfg.port, 9200);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn invalid_env_port_falls_back() {
        for bad in ["", "abc", "0", "70000"] {
            let cfg = ServerConfig::load(None, Some(bad), CliOverrides::default()).unwrap();
            assert_eq!(cfg.port, 8654, "PORT={bad:?}");
        }
    }

    #[test]
    fn invalid_file_is_an_error() {
        let path = temp_config("[server]\nport = \"not a number\"\n");
        let err = ServerConfig::load(Some(&path), None, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn bind_addr_parses() {
        let mut cfg = ServerConfig::load(None, None, CliOverrides::default()).unwrap();
        assert_eq!(cfg.bind_addr().unwrap().to_string(), "0.0.0.0:8654");

        cfg.bind = "localhost".into();
        assert!(cfg.bind_addr().is_err());
    }
}
