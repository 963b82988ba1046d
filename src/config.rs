//! Configuration management for termlink.
//!
//! Settings come from `~/.termlink/config.toml`, then command-line flags
//! override them. Every field is optional in the file.
//!
//! # Configuration File
//!
//! ```toml
//! # Terminal server base URL
//! server = "http://127.0.0.1:5000"
//!
//! # Socket.IO namespace of the terminal endpoint
//! namespace = "/terminal"
//!
//! # Bearer token (falls back to the TERMLINK_TOKEN environment variable)
//! token = "..."
//!
//! # Working directory requested for the remote shell
//! initial_cwd = "/home/me"
//!
//! # Scrollback lines kept in memory
//! scrollback_limit = 5000
//!
//! # Give up on a handshake after this many seconds (default 10)
//! connect_timeout_secs = 10
//!
//! # Server events carrying shell output
//! output_events = ["output", "terminal_output", "outputMessage"]
//!
//! [status_bar]
//! visible = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::output::MAX_LINES;
use crate::core::session::{SessionOptions, DEFAULT_CONNECT_TIMEOUT};

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV: &str = "TERMLINK_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config: {0}")]
    Write(#[source] std::io::Error),

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Terminal server base URL
    pub server: String,
    /// Socket.IO namespace
    pub namespace: String,
    /// Bearer token
    pub token: Option<String>,
    /// Initial remote working directory
    pub initial_cwd: Option<String>,
    /// Scrollback capacity
    pub scrollback_limit: usize,
    /// Handshake timeout in seconds
    pub connect_timeout_secs: Option<u64>,
    /// Output event names
    pub output_events: Vec<String>,
    /// Status bar settings
    pub status_bar: StatusBarConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:5000".to_string(),
            namespace: "/terminal".to_string(),
            token: None,
            initial_cwd: None,
            scrollback_limit: MAX_LINES,
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT.as_secs()),
            output_events: SessionOptions::default().output_events,
            status_bar: StatusBarConfig::default(),
        }
    }
}

/// Status bar configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBarConfig {
    pub visible: bool,
}

impl Default for StatusBarConfig {
    fn default() -> Self {
        Self { visible: true }
    }
}

/// Command-line overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub server: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
    pub initial_cwd: Option<String>,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file is missing
    pub fn load() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default path
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(ConfigError::Write)?;
        }
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(ConfigError::Write)
    }

    /// Get config file path
    pub fn get_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Apply command-line flags, then the token environment variable
    pub fn merge(&mut self, overrides: Overrides, env_token: Option<String>) {
        if let Some(server) = overrides.server {
            self.server = server;
        }
        if let Some(namespace) = overrides.namespace {
            self.namespace = namespace;
        }
        if let Some(cwd) = overrides.initial_cwd {
            self.initial_cwd = Some(cwd);
        }
        if overrides.token.is_some() {
            self.token = overrides.token;
        }
        if self.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            self.token = env_token.filter(|t| !t.trim().is_empty());
        }
    }

    /// Session settings derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            token: self.token.clone(),
            initial_cwd: self.initial_cwd.clone(),
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            output_events: self.output_events.clone(),
            scrollback_limit: self.scrollback_limit.max(1),
        }
    }
}

/// `~/.termlink`
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".termlink"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: Config = toml::from_str("server = \"http://example.com\"").unwrap();
        assert_eq!(config.server, "http://example.com");
        assert_eq!(config.namespace, "/terminal");
        assert_eq!(config.scrollback_limit, 5000);
        assert_eq!(config.connect_timeout_secs, Some(10));
        assert_eq!(config.output_events, vec!["output", "terminal_output", "outputMessage"]);
        assert!(config.status_bar.visible);
    }

    #[test]
    fn test_load_and_save_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            token: Some("secret".into()),
            connect_timeout_secs: Some(5),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "scrollback_limit = \"lots\"").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = Config {
            server: "http://file".into(),
            token: Some("from-file".into()),
            ..Config::default()
        };
        config.merge(
            Overrides {
                server: Some("http://cli".into()),
                token: Some("from-cli".into()),
                ..Overrides::default()
            },
            Some("from-env".into()),
        );
        assert_eq!(config.server, "http://cli");
        assert_eq!(config.token.as_deref(), Some("from-cli"));
    }

    #[test]
    fn test_env_token_fallback() {
        let mut config = Config::default();
        config.merge(Overrides::default(), Some("from-env".into()));
        assert_eq!(config.token.as_deref(), Some("from-env"));

        let mut config = Config::default();
        config.merge(Overrides::default(), Some("  ".into()));
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_session_options() {
        let config = Config {
            connect_timeout_secs: Some(3),
            scrollback_limit: 0,
            ..Config::default()
        };
        let options = config.session_options();
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.scrollback_limit, 1);
    }
}
