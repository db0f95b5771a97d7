//! Daemon configuration file.
//!
//! ```toml
//! data_file = "/var/lib/cfgstore/registry.bin"
//! save_delay_secs = 30
//! default_lang = "en"
//!
//! [unix]
//! enabled = true
//! path = "/run/cfgstore.sock"
//!
//! [tcp]
//! enabled = true
//! host = "127.0.0.1"
//! port = 707
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for UnixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: cfgstore_protocol::socket_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl TcpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 707,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub unix: UnixConfig,
    pub tcp: TcpConfig,
    /// Snapshot file holding the persisted registry.
    pub data_file: PathBuf,
    pub save_delay_secs: u64,
    /// Language used when a help lookup names none or an unknown one.
    pub default_lang: String,
    /// passwd(5) file used to name accounts in error messages. Unset
    /// disables account lookup.
    pub passwd: Option<PathBuf>,
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            unix: UnixConfig::default(),
            tcp: TcpConfig::default(),
            data_file: default_data_file(),
            save_delay_secs: 30,
            default_lang: "en".to_string(),
            passwd: Some(PathBuf::from(cfgstore_core::PasswdAccounts::SYSTEM_PATH)),
            pid_file: crate::lifecycle::pid_path(),
        }
    }
}

fn default_data_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cfgstore")
        .join("registry.bin")
}

impl DaemonConfig {
    /// Read a config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(content)
    }

    /// Built-in defaults, overlaid by `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                debug!(path = %path.display(), "Reading daemon config");
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_secs(self.save_delay_secs)
    }

    pub fn has_transport(&self) -> bool {
        self.unix.enabled || self.tcp.enabled
    }
}
