//! Configuration file for the `strand` binary.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strand_net::NetworkConfig;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node identity
    pub node: NodeConfig,
    /// Network settings, passed straight to the network facade
    pub network: NetworkConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// File holding the hex-encoded private key
    pub key_file: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("strand")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key_file: config_dir().join("identity.key"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, else fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        let net = &self.network;
        if net.inbound_streams_per_peer == 0 {
            anyhow::bail!("inbound_streams_per_peer must be at least 1");
        }
        if net.dial.max_parallel_addrs == 0 {
            anyhow::bail!("dial.max_parallel_addrs must be at least 1");
        }
        if net.mux.max_streams == 0 || net.mux.accept_backlog == 0 {
            anyhow::bail!("mux.max_streams and mux.accept_backlog must be at least 1");
        }
        if net.mux.max_frame_size == 0 || net.mux.max_frame_size > 16 * 1024 * 1024 {
            anyhow::bail!("mux.max_frame_size must be between 1 byte and 16MB");
        }
        if (net.mux.initial_window as usize) < net.mux.max_frame_size {
            anyhow::bail!("mux.initial_window must hold at least one full frame");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.network.listen_addrs.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.node.key_file.ends_with("strand/identity.key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.network.dial.max_parallel_addrs = 0;
        assert!(config.validate().is_err());

        config.network.dial.max_parallel_addrs = 4;
        config.network.mux.initial_window = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
            [network]
            listen_addrs = ["/ip4/0.0.0.0/tcp/4001"]

            [network.dial]
            backoff = 1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.network.listen_addrs.len(), 1);
        assert_eq!(config.network.dial.backoff, Duration::from_secs(1));
        assert_eq!(config.network.dial.timeout, Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.network.listen_addrs = vec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()];
        config.logging.level = "debug".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network, config.network);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
