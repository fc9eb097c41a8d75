//! Configuration management for chainfacade

use bitcoin::p2p::Magic;
use crate::error::{FacadeError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub electrum: ElectrumConfig,
    #[serde(default)]
    pub p2p: P2pConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_emulated_version")]
    pub emulated_daemon_version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            version: default_version(),
            emulated_daemon_version: default_emulated_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElectrumConfig {
    #[serde(default = "default_electrum_address")]
    pub address: String,
    #[serde(default = "default_electrum_timeout")]
    pub timeout_secs: u64,
}

impl Default for ElectrumConfig {
    fn default() -> Self {
        Self {
            address: default_electrum_address(),
            timeout_secs: default_electrum_timeout(),
        }
    }
}

impl ElectrumConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2pConfig {
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_magic")]
    pub magic: String,
    #[serde(default = "default_p2p_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            magic: default_magic(),
            timeout_secs: default_p2p_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl P2pConfig {
    /// Network magic as the four bytes that prefix every message.
    pub fn magic(&self) -> Result<Magic> {
        let bytes = hex::decode(&self.magic)
            .map_err(|e| FacadeError::Config(format!("p2p.magic is not hex: {}", e)))?;
        let bytes: [u8; 4] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            FacadeError::Config(format!("p2p.magic must be 4 bytes, got {}", bytes.len()))
        })?;
        Ok(Magic::from_bytes(bytes))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

fn default_chain() -> String {
    "main".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_emulated_version() -> String {
    "0.16".to_string()
}

fn default_max_attempts() -> u32 {
    4
}

fn default_enabled() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_database_path() -> String {
    "./data/headers.sqlite".to_string()
}

fn default_electrum_address() -> String {
    "127.0.0.1:50001".to_string()
}

fn default_electrum_timeout() -> u64 {
    10
}

fn default_magic() -> String {
    "f9beb4d9".to_string()
}

fn default_p2p_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("/chainfacade:{}/", env!("CARGO_PKG_VERSION"))
}

fn default_bind() -> String {
    "127.0.0.1:8332".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads the config at `path`, falling back to defaults when it is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config: Config = if path.exists() {
        toml::from_str(&fs::read_to_string(path)?)?
    } else {
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(FacadeError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.database.path.is_empty() {
            return Err(FacadeError::Config("database.path must be set".into()));
        }

        self.p2p.magic()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/chainfacade.toml").unwrap();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.database.path, "./data/headers.sqlite");
        assert_eq!(config.p2p.magic().unwrap().to_bytes(), [0xf9, 0xbe, 0xb4, 0xd9]);
        assert_eq!(config.api.bind, "127.0.0.1:8332");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retry]\nbackoff_ms = 50\n\n[p2p]\npeers = [\"10.0.0.1:8333\"]\nmagic = \"0b110907\""
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retry.backoff_ms, 50);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.p2p.peers, vec!["10.0.0.1:8333".to_string()]);
        assert_eq!(config.p2p.magic().unwrap().to_bytes(), [0x0b, 0x11, 0x09, 0x07]);
        assert_eq!(config.service.chain, "main");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(FacadeError::Config(_))));

        let mut config = Config::default();
        config.database.path.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.p2p.magic = "f9beb4".into();
        assert!(config.validate().is_err());
    }
}
