//! Configuration management for the ffu_controld daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that defines the remote listener, record storage, buses and daisy-chain
//! interfaces.

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

use crate::bus::BusId;

/// Main configuration structure for the ffu_controld daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// remote:
///   listen: "0.0.0.0:16001"
/// storage:
///   directory: "/var/lib/ffu_controld/ffus"
/// status_poll_seconds: 5
/// buses:
///   - id: 0
///     kind: simulated
/// daisy_chains:
///   - bus: 0
///     input_bit: 0
///     output_bit: 1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    #[serde(default)]
    pub remote: RemoteCfg,

    #[serde(default)]
    pub storage: StorageCfg,

    /// Interval of the periodic status refresh in seconds, 0 disables it.
    #[serde(default = "defaults::status_poll_seconds")]
    pub status_poll_seconds: u16,

    /// Bus lines devices can be attached to.
    #[serde(default)]
    pub buses: Vec<BusCfg>,

    /// Daisy-chain addressing interfaces, one per bus at most.
    #[serde(default)]
    pub daisy_chains: Vec<DaisyChainCfg>,
}

/// Listener of the remote control protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCfg {
    #[serde(default = "defaults::listen")]
    pub listen: String,
}

impl Default for RemoteCfg {
    fn default() -> Self {
        Self {
            listen: defaults::listen(),
        }
    }
}

/// Where device records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCfg {
    #[serde(default = "defaults::storage_directory")]
    pub directory: PathBuf,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            directory: defaults::storage_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusCfg {
    pub id: BusId,
    pub kind: BusKind,
}

/// Bus driver variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    /// In-process bus answering every request immediately.
    Simulated,
}

/// Digital input/output pair used for daisy-chain addressing of a bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaisyChainCfg {
    pub bus: BusId,
    pub input_bit: u8,
    pub output_bit: u8,
    #[serde(default = "defaults::poll_millis")]
    pub poll_millis: u64,
}

impl DaisyChainCfg {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_millis)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            remote: RemoteCfg::default(),
            storage: StorageCfg::default(),
            status_poll_seconds: defaults::status_poll_seconds(),
            buses: Vec::new(),
            daisy_chains: Vec::new(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    ///
    /// Bus identifiers must be unique and every daisy chain must refer to a
    /// configured bus with a non-zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported config version {}", self.version);
        }

        let mut bus_ids = HashSet::new();
        for bus in &self.buses {
            if !bus_ids.insert(bus.id) {
                bail!("Bus {} is configured more than once", bus.id);
            }
        }

        for chain in &self.daisy_chains {
            if !bus_ids.contains(&chain.bus) {
                bail!("Daisy chain references unknown bus {}", chain.bus);
            }
            if chain.poll_millis == 0 {
                bail!("Daisy chain of bus {} has a zero poll interval", chain.bus);
            }
        }

        Ok(())
    }

    /// Interval of the periodic status refresh, if enabled.
    pub fn status_poll_interval(&self) -> Option<Duration> {
        (self.status_poll_seconds > 0).then(|| Duration::from_secs(self.status_poll_seconds.into()))
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn listen() -> String {
        String::from("0.0.0.0:16001")
    }

    pub fn storage_directory() -> PathBuf {
        PathBuf::from("/var/lib/ffu_controld/ffus")
    }

    pub fn status_poll_seconds() -> u16 {
        5
    }

    pub fn poll_millis() -> u64 {
        100
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var("FFU_CONTROLD_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("ffu_controld/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/ffu_controld/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    bail!("Configuration file not found in any standard location")
}

/// Configuration manager that handles both config data and file operations.
///
/// # Example
///
/// ```no_run
/// use ffu_controld::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
/// let listen = config_manager.get().await.remote.listen.clone();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. FFU_CONTROLD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/ffu_controld/config.yml or ~/.config/ffu_controld/config.yml
    /// 4. /etc/ffu_controld/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clones the current configuration.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    fn simulated(id: BusId) -> BusCfg {
        BusCfg {
            id,
            kind: BusKind::Simulated,
        }
    }

    fn chain(bus: BusId, poll_millis: u64) -> DaisyChainCfg {
        DaisyChainCfg {
            bus,
            input_bit: 0,
            output_bit: 1,
            poll_millis,
        }
    }

    #[tokio::test]
    async fn config_load_valid_yaml() {
        let yaml_content = r#"
version: 1
remote:
  listen: "127.0.0.1:17000"
storage:
  directory: "/tmp/ffus"
status_poll_seconds: 0
buses:
  - id: 0
    kind: simulated
  - id: 1
    kind: simulated
daisy_chains:
  - bus: 1
    input_bit: 4
    output_bit: 5
"#;
        let temp_file = create_temp_config(yaml_content);

        let config_manager = ConfigManager::load(Some(temp_file.path().to_path_buf()))
            .await
            .unwrap();
        let config = config_manager.clone_config().await;

        assert_eq!(config.remote.listen, "127.0.0.1:17000");
        assert_eq!(config.storage.directory, PathBuf::from("/tmp/ffus"));
        assert_eq!(config.status_poll_interval(), None);
        assert_eq!(config.buses.len(), 2);
        assert_eq!(config.daisy_chains[0].input_bit, 4);
        assert_eq!(config.daisy_chains[0].poll_millis, 100);
    }

    #[tokio::test]
    async fn config_load_applies_defaults() {
        let temp_file = create_temp_config("version: 1\n");

        let config = ConfigManager::load(Some(temp_file.path().to_path_buf()))
            .await
            .unwrap()
            .clone_config()
            .await;

        assert_eq!(config.remote.listen, "0.0.0.0:16001");
        assert_eq!(config.status_poll_interval(), Some(Duration::from_secs(5)));
        assert!(config.buses.is_empty());
    }

    #[tokio::test]
    async fn config_load_rejects_unknown_version() {
        let temp_file = create_temp_config("version: 2\n");

        let result = ConfigManager::load(Some(temp_file.path().to_path_buf())).await;

        assert!(result.is_err());
    }

    #[test]
    fn config_validate_duplicate_bus() {
        let config = Config {
            buses: vec![simulated(1), simulated(1)],
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn config_validate_daisy_chain_references() {
        let config = Config {
            buses: vec![simulated(0)],
            daisy_chains: vec![chain(2, 100)],
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("unknown bus 2"));

        let config = Config {
            buses: vec![simulated(0)],
            daisy_chains: vec![chain(0, 0)],
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            buses: vec![simulated(0)],
            daisy_chains: vec![chain(0, 100)],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
