//! Configuration handling for the btmesh tool.
//!
//! Values come from the `services.btmesh` section of a shared YAML config
//! file, then from `BTMESH_*` environment variables.

use anyhow::{bail, Result};
use mesh_bearer::DEFAULT_PROXY_MTU;
use mesh_storage::StorageMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Where networks and secure state are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Lost when the process exits
    Memory,
    /// Files under the data directory
    File,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(StorageKind::Memory),
            "file" => Ok(StorageKind::File),
            other => bail!("Invalid storage mode: {}. Use 'memory' or 'file'", other),
        }
    }
}

/// btmesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Directory holding the network document and secure state
    pub data_dir: PathBuf,
    /// Storage backend
    pub storage: StorageKind,
    /// Fsync frequency for file storage (1 = every write)
    pub fsync_every: u32,
    /// MTU used when segmenting Proxy PDUs
    pub proxy_mtu: usize,
    /// How long to wait for a reassembled message
    #[serde(with = "duration_format")]
    pub receive_timeout: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Name given to newly created networks
    pub network_name: String,
    /// Name of the local provisioner of newly created networks
    pub provisioner_name: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./meshdata"),
            storage: StorageKind::File,
            fsync_every: 1,
            proxy_mtu: DEFAULT_PROXY_MTU,
            receive_timeout: Duration::from_secs(1),
            log_level: "info".to_string(),
            network_name: "Mesh Network".to_string(),
            provisioner_name: "btmesh".to_string(),
        }
    }
}

mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    btmesh: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl MeshConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(service) = root.services.and_then(|s| s.btmesh) {
                        config.apply_service_config(service)?;
                    }
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", config_path.as_ref()),
        }

        config.apply_environment_overrides();

        info!(
            "Final btmesh configuration: storage={:?}, data_dir={:?}, proxy_mtu={}",
            config.storage, config.data_dir, config.proxy_mtu
        );
        Ok(config)
    }

    /// Storage mode for [`mesh_storage::Storage::from_mode`]
    pub fn storage_mode(&self) -> StorageMode {
        match self.storage {
            StorageKind::Memory => StorageMode::InMemory,
            StorageKind::File => StorageMode::File {
                data_dir: self.data_dir.clone(),
                fsync_every: self.fsync_every,
            },
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) -> Result<()> {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(dir) = arg.strip_prefix("--data-dir=") {
                self.data_dir = PathBuf::from(dir);
            } else if let Some(level) = arg.strip_prefix("--log-level=") {
                self.log_level = level.to_string();
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            self.apply_value(&key, value)?;
        }
        Ok(())
    }

    fn apply_value(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "services.btmesh.data_dir" => self.data_dir = PathBuf::from(value),
            "services.btmesh.storage" => self.storage = value.parse()?,
            "services.btmesh.fsync_every" => {
                if let Ok(every) = value.parse::<u32>() {
                    self.fsync_every = every.max(1);
                }
            }
            "services.btmesh.proxy_mtu" => {
                if let Ok(mtu) = value.parse::<usize>() {
                    self.proxy_mtu = mtu;
                }
            }
            "services.btmesh.receive_timeout" => {
                self.receive_timeout = humantime::parse_duration(&value)?;
            }
            "services.btmesh.log_level" => self.log_level = value,
            "services.btmesh.network_name" => self.network_name = value,
            "services.btmesh.provisioner_name" => self.provisioner_name = value,
            _ => {}
        }
        Ok(())
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BTMESH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
            info!("Data directory overridden by environment: {:?}", self.data_dir);
        }

        if let Ok(storage) = std::env::var("BTMESH_STORAGE") {
            match storage.parse() {
                Ok(kind) => {
                    self.storage = kind;
                    info!("Storage overridden by environment: {:?}", kind);
                }
                Err(e) => warn!("Ignoring BTMESH_STORAGE: {}", e),
            }
        }

        if let Ok(mtu) = std::env::var("BTMESH_PROXY_MTU") {
            if let Ok(mtu) = mtu.parse::<usize>() {
                self.proxy_mtu = mtu;
                info!("Proxy MTU overridden by environment: {}", mtu);
            }
        }

        if let Ok(every) = std::env::var("BTMESH_FSYNC_EVERY") {
            if let Ok(every) = every.parse::<u32>() {
                self.fsync_every = every.max(1);
            }
        }

        if let Ok(level) = std::env::var("BTMESH_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Ok(name) = std::env::var("BTMESH_NETWORK_NAME") {
            self.network_name = name;
        }
    }
}
