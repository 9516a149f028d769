//! Configuration for the replica process

use crate::common::{Error, Result};
use crate::replica::BackingFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "minivol.toml";

/// Environment variable prefix (`MINIVOL_SECTOR_SIZE`, `MINIVOL_BACKING__SIZE`, ...)
pub const ENV_PREFIX: &str = "MINIVOL";

/// Replica process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Replica directory (holds `volume.meta` and the disk chain)
    pub dir: PathBuf,

    /// Default sector size in bytes
    pub sector_size: u64,

    /// Server type tag handed to the engine (e.g. "tcp")
    pub server_type: String,

    /// Optional backing file overriding size/sector size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing: Option<BackingFile>,

    /// Logging level
    pub log_level: String,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./data/replica")
}
fn default_sector_size() -> u64 {
    4096
}
fn default_server_type() -> String {
    "tcp".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            sector_size: default_sector_size(),
            server_type: default_server_type(),
            backing: None,
            log_level: default_log_level(),
        }
    }
}

/// `MINIVOL_SECTOR_SIZE` sets `sector_size`, `MINIVOL_BACKING__SIZE` sets `backing.size`
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl ReplicaConfig {
    /// Load from an optional TOML file layered with `MINIVOL_*` env variables.
    ///
    /// Without an explicit path, `minivol.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    /// Same as [`ReplicaConfig::load`] with a caller-provided environment source.
    pub fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let cfg: ReplicaConfig = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "sector_size must be a non-zero power of two, got {}",
                self.sector_size
            )));
        }
        if self.server_type.trim().is_empty() {
            return Err(Error::InvalidConfig("server_type cannot be empty".into()));
        }
        if let Some(backing) = &self.backing {
            if backing.sector_size > 0 && !backing.sector_size.is_power_of_two() {
                return Err(Error::InvalidConfig(format!(
                    "backing sector_size must be a power of two, got {}",
                    backing.sector_size
                )));
            }
        }
        Ok(())
    }
}
