//! Host-side configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use packmix_core::{EngineConfig, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_FILE: &str = "packmix.json";

/// Everything the host glue needs to build and drive an engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineConfig,
    /// How often the scheduler ticks the engine, in microseconds.
    pub tick_period_us: u64,
    /// Relative pack file names are resolved against this directory.
    pub resource_root: Option<PathBuf>,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            tick_period_us: 1_000,
            resource_root: None,
            log_filter: "packmix_host=info,packmix_audio=info".to_string(),
        }
    }
}

impl HostConfig {
    /// Platform config location, e.g. `~/.config/packmix/packmix.json` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "packmix", "packmix").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded host config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when no file exists.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No host config found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_period_us == 0 {
            return Err(Error::Config("tick_period_us must be positive".to_string()));
        }
        self.engine.validate()
    }

    pub const fn tick_period(&self) -> Duration {
        Duration::from_micros(self.tick_period_us)
    }

    /// Resolve a pack file name against `resource_root`.
    pub fn resolve(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        match &self.resource_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
