//! Configuration file support for usec.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (USEC_*)
//! 3. Local config file (./usec.toml)
//! 4. Global config file (~/.config/usec/config.toml)
//!
//! ```toml
//! [device]
//! path = "/dev/sg2"
//! timeout_ms = 50000
//! fast_write = true
//! block_len = 32
//!
//! [update]
//! mode = "gc16"
//! wait_ready = true
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use usec::{DeviceConfig, UpdateMode};

/// Name of the config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "usec.toml";

/// Device section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSection {
    /// SCSI generic node of the controller (e.g., "/dev/sg2").
    pub path: Option<String>,
    /// Command timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Skip acknowledgements between contiguous block writes.
    pub fast_write: Option<bool>,
    /// Upload block side length in pixels.
    pub block_len: Option<u32>,
}

/// Update section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSection {
    /// Default waveform mode name.
    pub mode: Option<String>,
    /// Wait for refreshes to finish by default.
    pub wait_ready: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device settings.
    #[serde(default)]
    pub device: DeviceSection,
    /// Refresh defaults.
    #[serde(default)]
    pub update: UpdateSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "usec").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.device.path.is_some() {
            self.device.path = other.device.path;
        }
        if other.device.timeout_ms.is_some() {
            self.device.timeout_ms = other.device.timeout_ms;
        }
        if other.device.fast_write.is_some() {
            self.device.fast_write = other.device.fast_write;
        }
        if other.device.block_len.is_some() {
            self.device.block_len = other.device.block_len;
        }

        if other.update.mode.is_some() {
            self.update.mode = other.update.mode;
        }
        if other.update.wait_ready.is_some() {
            self.update.wait_ready = other.update.wait_ready;
        }
    }

    /// Library configuration from the file settings, with CLI overrides.
    pub fn device_config(&self, timeout_ms: Option<u64>, no_fast_write: bool) -> DeviceConfig {
        let mut config = DeviceConfig::new();
        if let Some(ms) = timeout_ms.or(self.device.timeout_ms) {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if no_fast_write {
            config = config.with_fast_write(false);
        } else if let Some(fast_write) = self.device.fast_write {
            config = config.with_fast_write(fast_write);
        }
        if let Some(block_len) = self.device.block_len {
            config = config.with_block_len(block_len);
        }
        config
    }

    /// Default waveform mode, if the config names a valid one.
    pub fn update_mode(&self) -> Option<UpdateMode> {
        let name = self.update.mode.as_deref()?;
        let mode = UpdateMode::from_name(name);
        if mode.is_none() {
            warn!("Ignoring unknown update mode '{name}' in config");
        }
        mode
    }

    /// Whether refreshes wait for completion unless told otherwise.
    pub fn wait_ready(&self) -> bool {
        self.update.wait_ready.unwrap_or(true)
    }
}
