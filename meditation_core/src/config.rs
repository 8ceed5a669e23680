//! Configuration file support for meditate.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/meditate/config.toml`.

use crate::catalog::Product;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub timer: TimerConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// Key-value store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("defaults.json")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.jsonl")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }
}

/// Timer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,

    #[serde(default = "default_available_minutes")]
    pub available_minutes: Vec<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: default_duration_minutes(),
            available_minutes: default_available_minutes(),
        }
    }
}

/// Purchase store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_full_access_product_id")]
    pub full_access_product_id: String,

    #[serde(default = "default_products")]
    pub products: Vec<Product>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            full_access_product_id: default_full_access_product_id(),
            products: default_products(),
        }
    }
}

impl StoreConfig {
    pub fn product_ids(&self) -> Vec<String> {
        self.products.iter().map(|p| p.id.clone()).collect()
    }
}

// Default value functions
fn home_dir_or_cwd() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| home_dir_or_cwd().join(".local/share"));
    base.join("meditate")
}

fn default_duration_minutes() -> u32 {
    20
}

fn default_available_minutes() -> Vec<u32> {
    vec![1, 10, 15, 20]
}

fn default_full_access_product_id() -> String {
    "com.example.meditation.fullaccess".into()
}

fn default_products() -> Vec<Product> {
    vec![Product {
        id: default_full_access_product_id(),
        display_name: "Full Access".into(),
        display_price: "$9.99".into(),
    }]
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Check values that serde alone cannot
    pub fn validate(&self) -> Result<()> {
        if self.timer.available_minutes.is_empty() {
            return Err(Error::Config("timer.available_minutes must not be empty".into()));
        }
        if self.timer.available_minutes.contains(&0) {
            return Err(Error::Config("timer durations must be positive".into()));
        }
        if self.timer.default_duration_minutes == 0 {
            return Err(Error::Config("timer.default_duration_minutes must be positive".into()));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| home_dir_or_cwd().join(".config"));
        base.join("meditate").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
