pub mod driver_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::driver_config::DriverConfig;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "app_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `env_logger`-style filter, e.g. `info` or `ble_adapter_console_lib=debug`
    pub log_level: String,
    pub driver: DriverConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: "info".to_string(),
            driver: DriverConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config from `file_path`, falling back to defaults if it does not exist.
    pub async fn load_from(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config to `file_path`, creating its directory if needed.
    pub async fn save_to(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize app config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("App config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(feature = "desktop")]
impl AppConfig {
    /// Loads the config from the application config directory.
    pub async fn load_config(app_handle: &tauri::AppHandle) -> Result<Self> {
        use tauri::Manager;

        let config_dir = app_handle.path().app_config_dir()?;
        Self::load_from(&config_dir.join(CONFIG_FILE_NAME)).await
    }

    /// Saves the config to the application config directory.
    pub async fn save_config(&self, app_handle: &tauri::AppHandle) -> Result<()> {
        use tauri::Manager;

        let config_dir = app_handle.path().app_config_dir()?;
        self.save_to(&config_dir.join(CONFIG_FILE_NAME)).await
    }
}
