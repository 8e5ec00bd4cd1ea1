//! Configuration management
//!
//! Engine settings are loaded from a TOML file and may be overridden by
//! CLI arguments and environment variables:
//!
//! ```toml
//! [store]
//! user_file = "/home/me/.config/monitors.xml"
//! system_dirs = ["/etc/xdg"]
//!
//! [manager]
//! layout_mode = "auto"
//! confirmation_timeout_secs = 20
//! manage_panel_orientation = true
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod types;

pub use types::{LoggingConfig, ManagerConfig, StoreConfig};

use crate::multimon::{LayoutMode, ManagerSettings};
use crate::store::StorePaths;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store locations
    #[serde(default)]
    pub store: StoreConfig,
    /// Manager behaviour
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: EngineConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Default configuration, environment paths filled in at use
    pub fn default_config() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.manager.layout_mode.as_str() {
            "auto" | "logical" | "physical" => {}
            _ => anyhow::bail!("Invalid layout mode: {}", self.manager.layout_mode),
        }

        if self.manager.confirmation_timeout_secs == 0 {
            anyhow::bail!("confirmation_timeout_secs must be greater than zero");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        if let Some(dirs) = &self.store.system_dirs {
            if let Some(relative) = dirs.iter().find(|dir| dir.is_relative()) {
                anyhow::bail!("System config directory must be absolute: {:?}", relative);
            }
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, user_file: Option<PathBuf>, layout_mode: Option<LayoutMode>) -> Self {
        if let Some(user_file) = user_file {
            self.store.user_file = Some(user_file);
        }
        if let Some(layout_mode) = layout_mode {
            self.manager.layout_mode = layout_mode.to_string();
        }
        self
    }

    /// Store paths, environment defaults filled in
    pub fn store_paths(&self) -> StorePaths {
        let mut paths = StorePaths::from_env();
        if let Some(user_file) = &self.store.user_file {
            paths.user_file = Some(user_file.clone());
        }
        if let Some(system_dirs) = &self.store.system_dirs {
            paths.system_dirs = system_dirs.clone();
        }
        paths
    }

    /// Manager settings
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            default_layout_mode: self.manager.layout_mode.parse::<LayoutMode>().ok(),
            confirmation_timeout: Duration::from_secs(self.manager.confirmation_timeout_secs),
            manage_panel_orientation: self.manager.manage_panel_orientation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default_config().unwrap();

        let settings = config.manager_settings();
        assert_eq!(settings.default_layout_mode, None);
        assert_eq!(settings.confirmation_timeout, Duration::from_secs(20));
        assert!(settings.manage_panel_orientation);
    }

    #[test]
    fn test_parse_partial_file() {
        let config: EngineConfig = toml::from_str(
            r#"
            [manager]
            layout_mode = "physical"
            confirmation_timeout_secs = 5
            manage_panel_orientation = false

            [store]
            system_dirs = ["/opt/xdg"]
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.manager_settings().default_layout_mode,
            Some(LayoutMode::Physical)
        );
        assert_eq!(config.store_paths().system_dirs, vec![PathBuf::from("/opt/xdg")]);
    }

    #[test]
    fn test_config_validation_invalid_layout_mode() {
        let mut config = EngineConfig::default();
        config.manager.layout_mode = "diagonal".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = EngineConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_relative_system_dir() {
        let mut config = EngineConfig::default();
        config.store.system_dirs = Some(vec![PathBuf::from("etc/xdg")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_overrides(Some(PathBuf::from("/tmp/monitors.xml")), Some(LayoutMode::Logical));
        assert_eq!(config.manager.layout_mode, "logical");
        assert_eq!(
            config.store_paths().user_file,
            Some(PathBuf::from("/tmp/monitors.xml"))
        );
    }
}
