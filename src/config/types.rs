//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where monitor configurations are read from and written to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// User monitors.xml (None = `$XDG_CONFIG_HOME/monitors.xml`)
    #[serde(default)]
    pub user_file: Option<PathBuf>,

    /// System config directories (None = `$XDG_CONFIG_DIRS`)
    #[serde(default)]
    pub system_dirs: Option<Vec<PathBuf>>,
}

/// Configuration manager behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Layout mode of generated configurations ("auto", "logical", "physical")
    pub layout_mode: String,

    /// Seconds a persistent configuration waits for confirmation
    pub confirmation_timeout_secs: u64,

    /// Rotate the built-in panel with the accelerometer
    pub manage_panel_orientation: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            layout_mode: "auto".to_string(),
            confirmation_timeout_secs: 20,
            manage_panel_orientation: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Directory for log files (None = console only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Output format ("pretty", "compact", "json")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            format: "pretty".to_string(),
        }
    }
}
