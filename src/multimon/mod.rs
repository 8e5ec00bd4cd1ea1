//! Monitor Configuration Module
//!
//! Describes, validates, generates and applies monitor arrangements.
//!
//! # Overview
//!
//! A [`MonitorsConfig`] is a set of logical monitors, each a rectangle of
//! the desktop driven by one monitor or a clone group. Configurations are
//! identified by the set of monitors they mention ([`MonitorsConfigKey`]),
//! so the same arrangement comes back whenever the same monitors are
//! plugged in.
//!
//! # Layout Modes
//!
//! ```text
//! physical                      logical (scale 2 on the left)
//! ┌──────────────┬───────┐     ┌───────┬───────┐
//! │ 3840x2160    │1920x  │     │1920x  │1920x  │
//! │ scale 2      │1080   │     │1080   │1080   │
//! │              ├───────┘     └───────┴───────┘
//! └──────────────┘
//! ```
//!
//! In physical mode rectangles are in device pixels. In logical mode they
//! are divided by the logical monitor's scale, so mixed-DPI monitors line
//! up edge to edge.
//!
//! # Invariants
//!
//! Every applied configuration passes [`verify`]: no overlaps, exactly one
//! primary, one connected region starting at (0, 0), sizes matching modes
//! under transform and scale, and no monitor both enabled and disabled.
//!
//! # Example
//!
//! ```no_run
//! use lamco_display_config::hardware::VirtualBackend;
//! use lamco_display_config::multimon::{ConfigManager, ManagerSettings};
//! use lamco_display_config::store::{ConfigStore, StorePaths};
//! use lamco_display_config::hardware::MonitorBackend;
//!
//! let backend = VirtualBackend::builder()
//!     .crtcs(2)
//!     .laptop_panel("eDP-1", &[(1920, 1080)])
//!     .monitor("DP-1", &[(2560, 1440)])
//!     .build();
//! let mut store = ConfigStore::new(StorePaths::from_env(), backend.capabilities());
//! store.load();
//!
//! let mut manager = ConfigManager::new(backend, store, ManagerSettings::default());
//! if let Some(config) = manager.ensure_configured() {
//!     println!("{} logical monitors", config.logical_monitor_configs.len());
//! }
//! ```

pub mod error;
pub mod geometry;
pub mod history;
pub mod layout;
pub mod logical;
pub mod manager;
pub mod monitors_config;
pub mod types;
pub mod verify;

pub use error::{ConfigError, Result, VerificationError};
pub use geometry::Rectangle;
pub use history::{ConfigHistory, MAX_HISTORY};
pub use layout::{LayoutCalculator, LayoutError};
pub use logical::LogicalMonitorConfig;
pub use manager::{
    ConfigManager, ConfigMethod, CurrentState, ManagerSettings, MonitorEvent, MonitorState,
    DEFAULT_CONFIRMATION_TIMEOUT,
};
pub use monitors_config::{ConfigFlag, MonitorsConfig, MonitorsConfigKey, SwitchConfigType};
pub use types::{LayoutMode, ModeFlag, MonitorConfig, MonitorModeSpec, MonitorSpec, Transform};
pub use verify::verify;
