//! Monitors Configuration Aggregate
//!
//! A complete arrangement: every logical monitor, the monitors explicitly
//! turned off, the layout mode and a content-derived lookup key.

use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::types::{LayoutMode, MonitorSpec};

/// Origin flags of a monitors configuration
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigFlag {
    /// Loaded from a system-wide file; never written to the user file
    SystemConfig,
    /// Converted from the legacy format; scales still unresolved
    Migrated,
}

/// Coarse arrangement policy selectable by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchConfigType {
    /// Every monitor shows the same content
    AllMirror,
    /// Every monitor side by side
    AllLinear,
    /// External monitors only
    External,
    /// Built-in panel only
    Builtin,
    /// Not produced by a switch
    #[default]
    Unknown,
}

impl fmt::Display for SwitchConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwitchConfigType::AllMirror => "all-mirror",
            SwitchConfigType::AllLinear => "all-linear",
            SwitchConfigType::External => "external",
            SwitchConfigType::Builtin => "builtin",
            SwitchConfigType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Content-based identity of a configuration
///
/// Two configurations share a key when they reference the same set of
/// monitors (enabled or disabled) in the same layout mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorsConfigKey {
    monitor_specs: Vec<MonitorSpec>,
    layout_mode: LayoutMode,
}

impl MonitorsConfigKey {
    /// Build a key from any set of specs; the specs are sorted
    pub fn new(mut monitor_specs: Vec<MonitorSpec>, layout_mode: LayoutMode) -> Self {
        monitor_specs.sort();
        Self {
            monitor_specs,
            layout_mode,
        }
    }

    /// Build the key of a configuration's contents
    pub fn for_config(
        logical_monitor_configs: &[LogicalMonitorConfig],
        disabled_monitor_specs: &[MonitorSpec],
        layout_mode: LayoutMode,
    ) -> Self {
        let specs = logical_monitor_configs
            .iter()
            .flat_map(|lm| lm.monitor_configs.iter().map(|mc| mc.monitor_spec.clone()))
            .chain(disabled_monitor_specs.iter().cloned())
            .collect();

        Self::new(specs, layout_mode)
    }

    /// Sorted monitor specs
    pub fn monitor_specs(&self) -> &[MonitorSpec] {
        &self.monitor_specs
    }

    /// Layout mode part of the key
    pub fn layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }
}

impl fmt::Display for MonitorsConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connectors: Vec<&str> = self
            .monitor_specs
            .iter()
            .map(|spec| spec.connector.as_str())
            .collect();
        write!(f, "[{}] ({})", connectors.join(", "), self.layout_mode)
    }
}

/// One full monitor arrangement
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorsConfig {
    key: MonitorsConfigKey,
    /// Logical monitors, in order
    pub logical_monitor_configs: Vec<LogicalMonitorConfig>,
    /// Monitors explicitly turned off
    pub disabled_monitor_specs: Vec<MonitorSpec>,
    /// Units of the logical monitor rectangles
    pub layout_mode: LayoutMode,
    /// Origin flags
    pub flags: BitFlags<ConfigFlag>,
    /// Which switch policy produced this configuration
    pub switch_config: SwitchConfigType,
    /// Configuration this one was derived from (orientation changes)
    pub parent: Option<Arc<MonitorsConfig>>,
}

impl MonitorsConfig {
    /// Create a configuration and derive its key
    pub fn new(
        logical_monitor_configs: Vec<LogicalMonitorConfig>,
        disabled_monitor_specs: Vec<MonitorSpec>,
        layout_mode: LayoutMode,
        flags: BitFlags<ConfigFlag>,
    ) -> Self {
        let key = MonitorsConfigKey::for_config(
            &logical_monitor_configs,
            &disabled_monitor_specs,
            layout_mode,
        );

        Self {
            key,
            logical_monitor_configs,
            disabled_monitor_specs,
            layout_mode,
            flags,
            switch_config: SwitchConfigType::Unknown,
            parent: None,
        }
    }

    /// Same configuration tagged with a switch type
    pub fn with_switch_config(mut self, switch_config: SwitchConfigType) -> Self {
        self.switch_config = switch_config;
        self
    }

    /// Same configuration with a parent back-reference
    pub fn with_parent(mut self, parent: Arc<MonitorsConfig>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Lookup key
    pub fn key(&self) -> &MonitorsConfigKey {
        &self.key
    }

    /// Recompute the key after the contents or layout mode changed
    pub fn refresh_key(&mut self) {
        self.key = MonitorsConfigKey::for_config(
            &self.logical_monitor_configs,
            &self.disabled_monitor_specs,
            self.layout_mode,
        );
    }

    /// Whether this came from a system-wide file
    pub fn is_system_config(&self) -> bool {
        self.flags.contains(ConfigFlag::SystemConfig)
    }

    /// Whether this still needs migration finalization
    pub fn is_migrated(&self) -> bool {
        self.flags.contains(ConfigFlag::Migrated)
    }

    /// Primary logical monitor
    pub fn primary_logical_monitor(&self) -> Option<&LogicalMonitorConfig> {
        self.logical_monitor_configs.iter().find(|lm| lm.is_primary)
    }

    /// Logical monitor containing `spec`
    pub fn logical_monitor_for(&self, spec: &MonitorSpec) -> Option<&LogicalMonitorConfig> {
        self.logical_monitor_configs
            .iter()
            .find(|lm| lm.has_monitor(spec))
    }

    /// Whether `spec` is driven by some logical monitor
    pub fn has_enabled_monitor(&self, spec: &MonitorSpec) -> bool {
        self.logical_monitor_for(spec).is_some()
    }
}
