//! Configuration Manager
//!
//! Decides which configuration the hardware runs and keeps the store, the
//! current configuration and the rollback history consistent.
//!
//! # Fallback ladder
//!
//! [`ConfigManager::ensure_configured`] tries each source in turn until one
//! verifies and the backend accepts it:
//!
//! ```text
//! stored ─▶ current (if complete) ─▶ suggested ─▶ previous ─▶ linear ─▶ fallback ─▶ nothing
//! ```
//!
//! # Persistent requests
//!
//! A persistent `apply_monitors_config` arms a confirmation timer. The
//! caller must [`confirm`](ConfigManager::confirm) before it fires;
//! otherwise the previous configuration comes back.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::hardware::{assign, Capability, MonitorBackend};
use crate::multimon::error::{ConfigError, Result};
use crate::multimon::history::ConfigHistory;
use crate::multimon::layout::{LayoutCalculator, LayoutError};
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::{MonitorsConfig, MonitorsConfigKey, SwitchConfigType};
use crate::multimon::types::{LayoutMode, MonitorModeSpec, MonitorSpec};
use crate::multimon::verify::verify;
use crate::store::legacy;
use crate::store::ConfigStore;

/// Time a persistent configuration waits for confirmation
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// How `apply_monitors_config` treats a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMethod {
    /// Check only, hardware untouched
    Verify,
    /// Apply without saving
    Temporary,
    /// Apply, then save once confirmed
    Persistent,
}

/// Notification sent to subscribers
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A configuration is now live
    ConfigApplied {
        /// Serial after the change
        serial: u32,
        /// Applied configuration
        config: Arc<MonitorsConfig>,
    },
    /// Every monitor was turned off
    ConfigCleared {
        /// Serial after the change
        serial: u32,
    },
}

/// Manager tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Layout mode for generated configurations; `None` picks logical when supported
    pub default_layout_mode: Option<LayoutMode>,
    /// Time a persistent configuration waits for confirmation
    pub confirmation_timeout: Duration,
    /// Follow the accelerometer on the built-in panel
    pub manage_panel_orientation: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_layout_mode: None,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            manage_panel_orientation: true,
        }
    }
}

/// One connected monitor as reported by `get_current_state`
#[derive(Debug, Clone, Serialize)]
pub struct MonitorState {
    /// Identity
    pub spec: MonitorSpec,
    /// Every supported mode
    pub modes: Vec<MonitorModeSpec>,
    /// Preferred mode
    pub preferred_mode: Option<MonitorModeSpec>,
    /// Built-in panel
    pub is_builtin: bool,
}

/// Snapshot for a control surface
#[derive(Debug, Clone, Serialize)]
pub struct CurrentState {
    /// Serial to pass back with `apply_monitors_config`
    pub serial: u32,
    /// Connected monitors
    pub monitors: Vec<MonitorState>,
    /// Current logical monitors
    pub logical_monitors: Vec<LogicalMonitorConfig>,
    /// Layout mode of the current configuration
    pub layout_mode: LayoutMode,
    /// Switch policy in effect
    pub switch_config: SwitchConfigType,
}

/// Orchestrates generators, store, history and the backend
pub struct ConfigManager<B: MonitorBackend> {
    backend: B,
    store: ConfigStore,
    settings: ManagerSettings,
    layout_mode: LayoutMode,

    current: Option<Arc<MonitorsConfig>>,
    history: ConfigHistory,
    serial: u32,
    switch_config: SwitchConfigType,

    pending_confirmation: Option<Arc<MonitorsConfig>>,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    timeout_tx: mpsc::UnboundedSender<u64>,
    timeout_rx: mpsc::UnboundedReceiver<u64>,

    events: broadcast::Sender<MonitorEvent>,
}

impl<B: MonitorBackend> fmt::Debug for ConfigManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigManager")
            .field("store", &self.store)
            .field("layout_mode", &self.layout_mode)
            .field("current", &self.current.as_ref().map(|config| config.key().to_string()))
            .field("history", &self.history.len())
            .field("serial", &self.serial)
            .field("switch_config", &self.switch_config)
            .finish()
    }
}

impl<B: MonitorBackend> ConfigManager<B> {
    /// Create a manager; nothing is applied until
    /// [`ensure_configured`](Self::ensure_configured)
    pub fn new(backend: B, store: ConfigStore, settings: ManagerSettings) -> Self {
        let layout_mode = if backend.capabilities().contains(Capability::LayoutMode) {
            settings.default_layout_mode.unwrap_or(LayoutMode::Logical)
        } else {
            LayoutMode::Physical
        };
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!("Monitor configuration manager using {} layout mode", layout_mode);

        Self {
            backend,
            store,
            settings,
            layout_mode,
            current: None,
            history: ConfigHistory::new(),
            serial: 0,
            switch_config: SwitchConfigType::Unknown,
            pending_confirmation: None,
            timer: None,
            timer_generation: 0,
            timeout_tx,
            timeout_rx,
            events,
        }
    }

    /// Hardware backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Hardware backend, for hotplug and lid events
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Configuration store
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Configuration store, mutable
    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    /// Layout mode used for generated configurations
    pub fn default_layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }

    /// Live configuration, `None` when nothing is lit
    pub fn current(&self) -> Option<&Arc<MonitorsConfig>> {
        self.current.as_ref()
    }

    /// Rollback history
    pub fn history(&self) -> &ConfigHistory {
        &self.history
    }

    /// Current serial
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Switch policy in effect
    pub fn current_switch_config(&self) -> SwitchConfigType {
        self.switch_config
    }

    /// Whether a persistent configuration awaits confirmation
    pub fn is_confirmation_pending(&self) -> bool {
        self.pending_confirmation.is_some()
    }

    /// Receive [`MonitorEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Hardware changed (hotplug, lid, mode list)
    pub fn on_hardware_changed(&mut self) {
        self.serial = self.serial.wrapping_add(1);
        debug!("Hardware changed, serial now {}", self.serial);
    }

    /// Key describing the active monitors in `layout_mode`
    pub fn current_key(&self, layout_mode: LayoutMode) -> MonitorsConfigKey {
        let specs = self
            .backend
            .monitors()
            .iter()
            .filter(|monitor| self.backend.is_monitor_active(monitor))
            .map(|monitor| monitor.spec.clone())
            .collect();
        MonitorsConfigKey::new(specs, layout_mode)
    }

    /// Whether `config` covers exactly the live hardware and every mode resolves
    pub fn is_config_complete(&self, config: &MonitorsConfig) -> bool {
        if *config.key() != self.current_key(config.layout_mode) {
            return false;
        }

        config
            .logical_monitor_configs
            .iter()
            .flat_map(|lm| lm.monitor_configs.iter())
            .all(|monitor_config| {
                let Some(monitor) = self.backend.monitor_from_spec(&monitor_config.monitor_spec)
                else {
                    return false;
                };
                if monitor.mode_from_spec(&monitor_config.mode_spec).is_none() {
                    return false;
                }
                !monitor_config.enable_underscanning
                    || monitor
                        .main_output()
                        .and_then(|id| self.backend.output(id))
                        .is_some_and(|output| output.supports_underscanning)
            })
    }

    /// Stored configuration for the live hardware
    ///
    /// Migrated entries are finalized on the way out; one that cannot be
    /// finalized is evicted.
    pub fn get_stored(&mut self) -> Option<Arc<MonitorsConfig>> {
        let key = self.current_key(self.layout_mode);
        let config = self.store.lookup(&key).or_else(|| {
            let physical = self.current_key(LayoutMode::Physical);
            self.store
                .lookup(&physical)
                .filter(|config| config.is_migrated())
        })?;

        if !config.is_migrated() {
            return Some(config);
        }

        let old_key = config.key().clone();
        match legacy::finalize(&config, &self.backend, self.layout_mode) {
            Ok(finalized) => {
                info!("Finalized migrated configuration {}", finalized.key());
                let finalized = Arc::new(finalized);
                self.store.remove(&old_key);
                self.store.add(finalized.clone());
                Some(finalized)
            }
            Err(e) => {
                warn!("Failed to finalize migrated configuration {}: {}", old_key, e);
                self.store.remove(&old_key);
                None
            }
        }
    }

    /// Replace the current configuration, pushing the old one onto history
    pub fn set_current(&mut self, config: Option<Arc<MonitorsConfig>>) {
        if let Some(previous) = self.current.take() {
            self.history.push(previous);
        }
        self.current = config;
    }

    /// Bring the hardware into some valid configuration
    ///
    /// Returns the configuration applied, or `None` when every strategy
    /// failed and all monitors were turned off.
    pub fn ensure_configured(&mut self) -> Option<Arc<MonitorsConfig>> {
        if let Some(stored) = self.get_stored() {
            let config = self.oriented(stored);
            match self.apply_config(config.clone(), true) {
                Ok(()) => return Some(config),
                Err(e) => warn!("Failed to use stored monitor configuration: {}", e),
            }
        }

        if let Some(current) = self.current.clone() {
            if self.is_config_complete(&current) {
                let config = self.oriented(current);
                match self.apply_config(config.clone(), true) {
                    Ok(()) => return Some(config),
                    Err(e) => warn!("Failed to reuse current monitor configuration: {}", e),
                }
            }
        }

        if let Some(config) = self.try_generated("suggested", |calc| calc.create_suggested()) {
            return Some(config);
        }

        if let Some(previous) = self.history.previous().cloned() {
            if self.is_config_complete(&previous) {
                let config = self.oriented(previous.clone());
                match self.apply_config(config.clone(), true) {
                    Ok(()) => {
                        self.history.remove(&previous);
                        return Some(config);
                    }
                    Err(e) => warn!("Failed to use previous monitor configuration: {}", e),
                }
            } else {
                debug!("Previous monitor configuration does not match the connected monitors");
            }
        }

        if let Some(config) = self.try_generated("linear", |calc| calc.create_linear()) {
            return Some(config);
        }

        if let Some(config) = self.try_generated("fallback", |calc| calc.create_fallback()) {
            return Some(config);
        }

        warn!("No usable monitor configuration, turning all monitors off");
        if let Err(e) = self.clear_config() {
            warn!("Failed to turn monitors off: {}", e);
        }
        None
    }

    /// Apply the generator for `switch_config`
    pub fn switch_config(&mut self, switch_config: SwitchConfigType) -> Result<()> {
        if self.backend.monitors().len() <= 1 {
            return Err(ConfigError::RequestRejected(
                "Switching needs more than one monitor".to_string(),
            ));
        }
        if self.backend.is_lid_closed() {
            return Err(ConfigError::RequestRejected(
                "Switching is disabled while the lid is closed".to_string(),
            ));
        }

        let config = LayoutCalculator::new(&self.backend, self.layout_mode)
            .create_for_switch_config(switch_config)?;
        self.apply_config(Arc::new(config), true)?;
        self.switch_config = switch_config;

        info!("Switched monitor configuration to {}", switch_config);
        Ok(())
    }

    /// Control-surface request to apply `logical_monitors`
    pub fn apply_monitors_config(
        &mut self,
        serial: u32,
        logical_monitors: Vec<LogicalMonitorConfig>,
        layout_mode: LayoutMode,
        method: ConfigMethod,
    ) -> Result<()> {
        if serial != self.serial {
            return Err(ConfigError::RequestRejected(format!(
                "Stale serial {} (current {})",
                serial, self.serial
            )));
        }
        if !self.store.policy().enable_dbus {
            return Err(ConfigError::RequestRejected(
                "Monitor configuration via D-Bus is disabled".to_string(),
            ));
        }
        if layout_mode == LayoutMode::Logical
            && !self.backend.capabilities().contains(Capability::LayoutMode)
        {
            return Err(ConfigError::RequestRejected(
                "Logical layout mode not supported".to_string(),
            ));
        }
        if method == ConfigMethod::Persistent && Handle::try_current().is_err() {
            return Err(ConfigError::RequestRejected(
                "Persistent configuration needs a running event loop".to_string(),
            ));
        }

        let disabled: Vec<MonitorSpec> = self
            .backend
            .monitors()
            .iter()
            .filter(|monitor| self.backend.is_monitor_active(monitor))
            .filter(|monitor| !logical_monitors.iter().any(|lm| lm.has_monitor(&monitor.spec)))
            .map(|monitor| monitor.spec.clone())
            .collect();

        let config = MonitorsConfig::new(logical_monitors, disabled, layout_mode, Default::default());
        verify(&config, self.backend.capabilities())?;
        self.check_resolves(&config)?;

        if method == ConfigMethod::Verify {
            assign(&self.backend, &config)?;
            debug!("Verified requested configuration {}", config.key());
            return Ok(());
        }

        let config = Arc::new(config);
        self.apply_config(config.clone(), true)?;

        if method == ConfigMethod::Persistent {
            self.pending_confirmation = Some(config);
            self.arm_confirmation_timer();
        }
        Ok(())
    }

    /// Keep (`true`) or roll back (`false`) the pending persistent configuration
    pub fn confirm(&mut self, ok: bool) {
        self.cancel_confirmation_timer();
        let Some(config) = self.pending_confirmation.take() else {
            debug!("Nothing to confirm");
            return;
        };

        if ok {
            info!("Monitor configuration {} confirmed", config.key());
            self.store.add(config);
        } else {
            info!("Monitor configuration {} rejected", config.key());
            self.restore_previous();
        }
    }

    /// Handle expired confirmation timers without waiting
    ///
    /// Returns whether a configuration was rolled back.
    pub fn poll_timeouts(&mut self) -> bool {
        let mut reverted = false;
        while let Ok(generation) = self.timeout_rx.try_recv() {
            reverted |= self.handle_timeout(generation);
        }
        reverted
    }

    /// Wait for the armed confirmation timer and handle it
    ///
    /// Returns immediately with `false` when no confirmation is pending.
    pub async fn process_timeouts(&mut self) -> bool {
        while self.pending_confirmation.is_some() {
            match self.timeout_rx.recv().await {
                Some(generation) => {
                    if self.handle_timeout(generation) {
                        return true;
                    }
                }
                None => break,
            }
        }
        false
    }

    /// Follow the accelerometer on the built-in panel
    pub fn handle_orientation_changed(&mut self) -> Result<()> {
        if !self.settings.manage_panel_orientation {
            return Ok(());
        }
        let Some(orientation) = self.backend.panel_orientation() else {
            return Ok(());
        };
        let Some(current) = self.current.clone() else {
            return Ok(());
        };

        match LayoutCalculator::new(&self.backend, self.layout_mode)
            .create_for_orientation(&current, orientation)
        {
            Ok(config) => self.apply_config(Arc::new(config), true),
            Err(LayoutError::Unchanged(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rotate the built-in panel a quarter turn
    pub fn rotate_builtin(&mut self) -> Result<()> {
        let current = self
            .current
            .clone()
            .ok_or_else(|| ConfigError::NoConfiguration("No current configuration".to_string()))?;

        let config = LayoutCalculator::new(&self.backend, self.layout_mode)
            .create_for_builtin_rotation(&current)?;
        self.apply_config(Arc::new(config), true)
    }

    /// Snapshot for a control surface
    pub fn get_current_state(&self) -> CurrentState {
        let monitors = self
            .backend
            .monitors()
            .iter()
            .map(|monitor| MonitorState {
                spec: monitor.spec.clone(),
                modes: monitor.modes().iter().map(|mode| mode.spec).collect(),
                preferred_mode: monitor.preferred_mode().map(|mode| mode.spec),
                is_builtin: monitor.is_laptop_panel,
            })
            .collect();

        CurrentState {
            serial: self.serial,
            monitors,
            logical_monitors: self
                .current
                .as_ref()
                .map(|config| config.logical_monitor_configs.clone())
                .unwrap_or_default(),
            layout_mode: self
                .current
                .as_ref()
                .map_or(self.layout_mode, |config| config.layout_mode),
            switch_config: self.switch_config,
        }
    }

    /// Verify, assign and program `config`
    fn apply_config(&mut self, config: Arc<MonitorsConfig>, push_history: bool) -> Result<()> {
        verify(&config, self.backend.capabilities())?;
        let plan = assign(&self.backend, &config)?;
        self.backend.apply(&plan.crtcs, &plan.outputs)?;

        if push_history {
            self.set_current(Some(config.clone()));
        } else {
            self.current = Some(config.clone());
        }
        self.switch_config = config.switch_config;
        self.serial = self.serial.wrapping_add(1);

        info!(
            "Applied monitor configuration {} ({} logical monitor(s))",
            config.key(),
            config.logical_monitor_configs.len()
        );
        let _ = self.events.send(MonitorEvent::ConfigApplied {
            serial: self.serial,
            config,
        });
        Ok(())
    }

    fn clear_config(&mut self) -> Result<()> {
        self.backend.apply(&[], &[])?;
        self.set_current(None);
        self.serial = self.serial.wrapping_add(1);
        let _ = self.events.send(MonitorEvent::ConfigCleared { serial: self.serial });
        Ok(())
    }

    fn try_generated<F>(&mut self, name: &str, generate: F) -> Option<Arc<MonitorsConfig>>
    where
        F: FnOnce(&LayoutCalculator<'_, B>) -> std::result::Result<MonitorsConfig, LayoutError>,
    {
        let generated = generate(&LayoutCalculator::new(&self.backend, self.layout_mode));
        let config = match generated {
            Ok(config) => Arc::new(config),
            Err(e) => {
                debug!("No {} monitor configuration: {}", name, e);
                return None;
            }
        };

        match self.apply_config(config.clone(), true) {
            Ok(()) => Some(config),
            Err(e) if e.is_recoverable() => {
                warn!("Failed to use {} monitor configuration: {}", name, e);
                None
            }
            Err(e) => {
                error!("Failed to use {} monitor configuration: {}", name, e);
                None
            }
        }
    }

    /// `config` adjusted to the panel orientation, when managed
    fn oriented(&self, config: Arc<MonitorsConfig>) -> Arc<MonitorsConfig> {
        if !self.settings.manage_panel_orientation {
            return config;
        }
        let Some(orientation) = self.backend.panel_orientation() else {
            return config;
        };

        match LayoutCalculator::new(&self.backend, self.layout_mode)
            .create_for_orientation(&config, orientation)
        {
            Ok(oriented) => Arc::new(oriented),
            Err(e) => {
                debug!("Keeping configuration orientation: {}", e);
                config
            }
        }
    }

    /// Every monitor and mode in `config` exists on the live hardware
    fn check_resolves(&self, config: &MonitorsConfig) -> Result<()> {
        for monitor_config in config
            .logical_monitor_configs
            .iter()
            .flat_map(|lm| lm.monitor_configs.iter())
        {
            let spec = &monitor_config.monitor_spec;
            let monitor = self.backend.monitor_from_spec(spec).ok_or_else(|| {
                ConfigError::ResourceExhausted(format!("Monitor '{}' not found", spec.connector))
            })?;
            if monitor.mode_from_spec(&monitor_config.mode_spec).is_none() {
                return Err(ConfigError::ResourceExhausted(format!(
                    "Monitor '{}' has no mode {}",
                    spec.connector, monitor_config.mode_spec
                )));
            }
        }
        Ok(())
    }

    fn restore_previous(&mut self) {
        self.pending_confirmation = None;

        if let Some(previous) = self.history.pop_previous() {
            match self.apply_config(previous, false) {
                Ok(()) => return,
                Err(e) => warn!("Failed to restore previous monitor configuration: {}", e),
            }
        }
        self.ensure_configured();
    }

    fn handle_timeout(&mut self, generation: u64) -> bool {
        if generation != self.timer_generation || self.pending_confirmation.is_none() {
            debug!("Ignoring stale confirmation timeout");
            return false;
        }

        info!("Monitor configuration not confirmed in time, reverting");
        self.timer = None;
        self.restore_previous();
        true
    }

    fn arm_confirmation_timer(&mut self) {
        self.cancel_confirmation_timer();
        self.timer_generation += 1;

        let generation = self.timer_generation;
        let timeout = self.settings.confirmation_timeout;
        let tx = self.timeout_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(generation);
        }));
        debug!("Confirmation timer armed for {:?}", timeout);
    }

    fn cancel_confirmation_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl<B: MonitorBackend> Drop for ConfigManager<B> {
    fn drop(&mut self) {
        self.cancel_confirmation_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::virtual_backend::MonitorDescription;
    use crate::hardware::VirtualBackend;
    use crate::multimon::geometry::Rectangle;
    use crate::multimon::types::{MonitorConfig, Transform};
    use crate::store::StorePaths;
    use enumflags2::BitFlags;

    fn manager(backend: VirtualBackend) -> ConfigManager<VirtualBackend> {
        let store = ConfigStore::new(StorePaths::default(), backend.capabilities());
        let settings = ManagerSettings {
            default_layout_mode: Some(LayoutMode::Physical),
            ..Default::default()
        };
        ConfigManager::new(backend, store, settings)
    }

    fn two_monitors() -> VirtualBackend {
        VirtualBackend::builder()
            .crtcs(2)
            .laptop_panel("eDP-1", &[(1920, 1080)])
            .monitor("DP-1", &[(2560, 1440)])
            .build()
    }

    fn logical(connector: &str, x: i32, width: i32, height: i32, primary: bool) -> LogicalMonitorConfig {
        let mut lm = LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(
                MonitorSpec::new(connector, "MetaProduct's Inc.", "MetaMonitor", "0x123456"),
                MonitorModeSpec::new(width, height, 60.0),
            ),
            x,
            0,
            Transform::Normal,
            1.0,
            LayoutMode::Physical,
        );
        lm.is_primary = primary;
        lm
    }

    #[test]
    fn test_layout_mode_follows_capability() {
        let backend = VirtualBackend::builder()
            .crtcs(1)
            .monitor("DP-1", &[(1920, 1080)])
            .capabilities(BitFlags::empty())
            .build();
        let store = ConfigStore::new(StorePaths::default(), BitFlags::empty());
        let manager = ConfigManager::new(backend, store, ManagerSettings::default());
        assert_eq!(manager.default_layout_mode(), LayoutMode::Physical);
    }

    #[test]
    fn test_ensure_configured_falls_back_to_linear() {
        let mut manager = manager(two_monitors());
        let config = manager.ensure_configured().unwrap();

        assert_eq!(config.logical_monitor_configs.len(), 2);
        assert_eq!(manager.backend().apply_count(), 1);
        assert_eq!(manager.serial(), 1);
        assert!(manager.is_config_complete(&config));
    }

    #[test]
    fn test_ensure_configured_clears_when_everything_fails() {
        let mut backend = two_monitors();
        backend.set_reject_applies(true);
        let mut manager = manager(backend);

        assert!(manager.ensure_configured().is_none());
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_ensure_configured_skips_incomplete_previous() {
        let backend = VirtualBackend::builder()
            .crtcs(3)
            .laptop_panel("eDP-1", &[(1920, 1080)])
            .build();
        let mut manager = manager(backend);
        manager.ensure_configured().unwrap();

        manager
            .backend_mut()
            .connect(&MonitorDescription::new("DP-1", &[(2560, 1440)]));
        manager.on_hardware_changed();
        let config = manager.ensure_configured().unwrap();
        assert_eq!(config.logical_monitor_configs.len(), 2);
        let panel_only = manager.history().previous().cloned().unwrap();

        // The panel-only entry no longer covers the connected monitors
        manager
            .backend_mut()
            .connect(&MonitorDescription::new("DP-2", &[(1920, 1200)]));
        manager.on_hardware_changed();
        let config = manager.ensure_configured().unwrap();

        assert_eq!(config.logical_monitor_configs.len(), 3);
        assert!(config.disabled_monitor_specs.is_empty());
        assert!(manager.is_config_complete(&config));
        assert!(!Arc::ptr_eq(&config, &panel_only));
        assert_eq!(manager.history().len(), 2);
    }

    #[test]
    fn test_ensure_configured_uses_complete_previous() {
        let mut manager = manager(two_monitors());
        let both = manager.ensure_configured().unwrap();

        manager.backend_mut().disconnect("DP-1");
        manager.on_hardware_changed();
        let panel_only = manager.ensure_configured().unwrap();
        assert_eq!(panel_only.logical_monitor_configs.len(), 1);

        manager
            .backend_mut()
            .connect(&MonitorDescription::new("DP-1", &[(2560, 1440)]));
        manager.on_hardware_changed();
        let config = manager.ensure_configured().unwrap();

        assert!(Arc::ptr_eq(&config, &both));
        assert_eq!(manager.history().len(), 1);
        assert!(Arc::ptr_eq(manager.history().previous().unwrap(), &panel_only));
    }

    #[test]
    fn test_set_current_pushes_history() {
        let mut manager = manager(two_monitors());
        let first = manager.ensure_configured().unwrap();
        manager.set_current(Some(first.clone()));

        assert_eq!(manager.history().len(), 1);
        assert!(Arc::ptr_eq(manager.history().previous().unwrap(), &first));
    }

    #[test]
    fn test_switch_config_rules() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();

        manager.switch_config(SwitchConfigType::External).unwrap();
        assert_eq!(manager.current_switch_config(), SwitchConfigType::External);
        assert_eq!(manager.current().unwrap().logical_monitor_configs.len(), 1);

        // Failed switch keeps the previous classification
        assert!(manager.switch_config(SwitchConfigType::AllMirror).is_err());
        assert_eq!(manager.current_switch_config(), SwitchConfigType::External);

        manager.backend_mut().set_lid_closed(true);
        assert!(matches!(
            manager.switch_config(SwitchConfigType::Builtin),
            Err(ConfigError::RequestRejected(_))
        ));
    }

    #[test]
    fn test_apply_rejects_stale_serial() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();
        let serial = manager.serial();
        manager.on_hardware_changed();

        let result = manager.apply_monitors_config(
            serial,
            vec![logical("DP-1", 0, 2560, 1440, true)],
            LayoutMode::Physical,
            ConfigMethod::Temporary,
        );
        assert!(matches!(result, Err(ConfigError::RequestRejected(_))));
    }

    #[test]
    fn test_apply_verify_leaves_hardware_alone() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();
        let applies = manager.backend().apply_count();

        manager
            .apply_monitors_config(
                manager.serial(),
                vec![logical("DP-1", 0, 2560, 1440, true)],
                LayoutMode::Physical,
                ConfigMethod::Verify,
            )
            .unwrap();
        assert_eq!(manager.backend().apply_count(), applies);
    }

    #[test]
    fn test_apply_temporary_disables_left_out_monitors() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();

        manager
            .apply_monitors_config(
                manager.serial(),
                vec![logical("DP-1", 0, 2560, 1440, true)],
                LayoutMode::Physical,
                ConfigMethod::Temporary,
            )
            .unwrap();

        let current = manager.current().unwrap();
        assert_eq!(current.disabled_monitor_specs[0].connector, "eDP-1");
        assert!(manager.store().is_empty());
    }

    #[test]
    fn test_apply_rejects_unknown_mode_and_invalid_layout() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();

        let unknown_mode = manager.apply_monitors_config(
            manager.serial(),
            vec![logical("DP-1", 0, 1024, 768, true)],
            LayoutMode::Physical,
            ConfigMethod::Temporary,
        );
        assert!(matches!(unknown_mode, Err(ConfigError::ResourceExhausted(_))));

        let gap = manager.apply_monitors_config(
            manager.serial(),
            vec![
                logical("eDP-1", 0, 1920, 1080, true),
                logical("DP-1", 2000, 2560, 1440, false),
            ],
            LayoutMode::Physical,
            ConfigMethod::Temporary,
        );
        assert!(matches!(gap, Err(ConfigError::VerificationFailed(_))));
    }

    #[test]
    fn test_persistent_needs_runtime() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();

        let result = manager.apply_monitors_config(
            manager.serial(),
            vec![logical("DP-1", 0, 2560, 1440, true)],
            LayoutMode::Physical,
            ConfigMethod::Persistent,
        );
        assert!(matches!(result, Err(ConfigError::RequestRejected(_))));
    }

    #[test]
    fn test_rotate_builtin() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();
        manager.rotate_builtin().unwrap();

        let panel = &manager.current().unwrap().logical_monitor_configs[0];
        assert_eq!(panel.transform, Transform::Rotate90);
        assert_eq!(panel.layout, Rectangle::new(0, 0, 1080, 1920));
    }

    #[test]
    fn test_current_state() {
        let mut manager = manager(two_monitors());
        manager.ensure_configured();
        let state = manager.get_current_state();

        assert_eq!(state.serial, manager.serial());
        assert_eq!(state.monitors.len(), 2);
        assert!(state.monitors[0].is_builtin);
        assert_eq!(state.logical_monitors.len(), 2);
        assert_eq!(state.layout_mode, LayoutMode::Physical);
    }
}
