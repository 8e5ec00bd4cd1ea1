//! Layout Calculation Engine
//!
//! Builds candidate monitors configurations from live hardware under named
//! policies. Every generator is pure: it reads the backend and returns a
//! fresh [`MonitorsConfig`] or the reason it does not apply.
//!
//! # Policies
//!
//! - **Linear**: primary at the origin, everything else to its right
//! - **Fallback**: primary alone
//! - **Suggested**: hardware-suggested positions, rejected on overlap
//! - **Switch configs**: mirror, external-only, builtin-only, all-linear
//! - **Orientation/rotation**: derived from an existing configuration

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::hardware::{Capability, Monitor, MonitorBackend};
use crate::multimon::geometry::{self, Rectangle};
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::{MonitorsConfig, SwitchConfigType};
use crate::multimon::types::{LayoutMode, MonitorConfig, MonitorSpec, Transform};

/// Reasons a generator produced no configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    /// No usable monitor connected
    #[error("No monitors connected")]
    NoMonitors,

    /// Monitor reports no preferred mode
    #[error("Monitor '{0}' has no preferred mode")]
    NoPreferredMode(String),

    /// Suggested position missing
    #[error("Monitor '{0}' has no suggested position")]
    MissingSuggestedPosition(String),

    /// Suggested positions overlap
    #[error("Suggested monitor positions overlap")]
    SuggestedOverlap,

    /// Monitors share no resolution
    #[error("No mode common to all monitors")]
    NoCommonMode,

    /// Hardware cannot mirror
    #[error("Mirroring not supported by the backend")]
    MirroringUnsupported,

    /// External-only requested without externals
    #[error("No external monitor connected")]
    NoExternalMonitor,

    /// Builtin-only or orientation requested without a panel
    #[error("No laptop panel connected")]
    NoLaptopPanel,

    /// Panel not part of the base configuration
    #[error("Laptop panel not enabled in the configuration")]
    PanelNotConfigured,

    /// Panel shares its logical monitor with clones
    #[error("Laptop panel is cloned with other monitors")]
    PanelCloned,

    /// Requested transform already active
    #[error("Panel transform already {0}")]
    Unchanged(Transform),

    /// Switch type has no generator
    #[error("Unsupported switch config: {0}")]
    UnsupportedSwitch(SwitchConfigType),
}

/// Generator over one backend snapshot
pub struct LayoutCalculator<'a, B: MonitorBackend + ?Sized> {
    backend: &'a B,
    layout_mode: LayoutMode,
}

impl<'a, B: MonitorBackend + ?Sized> LayoutCalculator<'a, B> {
    /// Create a calculator producing configurations in `layout_mode`
    pub fn new(backend: &'a B, layout_mode: LayoutMode) -> Self {
        Self {
            backend,
            layout_mode,
        }
    }

    /// Layout mode of generated configurations
    pub fn layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }

    /// Pick the monitor that should hold the primary logical monitor
    ///
    /// With the lid closed the hardware primary wins unless it is the panel,
    /// then the largest external monitor, then the largest of any kind. With
    /// the lid open: hardware primary, then the panel, then the largest.
    pub fn find_primary_monitor(&self) -> Option<&'a Monitor> {
        let backend: &'a B = self.backend;
        let monitors = backend.monitors();

        if backend.is_lid_closed() {
            backend
                .primary_monitor()
                .filter(|monitor| !monitor.is_laptop_panel)
                .or_else(|| largest(monitors.iter().filter(|m| !m.is_laptop_panel)))
                .or_else(|| largest(monitors.iter()))
        } else {
            backend
                .primary_monitor()
                .or_else(|| backend.laptop_panel())
                .or_else(|| largest(monitors.iter()))
        }
    }

    /// Primary first at the origin, every other active monitor to its right
    pub fn create_linear(&self) -> Result<MonitorsConfig, LayoutError> {
        let primary = self.find_primary_monitor().ok_or(LayoutError::NoMonitors)?;
        self.create_linear_with(primary, |monitor| self.is_active(monitor))
    }

    /// Primary monitor alone
    pub fn create_fallback(&self) -> Result<MonitorsConfig, LayoutError> {
        let primary = self.find_primary_monitor().ok_or(LayoutError::NoMonitors)?;
        self.create_linear_with(primary, |_| false)
    }

    /// Monitors at their hardware-suggested positions
    pub fn create_suggested(&self) -> Result<MonitorsConfig, LayoutError> {
        let primary = self.find_primary_monitor().ok_or(LayoutError::NoMonitors)?;
        let primary_scale = self.preferred_scale(primary)?;
        let global_scale = self.requires_global_scale().then_some(primary_scale);

        let mut logical_monitors: Vec<LogicalMonitorConfig> = Vec::new();
        let mut region: Vec<Rectangle> = Vec::new();

        for monitor in self.backend.monitors().iter().filter(|m| self.is_active(m)) {
            let (x, y) = monitor
                .suggested_position
                .ok_or_else(|| LayoutError::MissingSuggestedPosition(monitor.spec.connector.clone()))?;

            let is_primary = monitor.spec == primary.spec;
            let scale = if is_primary { Some(primary_scale) } else { global_scale };
            let mut logical_monitor = self.logical_monitor_for(monitor, x, y, scale)?;
            logical_monitor.is_primary = is_primary;

            if geometry::overlaps_region(&region, &logical_monitor.layout) {
                debug!(
                    "Suggested position of '{}' overlaps another monitor",
                    monitor.spec.connector
                );
                return Err(LayoutError::SuggestedOverlap);
            }

            region.push(logical_monitor.layout);
            logical_monitors.push(logical_monitor);
        }

        Ok(self.finish(logical_monitors, SwitchConfigType::Unknown))
    }

    /// Configuration for a switch policy
    pub fn create_for_switch_config(
        &self,
        switch_config: SwitchConfigType,
    ) -> Result<MonitorsConfig, LayoutError> {
        match switch_config {
            SwitchConfigType::AllMirror => self.create_mirror(),
            SwitchConfigType::AllLinear => self
                .create_linear()
                .map(|config| config.with_switch_config(SwitchConfigType::AllLinear)),
            SwitchConfigType::External => self.create_external(),
            SwitchConfigType::Builtin => self.create_builtin(),
            SwitchConfigType::Unknown => Err(LayoutError::UnsupportedSwitch(switch_config)),
        }
    }

    /// Every active monitor showing the same content at the largest shared size
    pub fn create_mirror(&self) -> Result<MonitorsConfig, LayoutError> {
        if !self.backend.capabilities().contains(Capability::Mirroring) {
            return Err(LayoutError::MirroringUnsupported);
        }

        let monitors: Vec<&Monitor> = self
            .backend
            .monitors()
            .iter()
            .filter(|m| self.is_active(m))
            .collect();
        let first = monitors.first().ok_or(LayoutError::NoMonitors)?;

        let mut best: Option<(i32, i32)> = None;
        for mode in first.modes() {
            let (width, height) = (mode.spec.width, mode.spec.height);
            let shared = monitors
                .iter()
                .all(|monitor| monitor.mode_with_resolution(width, height).is_some());
            let larger = best.map_or(true, |(w, h)| {
                i64::from(width) * i64::from(height) > i64::from(w) * i64::from(h)
            });
            if shared && larger {
                best = Some((width, height));
            }
        }
        let (width, height) = best.ok_or(LayoutError::NoCommonMode)?;

        let mut monitor_configs = Vec::with_capacity(monitors.len());
        let mut scale: f32 = 1.0;
        for monitor in &monitors {
            let mode = monitor
                .mode_with_resolution(width, height)
                .ok_or(LayoutError::NoCommonMode)?;
            scale = scale.max(self.backend.calculate_scale(self.layout_mode, monitor, mode));
            monitor_configs.push(MonitorConfig::new(monitor.spec.clone(), mode.spec));
        }

        let mut members = monitor_configs.into_iter();
        let main = members.next().ok_or(LayoutError::NoMonitors)?;
        let mut logical_monitor =
            LogicalMonitorConfig::for_monitor(main, 0, 0, Transform::Normal, scale, self.layout_mode);
        logical_monitor.monitor_configs.extend(members);
        logical_monitor.is_primary = true;

        debug!("Mirroring {} monitors at {}x{}", monitors.len(), width, height);

        Ok(self.finish(vec![logical_monitor], SwitchConfigType::AllMirror))
    }

    /// External monitors only, laid out linearly
    pub fn create_external(&self) -> Result<MonitorsConfig, LayoutError> {
        let backend: &'a B = self.backend;
        let externals = backend.monitors().iter().filter(|m| !m.is_laptop_panel);

        let primary = backend
            .primary_monitor()
            .filter(|monitor| !monitor.is_laptop_panel)
            .or_else(|| largest(externals))
            .ok_or(LayoutError::NoExternalMonitor)?;

        self.create_linear_with(primary, |monitor| !monitor.is_laptop_panel)
            .map(|config| config.with_switch_config(SwitchConfigType::External))
    }

    /// Laptop panel only
    pub fn create_builtin(&self) -> Result<MonitorsConfig, LayoutError> {
        let panel = self.backend.laptop_panel().ok_or(LayoutError::NoLaptopPanel)?;
        self.create_linear_with(panel, |_| false)
            .map(|config| config.with_switch_config(SwitchConfigType::Builtin))
    }

    /// Copy of `base` with the panel's logical monitor set to `transform`
    pub fn create_for_orientation(
        &self,
        base: &Arc<MonitorsConfig>,
        transform: Transform,
    ) -> Result<MonitorsConfig, LayoutError> {
        let panel = self.backend.laptop_panel().ok_or(LayoutError::NoLaptopPanel)?;
        let index = panel_logical_monitor(base, &panel.spec)?;

        let current = base.logical_monitor_configs[index].transform;
        if current == transform {
            return Err(LayoutError::Unchanged(transform));
        }

        let mut logical_monitors = base.logical_monitor_configs.clone();
        let old_layout = logical_monitors[index].layout;
        let mut new_layout = old_layout;
        if current.is_rotated() != transform.is_rotated() {
            new_layout = old_layout.transposed();
        }
        logical_monitors[index].transform = transform;
        logical_monitors[index].layout = new_layout;

        relayout_around(&mut logical_monitors, index, &old_layout);
        normalize_origin(&mut logical_monitors);

        trace!(
            "Panel '{}' {} -> {}",
            panel.spec.connector,
            current,
            transform
        );

        Ok(MonitorsConfig::new(
            logical_monitors,
            base.disabled_monitor_specs.clone(),
            base.layout_mode,
            base.flags,
        )
        .with_switch_config(base.switch_config)
        .with_parent(Arc::clone(base)))
    }

    /// Copy of `base` with the panel rotated one quarter turn further
    pub fn create_for_builtin_rotation(
        &self,
        base: &Arc<MonitorsConfig>,
    ) -> Result<MonitorsConfig, LayoutError> {
        let panel = self.backend.laptop_panel().ok_or(LayoutError::NoLaptopPanel)?;
        let index = panel_logical_monitor(base, &panel.spec)?;
        let transform = base.logical_monitor_configs[index].transform.rotated_once();

        self.create_for_orientation(base, transform)
    }

    fn create_linear_with<F>(&self, primary: &Monitor, include: F) -> Result<MonitorsConfig, LayoutError>
    where
        F: Fn(&Monitor) -> bool,
    {
        let mut primary_logical_monitor = self.logical_monitor_for(primary, 0, 0, None)?;
        primary_logical_monitor.is_primary = true;

        let global_scale = self
            .requires_global_scale()
            .then_some(primary_logical_monitor.scale);
        let mut x = primary_logical_monitor.layout.right();
        let mut logical_monitors = vec![primary_logical_monitor];

        for monitor in self.backend.monitors() {
            if monitor.spec == primary.spec || !include(monitor) {
                continue;
            }
            if monitor.preferred_mode().is_none() {
                debug!("Skipping '{}': no preferred mode", monitor.spec.connector);
                continue;
            }

            let logical_monitor = self.logical_monitor_for(monitor, x, 0, global_scale)?;
            x = logical_monitor.layout.right();
            logical_monitors.push(logical_monitor);
        }

        Ok(self.finish(logical_monitors, SwitchConfigType::Unknown))
    }

    fn logical_monitor_for(
        &self,
        monitor: &Monitor,
        x: i32,
        y: i32,
        scale: Option<f32>,
    ) -> Result<LogicalMonitorConfig, LayoutError> {
        let mode = monitor
            .preferred_mode()
            .ok_or_else(|| LayoutError::NoPreferredMode(monitor.spec.connector.clone()))?;
        let scale =
            scale.unwrap_or_else(|| self.backend.calculate_scale(self.layout_mode, monitor, mode));

        Ok(LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(monitor.spec.clone(), mode.spec),
            x,
            y,
            self.transform_for(monitor),
            scale,
            self.layout_mode,
        ))
    }

    fn preferred_scale(&self, monitor: &Monitor) -> Result<f32, LayoutError> {
        let mode = monitor
            .preferred_mode()
            .ok_or_else(|| LayoutError::NoPreferredMode(monitor.spec.connector.clone()))?;
        Ok(self.backend.calculate_scale(self.layout_mode, monitor, mode))
    }

    fn transform_for(&self, monitor: &Monitor) -> Transform {
        if monitor.is_laptop_panel {
            self.backend.panel_orientation().unwrap_or_default()
        } else {
            Transform::Normal
        }
    }

    fn is_active(&self, monitor: &Monitor) -> bool {
        self.backend.is_monitor_active(monitor)
    }

    fn requires_global_scale(&self) -> bool {
        self.backend
            .capabilities()
            .contains(Capability::GlobalScaleRequired)
    }

    /// Wrap logical monitors, disabling every active monitor left out
    fn finish(
        &self,
        logical_monitors: Vec<LogicalMonitorConfig>,
        switch_config: SwitchConfigType,
    ) -> MonitorsConfig {
        let disabled: Vec<MonitorSpec> = self
            .backend
            .monitors()
            .iter()
            .filter(|monitor| self.is_active(monitor))
            .filter(|monitor| !logical_monitors.iter().any(|lm| lm.has_monitor(&monitor.spec)))
            .map(|monitor| monitor.spec.clone())
            .collect();

        MonitorsConfig::new(
            logical_monitors,
            disabled,
            self.layout_mode,
            Default::default(),
        )
        .with_switch_config(switch_config)
    }
}

/// Largest preferred mode; ties keep the first monitor
fn largest<'m>(monitors: impl Iterator<Item = &'m Monitor>) -> Option<&'m Monitor> {
    monitors.fold(None, |best: Option<&Monitor>, monitor| match best {
        Some(current) if current.preferred_area() >= monitor.preferred_area() => Some(current),
        _ => Some(monitor),
    })
}

fn panel_logical_monitor(config: &MonitorsConfig, panel: &MonitorSpec) -> Result<usize, LayoutError> {
    let index = config
        .logical_monitor_configs
        .iter()
        .position(|lm| lm.has_monitor(panel))
        .ok_or(LayoutError::PanelNotConfigured)?;

    if config.logical_monitor_configs[index].monitor_configs.len() > 1 {
        return Err(LayoutError::PanelCloned);
    }

    Ok(index)
}

/// Shift logical monitors past a resized one by its size change
fn relayout_around(logical_monitors: &mut [LogicalMonitorConfig], resized: usize, old_layout: &Rectangle) {
    let new_layout = logical_monitors[resized].layout;
    let delta_x = new_layout.width - old_layout.width;
    let delta_y = new_layout.height - old_layout.height;

    for (index, logical_monitor) in logical_monitors.iter_mut().enumerate() {
        if index == resized {
            continue;
        }
        if logical_monitor.layout.x >= old_layout.right() {
            logical_monitor.layout.x += delta_x;
        }
        if logical_monitor.layout.y >= old_layout.bottom() {
            logical_monitor.layout.y += delta_y;
        }
    }
}

/// Translate logical monitors so the minimum corner is (0, 0)
pub fn normalize_origin(logical_monitors: &mut [LogicalMonitorConfig]) {
    let Some(bounds) = geometry::bounding_box(logical_monitors.iter().map(|lm| &lm.layout)) else {
        return;
    };

    for logical_monitor in logical_monitors.iter_mut() {
        logical_monitor.layout.x -= bounds.x;
        logical_monitor.layout.y -= bounds.y;
    }
}
