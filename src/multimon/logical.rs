//! Logical Monitor Configuration
//!
//! One rectangle of the desktop, driven by one monitor or a clone group of
//! monitors that all show the same content.

use serde::{Deserialize, Serialize};

use crate::multimon::error::VerificationError;
use crate::multimon::geometry::Rectangle;
use crate::multimon::types::{LayoutMode, MonitorConfig, MonitorSpec, Transform};

/// Configuration of one logical monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMonitorConfig {
    /// Rectangle in layout-mode units
    pub layout: Rectangle,
    /// Monitors shown in this rectangle; the first one is the main monitor
    pub monitor_configs: Vec<MonitorConfig>,
    /// Rotation/flip applied to every member
    pub transform: Transform,
    /// Scale factor (> 0)
    pub scale: f32,
    /// Holds the primary output
    pub is_primary: bool,
    /// Presentation (projector) mode
    pub is_presentation: bool,
}

impl LogicalMonitorConfig {
    /// Single-monitor logical monitor at `(x, y)` sized for `layout_mode`
    pub fn for_monitor(
        monitor_config: MonitorConfig,
        x: i32,
        y: i32,
        transform: Transform,
        scale: f32,
        layout_mode: LayoutMode,
    ) -> Self {
        let (width, height) = layout_size(
            monitor_config.mode_spec.width,
            monitor_config.mode_spec.height,
            transform,
            scale,
            layout_mode,
        );

        Self {
            layout: Rectangle::new(x, y, width, height),
            monitor_configs: vec![monitor_config],
            transform,
            scale,
            is_primary: false,
            is_presentation: false,
        }
    }

    /// Main (first) monitor config
    pub fn main_monitor_config(&self) -> Option<&MonitorConfig> {
        self.monitor_configs.first()
    }

    /// Whether `spec` is one of the members
    pub fn has_monitor(&self, spec: &MonitorSpec) -> bool {
        self.monitor_configs
            .iter()
            .any(|config| &config.monitor_spec == spec)
    }

    /// Recompute width and height from the main monitor's mode
    ///
    /// Fails in logical layout mode when the scale would produce a
    /// fractional size.
    pub fn derive_layout(&mut self, layout_mode: LayoutMode) -> Result<(), VerificationError> {
        let mode = self
            .main_monitor_config()
            .map(|config| config.mode_spec)
            .ok_or_else(|| VerificationError::InvalidLayout("Logical monitor is empty".to_string()))?;

        let (mut width, mut height) = (mode.width, mode.height);
        if self.transform.is_rotated() {
            std::mem::swap(&mut width, &mut height);
        }

        if layout_mode == LayoutMode::Logical {
            let scaled_width = width as f32 / self.scale;
            let scaled_height = height as f32 / self.scale;

            if scaled_width.floor() != scaled_width || scaled_height.floor() != scaled_height {
                return Err(VerificationError::InvalidLayout(format!(
                    "A logical monitor scale ({:.3}) would result into a fractional size ({:.3} x {:.3})",
                    self.scale, scaled_width, scaled_height
                )));
            }

            width = scaled_width as i32;
            height = scaled_height as i32;
        }

        self.layout.width = width;
        self.layout.height = height;
        Ok(())
    }

    /// Check this logical monitor on its own
    pub fn verify(&self, layout_mode: LayoutMode) -> Result<(), VerificationError> {
        if self.layout.x < 0 || self.layout.y < 0 {
            return Err(VerificationError::InvalidLayout(format!(
                "Invalid logical monitor position ({}, {})",
                self.layout.x, self.layout.y
            )));
        }

        if self.monitor_configs.is_empty() {
            return Err(VerificationError::InvalidLayout(
                "Logical monitor is empty".to_string(),
            ));
        }

        if self.scale <= 0.0 || !self.scale.is_finite() {
            return Err(VerificationError::InvalidLayout(format!(
                "Logical monitor scale '{}' invalid",
                self.scale
            )));
        }

        let (mut expected_width, mut expected_height) = (self.layout.width, self.layout.height);
        if self.transform.is_rotated() {
            std::mem::swap(&mut expected_width, &mut expected_height);
        }

        if layout_mode == LayoutMode::Logical {
            expected_width = (expected_width as f32 * self.scale).round() as i32;
            expected_height = (expected_height as f32 * self.scale).round() as i32;
        }

        for monitor_config in &self.monitor_configs {
            monitor_config.verify()?;

            let mode = &monitor_config.mode_spec;
            if mode.width != expected_width || mode.height != expected_height {
                return Err(VerificationError::InvalidLayout(format!(
                    "Monitor modes in logical monitor conflict: {} does not fit {}x{}",
                    monitor_config.monitor_spec.connector, expected_width, expected_height
                )));
            }
        }

        Ok(())
    }
}

/// Size of a mode in layout units after transform and scale
pub fn layout_size(
    mode_width: i32,
    mode_height: i32,
    transform: Transform,
    scale: f32,
    layout_mode: LayoutMode,
) -> (i32, i32) {
    let (mut width, mut height) = (mode_width, mode_height);

    if layout_mode == LayoutMode::Logical {
        width = (width as f32 / scale).round() as i32;
        height = (height as f32 / scale).round() as i32;
    }

    if transform.is_rotated() {
        (height, width)
    } else {
        (width, height)
    }
}
