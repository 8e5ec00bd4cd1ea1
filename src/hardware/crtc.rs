//! CRTC/Output Assignment
//!
//! Maps a verified monitors configuration onto concrete CRTCs. CRTCs are
//! scarce: each output needs one, every output has its own ranked list of
//! candidates, and outputs should keep the CRTC they already have so that
//! reconfiguration does not blank unrelated screens.
//!
//! # CRTC selection
//!
//! For each output, in order:
//!
//! 1. the CRTC already driving the output, unless claimed in this run
//! 2. the first unclaimed candidate that no configured output currently uses
//! 3. the first unclaimed candidate
//!
//! The assignment is all-or-nothing: any failure discards the partial plan.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::hardware::model::{CrtcId, CrtcModeId, Output, OutputId};
use crate::hardware::MonitorBackend;
use crate::multimon::error::{ConfigError, Result};
use crate::multimon::geometry::Rectangle;
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::MonitorsConfig;
use crate::multimon::types::{LayoutMode, Transform};

/// One CRTC programmed with a mode and position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrtcAssignment {
    /// CRTC
    pub crtc: CrtcId,
    /// Mode to scan out
    pub mode: CrtcModeId,
    /// Rectangle in layout coordinates
    pub layout: Rectangle,
    /// Transform applied by the hardware
    pub transform: Transform,
    /// Outputs driven by the CRTC
    pub outputs: Vec<OutputId>,
}

/// Per-output properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAssignment {
    /// Output
    pub output: OutputId,
    /// Primary output
    pub is_primary: bool,
    /// Presentation mode
    pub is_presentation: bool,
    /// Underscanning enabled
    pub is_underscanning: bool,
    /// Max bits per channel
    pub max_bpc: Option<u32>,
}

/// Result of a successful assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    /// CRTC assignments, in assignment order
    pub crtcs: Vec<CrtcAssignment>,
    /// Output assignments, in assignment order
    pub outputs: Vec<OutputAssignment>,
}

impl AssignmentPlan {
    /// Whether `crtc` was claimed
    pub fn uses_crtc(&self, crtc: CrtcId) -> bool {
        self.crtcs.iter().any(|assignment| assignment.crtc == crtc)
    }

    /// Output marked primary, if any
    pub fn primary_output(&self) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|assignment| assignment.is_primary)
            .map(|assignment| assignment.output)
    }
}

/// Assign CRTCs and output properties for `config`
///
/// # Errors
///
/// Returns [`ConfigError::ResourceExhausted`] when a configured monitor or
/// mode is missing from the hardware, or when an output has no CRTC left.
pub fn assign<B>(backend: &B, config: &MonitorsConfig) -> Result<AssignmentPlan>
where
    B: MonitorBackend + ?Sized,
{
    let reserved = reserved_crtcs(backend, config);
    let mut plan = AssignmentPlan::default();

    for logical_monitor in &config.logical_monitor_configs {
        assign_logical_monitor(backend, config.layout_mode, logical_monitor, &reserved, &mut plan)?;
    }

    debug!(
        "Assigned {} CRTCs for {} logical monitors",
        plan.crtcs.len(),
        config.logical_monitor_configs.len()
    );

    Ok(plan)
}

/// CRTCs currently driving any output the configuration references
fn reserved_crtcs<B>(backend: &B, config: &MonitorsConfig) -> HashSet<CrtcId>
where
    B: MonitorBackend + ?Sized,
{
    config
        .logical_monitor_configs
        .iter()
        .flat_map(|lm| lm.monitor_configs.iter())
        .filter_map(|mc| backend.monitor_from_spec(&mc.monitor_spec))
        .flat_map(|monitor| monitor.outputs.iter())
        .filter_map(|id| backend.output(*id))
        .filter_map(|output| output.assigned_crtc)
        .collect()
}

fn assign_logical_monitor<B>(
    backend: &B,
    layout_mode: LayoutMode,
    logical_monitor: &LogicalMonitorConfig,
    reserved: &HashSet<CrtcId>,
    plan: &mut AssignmentPlan,
) -> Result<()>
where
    B: MonitorBackend + ?Sized,
{
    let scale = match layout_mode {
        LayoutMode::Logical => logical_monitor.scale,
        LayoutMode::Physical => 1.0,
    };

    for (index, monitor_config) in logical_monitor.monitor_configs.iter().enumerate() {
        let spec = &monitor_config.monitor_spec;
        let monitor = backend.monitor_from_spec(spec).ok_or_else(|| {
            ConfigError::ResourceExhausted(format!("Configured monitor '{}' not found", spec))
        })?;

        let mode = monitor.mode_from_spec(&monitor_config.mode_spec).ok_or_else(|| {
            ConfigError::ResourceExhausted(format!(
                "Invalid mode {} for monitor '{}'",
                monitor_config.mode_spec, spec.connector
            ))
        })?;

        let crtc_transform = monitor.logical_to_crtc_transform(logical_monitor.transform);
        let main_output = monitor.main_output();

        for monitor_crtc_mode in &mode.crtc_modes {
            let Some(crtc_mode_id) = monitor_crtc_mode.crtc_mode else {
                continue;
            };

            let output = backend.output(monitor_crtc_mode.output).ok_or_else(|| {
                ConfigError::ResourceExhausted(format!(
                    "Output {} of monitor '{}' not found",
                    monitor_crtc_mode.output.0, spec.connector
                ))
            })?;

            let crtc_id = find_unassigned_crtc(output, plan, reserved).ok_or_else(|| {
                ConfigError::ResourceExhausted(format!(
                    "No available CRTC for monitor '{}'",
                    spec.connector
                ))
            })?;

            let hw_transform = match backend.crtc(crtc_id) {
                Some(crtc) if crtc.supports_transform(crtc_transform) => crtc_transform,
                _ => Transform::Normal,
            };

            let crtc_mode = backend.crtc_mode(crtc_mode_id).ok_or_else(|| {
                ConfigError::ResourceExhausted(format!("CRTC mode {} not found", crtc_mode_id.0))
            })?;

            let (crtc_x, crtc_y) =
                monitor.calculate_crtc_pos(mode, output, backend.outputs(), crtc_transform);

            let (mut width, mut height) = (crtc_mode.width, crtc_mode.height);
            if crtc_transform.is_rotated() {
                std::mem::swap(&mut width, &mut height);
            }

            let layout = Rectangle::new(
                logical_monitor.layout.x + (crtc_x as f32 / scale).round() as i32,
                logical_monitor.layout.y + (crtc_y as f32 / scale).round() as i32,
                (width as f32 / scale).round() as i32,
                (height as f32 / scale).round() as i32,
            );

            trace!(
                "CRTC {} -> output {} ({}) at {} transform {}",
                crtc_id.0,
                output.id.0,
                output.name,
                layout,
                hw_transform
            );

            plan.crtcs.push(CrtcAssignment {
                crtc: crtc_id,
                mode: crtc_mode_id,
                layout,
                transform: hw_transform,
                outputs: vec![output.id],
            });

            plan.outputs.push(OutputAssignment {
                output: output.id,
                is_primary: logical_monitor.is_primary
                    && index == 0
                    && main_output == Some(output.id),
                is_presentation: logical_monitor.is_presentation,
                is_underscanning: monitor_config.enable_underscanning,
                max_bpc: monitor_config.max_bpc,
            });
        }
    }

    Ok(())
}

fn find_unassigned_crtc(
    output: &Output,
    plan: &AssignmentPlan,
    reserved: &HashSet<CrtcId>,
) -> Option<CrtcId> {
    if let Some(crtc) = output.assigned_crtc {
        if !plan.uses_crtc(crtc) {
            return Some(crtc);
        }
    }

    output
        .possible_crtcs
        .iter()
        .copied()
        .find(|crtc| !plan.uses_crtc(*crtc) && !reserved.contains(crtc))
        .or_else(|| {
            output
                .possible_crtcs
                .iter()
                .copied()
                .find(|crtc| !plan.uses_crtc(*crtc))
        })
}
