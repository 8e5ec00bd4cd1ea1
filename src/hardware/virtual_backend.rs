//! In-Memory Backend
//!
//! A [`MonitorBackend`] whose hardware is described in TOML instead of
//! probed. The CLI uses it to plan configurations offline and the tests use
//! it to stage hotplug, lid and CRTC-shortage scenarios.
//!
//! ```toml
//! crtcs = 3
//! capabilities = ["layout-mode", "mirroring"]
//!
//! [[monitors]]
//! connector = "eDP-1"
//! laptop_panel = true
//! width_mm = 294
//! height_mm = 165
//! modes = [{ width = 2880, height = 1620, refresh_rate = 60.0 }]
//!
//! [[monitors]]
//! connector = "DP-1"
//! vendor = "DEL"
//! modes = [{ width = 3840, height = 2160, refresh_rate = 60.0 }]
//! tiles = { columns = 2, rows = 1 }
//! ```

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::hardware::crtc::{CrtcAssignment, OutputAssignment};
use crate::hardware::model::{
    Crtc, CrtcId, CrtcMode, CrtcModeId, Monitor, MonitorCrtcMode, MonitorMode, Output, OutputId,
    TileInfo,
};
use crate::hardware::{BackendError, Capability, MonitorBackend};
use crate::multimon::types::{LayoutMode, MonitorModeSpec, MonitorSpec, Transform};

/// Scale used for high density panels
const HIDPI_SCALE: f32 = 2.0;
/// Minimum DPI for [`HIDPI_SCALE`]
const HIDPI_LIMIT: f64 = 192.0;
/// Minimum height in pixels for [`HIDPI_SCALE`]
const HIDPI_MIN_HEIGHT: i32 = 1200;
const MM_PER_INCH: f64 = 25.4;

/// Tile grid of a tiled monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    /// Horizontal tiles
    pub columns: u32,
    /// Vertical tiles
    pub rows: u32,
}

/// One monitor of a hardware description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDescription {
    /// Connector name
    pub connector: String,
    /// EDID vendor
    #[serde(default = "default_vendor")]
    pub vendor: String,
    /// EDID product
    #[serde(default = "default_product")]
    pub product: String,
    /// EDID serial
    #[serde(default = "default_serial")]
    pub serial: String,
    /// Modes, in the order the hardware reports them
    pub modes: Vec<MonitorModeSpec>,
    /// Index of the preferred mode
    #[serde(default)]
    pub preferred: usize,
    /// Built-in panel
    #[serde(default)]
    pub laptop_panel: bool,
    /// Hardware-reported primary
    #[serde(default)]
    pub primary: bool,
    /// Hardware-suggested position
    #[serde(default)]
    pub suggested_position: Option<(i32, i32)>,
    /// Fixed panel mounting transform
    #[serde(default)]
    pub panel_transform: Transform,
    /// Physical width in millimetres
    #[serde(default)]
    pub width_mm: Option<u32>,
    /// Physical height in millimetres
    #[serde(default)]
    pub height_mm: Option<u32>,
    /// Forced scale
    #[serde(default)]
    pub scale: Option<f32>,
    /// Underscanning support
    #[serde(default)]
    pub underscanning: bool,
    /// Tile grid; the first mode is the full tiled resolution
    #[serde(default)]
    pub tiles: Option<TileGrid>,
}

fn default_vendor() -> String {
    "MetaProduct's Inc.".to_string()
}

fn default_product() -> String {
    "MetaMonitor".to_string()
}

fn default_serial() -> String {
    "0x123456".to_string()
}

impl MonitorDescription {
    /// Monitor with default identity and the given modes, first preferred
    pub fn new(connector: impl Into<String>, modes: &[(i32, i32)]) -> Self {
        Self {
            connector: connector.into(),
            vendor: default_vendor(),
            product: default_product(),
            serial: default_serial(),
            modes: modes
                .iter()
                .map(|(width, height)| MonitorModeSpec::new(*width, *height, 60.0))
                .collect(),
            preferred: 0,
            laptop_panel: false,
            primary: false,
            suggested_position: None,
            panel_transform: Transform::Normal,
            width_mm: None,
            height_mm: None,
            scale: None,
            underscanning: false,
            tiles: None,
        }
    }
}

/// Serializable description of a machine's display hardware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDescription {
    /// Number of CRTCs, usable by every output
    pub crtcs: u32,
    /// Laptop lid closed
    #[serde(default)]
    pub lid_closed: bool,
    /// Accelerometer orientation
    #[serde(default)]
    pub panel_orientation: Option<Transform>,
    /// Capability bits
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
    /// Connected monitors
    #[serde(default)]
    pub monitors: Vec<MonitorDescription>,
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::LayoutMode, Capability::Mirroring]
}

impl Default for HardwareDescription {
    fn default() -> Self {
        Self {
            crtcs: 0,
            lid_closed: false,
            panel_orientation: None,
            capabilities: default_capabilities(),
            monitors: Vec::new(),
        }
    }
}

impl HardwareDescription {
    /// Load a description from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hardware description {:?}", path))?;
        let description: HardwareDescription = toml::from_str(&content)
            .with_context(|| format!("Failed to parse hardware description {:?}", path))?;

        if description.monitors.iter().any(|m| m.modes.is_empty()) {
            anyhow::bail!("Every monitor needs at least one mode");
        }

        Ok(description)
    }

    /// Instantiate the hardware
    pub fn build(&self) -> VirtualBackend {
        let crtcs: Vec<Crtc> = (0..self.crtcs).map(|id| Crtc::new(CrtcId(id))).collect();
        let crtc_ids: Vec<CrtcId> = crtcs.iter().map(|crtc| crtc.id).collect();

        let mut backend = VirtualBackend {
            monitors: Vec::new(),
            outputs: Vec::new(),
            crtcs,
            crtc_modes: Vec::new(),
            lid_closed: self.lid_closed,
            panel_orientation: self.panel_orientation,
            capabilities: self.capabilities.iter().copied().collect(),
            reject_applies: false,
            apply_count: 0,
            last_applied: None,
        };

        for (index, description) in self.monitors.iter().enumerate() {
            backend.add_monitor(description, &crtc_ids, index as u32 + 1);
        }

        backend
    }
}

/// Plan most recently accepted by [`VirtualBackend::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedState {
    /// CRTC assignments
    pub crtcs: Vec<CrtcAssignment>,
    /// Output assignments
    pub outputs: Vec<OutputAssignment>,
}

/// Hardware that lives in memory
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    monitors: Vec<Monitor>,
    outputs: Vec<Output>,
    crtcs: Vec<Crtc>,
    crtc_modes: Vec<CrtcMode>,
    lid_closed: bool,
    panel_orientation: Option<Transform>,
    capabilities: BitFlags<Capability>,
    reject_applies: bool,
    apply_count: usize,
    last_applied: Option<AppliedState>,
}

impl VirtualBackend {
    /// Builder starting from empty hardware
    pub fn builder() -> VirtualBackendBuilder {
        VirtualBackendBuilder::default()
    }

    fn add_crtc_mode(&mut self, width: i32, height: i32, refresh_rate: f32) -> CrtcModeId {
        let id = CrtcModeId(self.crtc_modes.len() as u32);
        self.crtc_modes.push(CrtcMode {
            id,
            width,
            height,
            refresh_rate,
        });
        id
    }

    fn add_output(&mut self, name: String, crtc_ids: &[CrtcId], underscanning: bool) -> OutputId {
        let id = OutputId(self.outputs.len() as u32);
        let mut output = Output::new(id, name, crtc_ids.to_vec());
        output.supports_underscanning = underscanning;
        output.max_bpc_range = Some((6, 16));
        self.outputs.push(output);
        id
    }

    fn add_monitor(&mut self, description: &MonitorDescription, crtc_ids: &[CrtcId], group_id: u32) {
        let grid = description
            .tiles
            .filter(|grid| grid.columns * grid.rows > 1)
            .zip(description.modes.first().copied());

        let mut modes = Vec::with_capacity(description.modes.len());
        let outputs: Vec<OutputId>;

        match grid {
            Some((grid, full)) => {
                let tile_w = full.width / grid.columns as i32;
                let tile_h = full.height / grid.rows as i32;

                let mut ids = Vec::new();
                for row in 0..grid.rows {
                    for column in 0..grid.columns {
                        let name = if ids.is_empty() {
                            description.connector.clone()
                        } else {
                            format!("{}-tile{}", description.connector, ids.len())
                        };
                        let id = self.add_output(name, crtc_ids, description.underscanning);
                        if let Some(output) = self.outputs.iter_mut().find(|o| o.id == id) {
                            output.tile_info = Some(TileInfo {
                                group_id,
                                max_h_tiles: grid.columns,
                                max_v_tiles: grid.rows,
                                loc_h_tile: column,
                                loc_v_tile: row,
                                tile_w,
                                tile_h,
                            });
                        }
                        ids.push(id);
                    }
                }

                let tile_mode = self.add_crtc_mode(tile_w, tile_h, full.refresh_rate);
                modes.push(MonitorMode {
                    spec: full,
                    crtc_modes: ids
                        .iter()
                        .map(|output| MonitorCrtcMode {
                            output: *output,
                            crtc_mode: Some(tile_mode),
                        })
                        .collect(),
                    is_tiled: true,
                });

                // Untiled modes scan out on the main output only
                for spec in &description.modes[1..] {
                    let crtc_mode = self.add_crtc_mode(spec.width, spec.height, spec.refresh_rate);
                    modes.push(MonitorMode {
                        spec: *spec,
                        crtc_modes: ids
                            .iter()
                            .enumerate()
                            .map(|(index, output)| MonitorCrtcMode {
                                output: *output,
                                crtc_mode: (index == 0).then_some(crtc_mode),
                            })
                            .collect(),
                        is_tiled: false,
                    });
                }

                outputs = ids;
            }
            None => {
                let output =
                    self.add_output(description.connector.clone(), crtc_ids, description.underscanning);
                for spec in &description.modes {
                    let crtc_mode = self.add_crtc_mode(spec.width, spec.height, spec.refresh_rate);
                    modes.push(MonitorMode::single(*spec, output, crtc_mode));
                }
                outputs = vec![output];
            }
        }

        let preferred_mode = (description.preferred < modes.len()).then_some(description.preferred);

        self.monitors.push(Monitor {
            spec: MonitorSpec::new(
                description.connector.clone(),
                description.vendor.clone(),
                description.product.clone(),
                description.serial.clone(),
            ),
            outputs,
            modes,
            preferred_mode,
            is_laptop_panel: description.laptop_panel,
            is_primary: description.primary,
            suggested_position: description.suggested_position,
            panel_transform: description.panel_transform,
            width_mm: description.width_mm,
            height_mm: description.height_mm,
            scale_override: description.scale,
        });
    }

    /// Close or open the lid
    pub fn set_lid_closed(&mut self, closed: bool) {
        self.lid_closed = closed;
    }

    /// Report an accelerometer orientation
    pub fn set_panel_orientation(&mut self, orientation: Option<Transform>) {
        self.panel_orientation = orientation;
    }

    /// Make every following apply fail
    pub fn set_reject_applies(&mut self, reject: bool) {
        self.reject_applies = reject;
    }

    /// Replace capability bits
    pub fn set_capabilities(&mut self, capabilities: BitFlags<Capability>) {
        self.capabilities = capabilities;
    }

    /// Pretend `crtc` currently drives `output`
    pub fn set_assigned_crtc(&mut self, output: OutputId, crtc: Option<CrtcId>) {
        if let Some(output) = self.outputs.iter_mut().find(|o| o.id == output) {
            output.assigned_crtc = crtc;
        }
    }

    /// Replace the CRTC with the same id
    pub fn replace_crtc(&mut self, crtc: Crtc) {
        if let Some(existing) = self.crtcs.iter_mut().find(|c| c.id == crtc.id) {
            *existing = crtc;
        }
    }

    /// Unplug the monitor on `connector`; its outputs stay known
    pub fn disconnect(&mut self, connector: &str) {
        self.monitors.retain(|monitor| monitor.spec.connector != connector);
    }

    /// Plug in another monitor
    pub fn connect(&mut self, description: &MonitorDescription) {
        let crtc_ids: Vec<CrtcId> = self.crtcs.iter().map(|crtc| crtc.id).collect();
        let group_id = self.monitors.len() as u32 + 1;
        self.add_monitor(description, &crtc_ids, group_id);
    }

    /// Number of accepted applies
    pub fn apply_count(&self) -> usize {
        self.apply_count
    }

    /// Plan most recently accepted
    pub fn last_applied(&self) -> Option<&AppliedState> {
        self.last_applied.as_ref()
    }
}

impl MonitorBackend for VirtualBackend {
    fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    fn crtcs(&self) -> &[Crtc] {
        &self.crtcs
    }

    fn crtc_modes(&self) -> &[CrtcMode] {
        &self.crtc_modes
    }

    fn is_lid_closed(&self) -> bool {
        self.lid_closed
    }

    fn panel_orientation(&self) -> Option<Transform> {
        self.panel_orientation
    }

    fn capabilities(&self) -> BitFlags<Capability> {
        self.capabilities
    }

    fn calculate_scale(&self, layout_mode: LayoutMode, monitor: &Monitor, mode: &MonitorMode) -> f32 {
        let scale = monitor
            .scale_override
            .unwrap_or_else(|| density_scale(monitor, mode));

        match layout_mode {
            LayoutMode::Logical => scale,
            LayoutMode::Physical => scale.round().max(1.0),
        }
    }

    fn apply(
        &mut self,
        crtc_assignments: &[CrtcAssignment],
        output_assignments: &[OutputAssignment],
    ) -> Result<(), BackendError> {
        if self.reject_applies {
            return Err(BackendError::Rejected("virtual backend set to reject".to_string()));
        }

        for assignment in crtc_assignments {
            if !self.crtcs.iter().any(|crtc| crtc.id == assignment.crtc) {
                return Err(BackendError::UnknownObject {
                    kind: "crtc",
                    id: assignment.crtc.0,
                });
            }
            if !self.crtc_modes.iter().any(|mode| mode.id == assignment.mode) {
                return Err(BackendError::UnknownObject {
                    kind: "mode",
                    id: assignment.mode.0,
                });
            }
        }

        for output in &mut self.outputs {
            output.assigned_crtc = crtc_assignments
                .iter()
                .find(|assignment| assignment.outputs.contains(&output.id))
                .map(|assignment| assignment.crtc);
        }

        self.apply_count += 1;
        self.last_applied = Some(AppliedState {
            crtcs: crtc_assignments.to_vec(),
            outputs: output_assignments.to_vec(),
        });

        if crtc_assignments.is_empty() {
            info!("All outputs turned off");
        } else {
            debug!("Applied {} CRTC assignments", crtc_assignments.len());
        }

        Ok(())
    }
}

fn density_scale(monitor: &Monitor, mode: &MonitorMode) -> f32 {
    let (Some(width_mm), Some(height_mm)) = (monitor.width_mm, monitor.height_mm) else {
        return 1.0;
    };
    if width_mm == 0 || height_mm == 0 || mode.spec.height < HIDPI_MIN_HEIGHT {
        return 1.0;
    }

    let dpi_x = mode.spec.width as f64 / (width_mm as f64 / MM_PER_INCH);
    let dpi_y = mode.spec.height as f64 / (height_mm as f64 / MM_PER_INCH);

    if dpi_x > HIDPI_LIMIT && dpi_y > HIDPI_LIMIT {
        HIDPI_SCALE
    } else {
        1.0
    }
}

/// Fluent construction of test hardware
#[derive(Debug, Clone, Default)]
pub struct VirtualBackendBuilder {
    description: HardwareDescription,
}

impl VirtualBackendBuilder {
    /// CRTC count
    pub fn crtcs(mut self, count: u32) -> Self {
        self.description.crtcs = count;
        self
    }

    /// External monitor with the given modes, first preferred
    pub fn monitor(mut self, connector: &str, modes: &[(i32, i32)]) -> Self {
        self.description
            .monitors
            .push(MonitorDescription::new(connector, modes));
        self
    }

    /// Built-in panel with the given modes, first preferred
    pub fn laptop_panel(mut self, connector: &str, modes: &[(i32, i32)]) -> Self {
        let mut description = MonitorDescription::new(connector, modes);
        description.laptop_panel = true;
        self.description.monitors.push(description);
        self
    }

    /// Tiled monitor made of `columns` × `rows` tiles
    pub fn tiled_monitor(
        mut self,
        connector: &str,
        columns: u32,
        rows: u32,
        tile_w: i32,
        tile_h: i32,
    ) -> Self {
        let mut description = MonitorDescription::new(
            connector,
            &[(tile_w * columns as i32, tile_h * rows as i32), (tile_w, tile_h)],
        );
        description.tiles = Some(TileGrid { columns, rows });
        self.description.monitors.push(description);
        self
    }

    /// Arbitrary monitor description
    pub fn with_monitor(mut self, description: MonitorDescription) -> Self {
        self.description.monitors.push(description);
        self
    }

    /// Lid state
    pub fn lid_closed(mut self, closed: bool) -> Self {
        self.description.lid_closed = closed;
        self
    }

    /// Capability bits
    pub fn capabilities(mut self, capabilities: BitFlags<Capability>) -> Self {
        self.description.capabilities = capabilities.iter().collect();
        self
    }

    /// Finished backend
    pub fn build(self) -> VirtualBackend {
        self.description.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::crtc::assign;
    use crate::multimon::logical::LogicalMonitorConfig;
    use crate::multimon::monitors_config::MonitorsConfig;
    use crate::multimon::types::MonitorConfig;

    #[test]
    fn test_parse_description() {
        let toml = r#"
            crtcs = 2
            lid_closed = true
            capabilities = ["global-scale-required"]

            [[monitors]]
            connector = "eDP-1"
            laptop_panel = true
            width_mm = 294
            height_mm = 165
            modes = [{ width = 2880, height = 1620, refresh_rate = 60.0 }]

            [[monitors]]
            connector = "DP-1"
            suggested_position = [2880, 0]
            modes = [
                { width = 3840, height = 2160, refresh_rate = 60.0 },
                { width = 1920, height = 1080, refresh_rate = 60.0 },
            ]
            tiles = { columns = 2, rows = 1 }
        "#;

        let description: HardwareDescription = toml::from_str(toml).unwrap();
        let backend = description.build();

        assert!(backend.is_lid_closed());
        assert_eq!(backend.capabilities(), Capability::GlobalScaleRequired);
        assert_eq!(backend.monitors().len(), 2);
        assert_eq!(backend.outputs().len(), 3);

        let panel = backend.laptop_panel().unwrap();
        assert_eq!(panel.spec.connector, "eDP-1");

        let tiled = &backend.monitors()[1];
        assert_eq!(tiled.outputs.len(), 2);
        assert!(tiled.modes[0].is_tiled);
        assert_eq!(tiled.modes[1].crtc_modes[1].crtc_mode, None);
        assert_eq!(tiled.suggested_position, Some((2880, 0)));
    }

    #[test]
    fn test_scale_heuristic() {
        let mut description = MonitorDescription::new("eDP-1", &[(2880, 1620), (1920, 1080)]);
        description.width_mm = Some(294);
        description.height_mm = Some(165);
        let backend = VirtualBackend::builder().crtcs(1).with_monitor(description).build();

        let monitor = &backend.monitors()[0];
        assert_eq!(
            backend.calculate_scale(LayoutMode::Logical, monitor, &monitor.modes[0]),
            2.0
        );
        // Below the minimum height
        assert_eq!(
            backend.calculate_scale(LayoutMode::Logical, monitor, &monitor.modes[1]),
            1.0
        );
    }

    #[test]
    fn test_physical_mode_rounds_override() {
        let mut description = MonitorDescription::new("DP-1", &[(2560, 1440)]);
        description.scale = Some(1.5);
        let backend = VirtualBackend::builder().crtcs(1).with_monitor(description).build();
        let monitor = &backend.monitors()[0];

        assert_eq!(
            backend.calculate_scale(LayoutMode::Logical, monitor, &monitor.modes[0]),
            1.5
        );
        assert_eq!(
            backend.calculate_scale(LayoutMode::Physical, monitor, &monitor.modes[0]),
            2.0
        );
    }

    #[test]
    fn test_apply_records_state() {
        let mut backend = VirtualBackend::builder()
            .crtcs(1)
            .monitor("DP-1", &[(1920, 1080)])
            .build();
        let monitor = &backend.monitors()[0];
        let mut lm = LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(monitor.spec.clone(), monitor.modes[0].spec),
            0,
            0,
            Transform::Normal,
            1.0,
            LayoutMode::Physical,
        );
        lm.is_primary = true;
        let config = MonitorsConfig::new(vec![lm], vec![], LayoutMode::Physical, BitFlags::empty());

        let plan = assign(&backend, &config).unwrap();
        backend.apply(&plan.crtcs, &plan.outputs).unwrap();

        assert_eq!(backend.apply_count(), 1);
        assert_eq!(backend.outputs()[0].assigned_crtc, Some(CrtcId(0)));
        assert_eq!(backend.last_applied().unwrap().crtcs, plan.crtcs);

        backend.apply(&[], &[]).unwrap();
        assert_eq!(backend.outputs()[0].assigned_crtc, None);
    }

    #[test]
    fn test_reject_applies() {
        let mut backend = VirtualBackend::builder().crtcs(1).build();
        backend.set_reject_applies(true);
        assert!(matches!(
            backend.apply(&[], &[]),
            Err(BackendError::Rejected(_))
        ));
        assert_eq!(backend.apply_count(), 0);
    }

    #[test]
    fn test_hotplug() {
        let mut backend = VirtualBackend::builder()
            .crtcs(2)
            .monitor("DP-1", &[(1920, 1080)])
            .build();
        backend.connect(&MonitorDescription::new("HDMI-1", &[(1280, 720)]));
        assert_eq!(backend.monitors().len(), 2);

        backend.disconnect("DP-1");
        assert_eq!(backend.monitors().len(), 1);
        assert_eq!(backend.monitors()[0].spec.connector, "HDMI-1");
    }
}
