//! Hardware Model
//!
//! Snapshot types describing what the backend reports: CRTCs, outputs,
//! CRTC modes and the monitors built from them.

use serde::{Deserialize, Serialize};

use crate::multimon::types::{MonitorModeSpec, MonitorSpec, Transform};

/// CRTC identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrtcId(pub u32);

/// Output identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId(pub u32);

/// CRTC mode identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrtcModeId(pub u32);

/// Hardware timing programmed into a CRTC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrtcMode {
    /// Mode id
    pub id: CrtcModeId,
    /// Scan-out width
    pub width: i32,
    /// Scan-out height
    pub height: i32,
    /// Refresh rate in Hz
    pub refresh_rate: f32,
}

/// Scan-out engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crtc {
    /// CRTC id
    pub id: CrtcId,
    /// Transforms the hardware can apply itself
    #[serde(default = "all_transforms")]
    pub supported_transforms: Vec<Transform>,
}

fn all_transforms() -> Vec<Transform> {
    Transform::ALL.to_vec()
}

impl Crtc {
    /// CRTC supporting every transform
    pub fn new(id: CrtcId) -> Self {
        Self {
            id,
            supported_transforms: all_transforms(),
        }
    }

    /// CRTC that only scans out untransformed
    pub fn without_transforms(id: CrtcId) -> Self {
        Self {
            id,
            supported_transforms: vec![Transform::Normal],
        }
    }

    /// Whether `transform` is applied natively
    pub fn supports_transform(&self, transform: Transform) -> bool {
        self.supported_transforms.contains(&transform)
    }
}

/// Position of one output inside a tiled monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileInfo {
    /// Tile group shared by all tiles of one monitor
    pub group_id: u32,
    /// Horizontal tile count
    pub max_h_tiles: u32,
    /// Vertical tile count
    pub max_v_tiles: u32,
    /// Column of this tile
    pub loc_h_tile: u32,
    /// Row of this tile
    pub loc_v_tile: u32,
    /// Tile width in pixels
    pub tile_w: i32,
    /// Tile height in pixels
    pub tile_h: i32,
}

/// Physical connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Output id
    pub id: OutputId,
    /// Connector name
    pub name: String,
    /// CRTCs able to drive this output, best first (`get_possible_crtcs`)
    pub possible_crtcs: Vec<CrtcId>,
    /// Outputs that may share a CRTC with this one
    #[serde(default)]
    pub possible_clones: Vec<OutputId>,
    /// CRTC currently driving this output
    #[serde(default)]
    pub assigned_crtc: Option<CrtcId>,
    /// Underscanning can be enabled
    #[serde(default)]
    pub supports_underscanning: bool,
    /// Supported max-bpc range
    #[serde(default)]
    pub max_bpc_range: Option<(u32, u32)>,
    /// Tile placement for tiled monitors
    #[serde(default)]
    pub tile_info: Option<TileInfo>,
}

impl Output {
    /// Untiled output with the given CRTC candidates
    pub fn new(id: OutputId, name: impl Into<String>, possible_crtcs: Vec<CrtcId>) -> Self {
        Self {
            id,
            name: name.into(),
            possible_crtcs,
            possible_clones: Vec::new(),
            assigned_crtc: None,
            supports_underscanning: false,
            max_bpc_range: None,
            tile_info: None,
        }
    }

    /// Whether `max_bpc` lies inside the supported range
    pub fn supports_max_bpc(&self, max_bpc: u32) -> bool {
        self.max_bpc_range
            .map(|(min, max)| (min..=max).contains(&max_bpc))
            .unwrap_or(false)
    }
}

/// CRTC mode an output uses for one monitor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCrtcMode {
    /// Output
    pub output: OutputId,
    /// CRTC mode, `None` when the output stays off in this monitor mode
    pub crtc_mode: Option<CrtcModeId>,
}

/// Mode of a whole monitor (all its outputs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMode {
    /// Combined timing
    pub spec: MonitorModeSpec,
    /// Per-output CRTC modes, in output order
    pub crtc_modes: Vec<MonitorCrtcMode>,
    /// Whether every tile is driven
    #[serde(default)]
    pub is_tiled: bool,
}

impl MonitorMode {
    /// Mode driving a single output
    pub fn single(spec: MonitorModeSpec, output: OutputId, crtc_mode: CrtcModeId) -> Self {
        Self {
            spec,
            crtc_modes: vec![MonitorCrtcMode {
                output,
                crtc_mode: Some(crtc_mode),
            }],
            is_tiled: false,
        }
    }
}

/// A display as the user sees it: one or more outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Identity
    pub spec: MonitorSpec,
    /// Outputs; the first one is the main output
    pub outputs: Vec<OutputId>,
    /// Supported modes, best first
    pub modes: Vec<MonitorMode>,
    /// Index of the preferred mode
    #[serde(default)]
    pub preferred_mode: Option<usize>,
    /// Built-in laptop panel
    #[serde(default)]
    pub is_laptop_panel: bool,
    /// Primary according to the hardware
    #[serde(default)]
    pub is_primary: bool,
    /// Position suggested by the hardware
    #[serde(default)]
    pub suggested_position: Option<(i32, i32)>,
    /// Fixed mounting transform of a panel
    #[serde(default)]
    pub panel_transform: Transform,
    /// Physical width in millimetres
    #[serde(default)]
    pub width_mm: Option<u32>,
    /// Physical height in millimetres
    #[serde(default)]
    pub height_mm: Option<u32>,
    /// Scale forced by the backend
    #[serde(default)]
    pub scale_override: Option<f32>,
}

impl Monitor {
    /// All modes (`get_monitor_modes`)
    pub fn modes(&self) -> &[MonitorMode] {
        &self.modes
    }

    /// Preferred mode (`get_preferred_mode`)
    pub fn preferred_mode(&self) -> Option<&MonitorMode> {
        self.preferred_mode.and_then(|index| self.modes.get(index))
    }

    /// Mode matching a spec
    pub fn mode_from_spec(&self, spec: &MonitorModeSpec) -> Option<&MonitorMode> {
        self.modes.iter().find(|mode| &mode.spec == spec)
    }

    /// First mode with the given resolution
    pub fn mode_with_resolution(&self, width: i32, height: i32) -> Option<&MonitorMode> {
        self.modes
            .iter()
            .find(|mode| mode.spec.width == width && mode.spec.height == height)
    }

    /// Main output id
    pub fn main_output(&self) -> Option<OutputId> {
        self.outputs.first().copied()
    }

    /// Preferred mode area, 0 without a preferred mode
    pub fn preferred_area(&self) -> i64 {
        self.preferred_mode()
            .map(|mode| mode.spec.area())
            .unwrap_or(0)
    }

    /// Transform the CRTC needs for a logical transform
    pub fn logical_to_crtc_transform(&self, transform: Transform) -> Transform {
        transform.then(self.panel_transform)
    }

    /// Position of `output` inside this monitor in CRTC space
    ///
    /// Non-tiled modes always start at (0, 0). In tiled modes the offset is
    /// the accumulated size of the tiles that come before this one in the
    /// direction the transform scans out.
    pub fn calculate_crtc_pos(
        &self,
        mode: &MonitorMode,
        output: &Output,
        all_outputs: &[Output],
        crtc_transform: Transform,
    ) -> (i32, i32) {
        let tile = match (mode.is_tiled, output.tile_info) {
            (true, Some(tile)) => tile,
            _ => return (0, 0),
        };

        let mut x = 0;
        let mut y = 0;

        let others = self
            .outputs
            .iter()
            .filter(|id| **id != output.id)
            .filter_map(|id| all_outputs.iter().find(|o| o.id == *id))
            .filter_map(|o| o.tile_info);

        for other in others {
            let same_row = other.loc_v_tile == tile.loc_v_tile;
            let same_column = other.loc_h_tile == tile.loc_h_tile;

            match crtc_transform {
                Transform::Normal | Transform::Flipped => {
                    if same_row && other.loc_h_tile < tile.loc_h_tile {
                        x += other.tile_w;
                    }
                    if same_column && other.loc_v_tile < tile.loc_v_tile {
                        y += other.tile_h;
                    }
                }
                Transform::Rotate180 | Transform::Flipped180 => {
                    if same_row && other.loc_h_tile > tile.loc_h_tile {
                        x += other.tile_w;
                    }
                    if same_column && other.loc_v_tile > tile.loc_v_tile {
                        y += other.tile_h;
                    }
                }
                Transform::Rotate270 | Transform::Flipped270 => {
                    if same_row && other.loc_h_tile > tile.loc_h_tile {
                        y += other.tile_w;
                    }
                    if same_column && other.loc_v_tile < tile.loc_v_tile {
                        x += other.tile_h;
                    }
                }
                Transform::Rotate90 | Transform::Flipped90 => {
                    if same_row && other.loc_h_tile < tile.loc_h_tile {
                        y += other.tile_w;
                    }
                    if same_column && other.loc_v_tile > tile.loc_v_tile {
                        x += other.tile_h;
                    }
                }
            }
        }

        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiled_outputs() -> Vec<Output> {
        (0..4u32)
            .map(|i| {
                let mut output = Output::new(OutputId(i), format!("DP-{}", i + 1), vec![CrtcId(i)]);
                output.tile_info = Some(TileInfo {
                    group_id: 1,
                    max_h_tiles: 2,
                    max_v_tiles: 2,
                    loc_h_tile: i % 2,
                    loc_v_tile: i / 2,
                    tile_w: 1920,
                    tile_h: 1080,
                });
                output
            })
            .collect()
    }

    fn tiled_monitor(outputs: &[Output]) -> Monitor {
        Monitor {
            spec: MonitorSpec::new("DP-1", "DEL", "U3218K", "0xABC"),
            outputs: outputs.iter().map(|o| o.id).collect(),
            modes: vec![MonitorMode {
                spec: MonitorModeSpec::new(3840, 2160, 60.0),
                crtc_modes: outputs
                    .iter()
                    .map(|o| MonitorCrtcMode {
                        output: o.id,
                        crtc_mode: Some(CrtcModeId(1)),
                    })
                    .collect(),
                is_tiled: true,
            }],
            preferred_mode: Some(0),
            is_laptop_panel: false,
            is_primary: false,
            suggested_position: None,
            panel_transform: Transform::Normal,
            width_mm: None,
            height_mm: None,
            scale_override: None,
        }
    }

    #[test]
    fn test_tile_positions_normal() {
        let outputs = tiled_outputs();
        let monitor = tiled_monitor(&outputs);
        let mode = &monitor.modes[0];

        let positions: Vec<_> = outputs
            .iter()
            .map(|o| monitor.calculate_crtc_pos(mode, o, &outputs, Transform::Normal))
            .collect();
        assert_eq!(positions, vec![(0, 0), (1920, 0), (0, 1080), (1920, 1080)]);
    }

    #[test]
    fn test_tile_positions_rotated() {
        let outputs = tiled_outputs();
        let monitor = tiled_monitor(&outputs);
        let mode = &monitor.modes[0];

        let positions: Vec<_> = outputs
            .iter()
            .map(|o| monitor.calculate_crtc_pos(mode, o, &outputs, Transform::Rotate90))
            .collect();
        assert_eq!(positions, vec![(1080, 0), (1080, 1920), (0, 0), (0, 1920)]);
    }

    #[test]
    fn test_untiled_mode_starts_at_origin() {
        let outputs = tiled_outputs();
        let mut monitor = tiled_monitor(&outputs);
        monitor.modes[0].is_tiled = false;
        let mode = monitor.modes[0].clone();
        assert_eq!(
            monitor.calculate_crtc_pos(&mode, &outputs[3], &outputs, Transform::Normal),
            (0, 0)
        );
    }

    #[test]
    fn test_crtc_transform_support() {
        let crtc = Crtc::without_transforms(CrtcId(1));
        assert!(crtc.supports_transform(Transform::Normal));
        assert!(!crtc.supports_transform(Transform::Rotate90));
        assert!(Crtc::new(CrtcId(2)).supports_transform(Transform::Flipped270));
    }

    #[test]
    fn test_preferred_mode_lookup() {
        let outputs = tiled_outputs();
        let monitor = tiled_monitor(&outputs);
        assert_eq!(monitor.preferred_area(), 3840 * 2160);
        assert!(monitor
            .mode_from_spec(&MonitorModeSpec::new(3840, 2160, 60.0))
            .is_some());
        assert!(monitor.mode_with_resolution(1920, 1080).is_none());
    }
}
