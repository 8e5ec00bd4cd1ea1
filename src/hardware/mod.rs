//! Hardware Backend Contract
//!
//! The configuration engine never talks to DRM or X11 itself. A backend
//! reports the current hardware through [`MonitorBackend`] and programs the
//! CRTC/output assignments the engine computes.
//!
//! # Flow
//!
//! ```text
//! MonitorBackend::monitors()/outputs()/crtcs()
//!        │
//!        ▼
//! generators + verifier ──▶ crtc::assign() ──▶ MonitorBackend::apply()
//! ```

use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod crtc;
pub mod model;
pub mod virtual_backend;

pub use crtc::{assign, AssignmentPlan, CrtcAssignment, OutputAssignment};
pub use model::{
    Crtc, CrtcId, CrtcMode, CrtcModeId, Monitor, MonitorCrtcMode, MonitorMode, Output, OutputId,
    TileInfo,
};
pub use virtual_backend::{HardwareDescription, VirtualBackend};

use crate::multimon::types::{LayoutMode, MonitorSpec, Transform};

/// Backend capability bits
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// All logical monitors must share one scale
    GlobalScaleRequired,
    /// Logical layout mode is available
    LayoutMode,
    /// Outputs can mirror each other
    Mirroring,
}

/// Failure reported by the backend while programming hardware
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Hardware refused the assignment
    #[error("Hardware rejected the assignment: {0}")]
    Rejected(String),

    /// Referenced object vanished (hotplug during apply)
    #[error("Unknown {kind} {id}")]
    UnknownObject {
        /// Object kind ("crtc", "output", "mode")
        kind: &'static str,
        /// Object id
        id: u32,
    },
}

/// Live hardware state and the one mutating operation, `apply`
pub trait MonitorBackend {
    /// Connected monitors (`enumerate_monitors`)
    fn monitors(&self) -> &[Monitor];

    /// All outputs
    fn outputs(&self) -> &[Output];

    /// All CRTCs
    fn crtcs(&self) -> &[Crtc];

    /// All CRTC modes
    fn crtc_modes(&self) -> &[CrtcMode];

    /// Whether the laptop lid is closed
    fn is_lid_closed(&self) -> bool;

    /// Orientation reported by the accelerometer, if managed (`get_panel_orientation`)
    fn panel_orientation(&self) -> Option<Transform>;

    /// Capability bits
    fn capabilities(&self) -> BitFlags<Capability>;

    /// Scale to use for `monitor` in `mode`
    fn calculate_scale(&self, layout_mode: LayoutMode, monitor: &Monitor, mode: &MonitorMode) -> f32;

    /// Program the hardware; an empty assignment turns everything off
    fn apply(
        &mut self,
        crtc_assignments: &[CrtcAssignment],
        output_assignments: &[OutputAssignment],
    ) -> Result<(), BackendError>;

    /// Monitor with the given identity
    fn monitor_from_spec(&self, spec: &MonitorSpec) -> Option<&Monitor> {
        self.monitors().iter().find(|monitor| &monitor.spec == spec)
    }

    /// Output by id
    fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs().iter().find(|output| output.id == id)
    }

    /// CRTC by id
    fn crtc(&self, id: CrtcId) -> Option<&Crtc> {
        self.crtcs().iter().find(|crtc| crtc.id == id)
    }

    /// CRTC mode by id
    fn crtc_mode(&self, id: CrtcModeId) -> Option<&CrtcMode> {
        self.crtc_modes().iter().find(|mode| mode.id == id)
    }

    /// Built-in panel, if any
    fn laptop_panel(&self) -> Option<&Monitor> {
        self.monitors().iter().find(|monitor| monitor.is_laptop_panel)
    }

    /// Whether `monitor` can light up; a panel behind a closed lid cannot
    fn is_monitor_active(&self, monitor: &Monitor) -> bool {
        !(monitor.is_laptop_panel && self.is_lid_closed())
    }

    /// Hardware-reported primary monitor, if any
    fn primary_monitor(&self) -> Option<&Monitor> {
        self.monitors().iter().find(|monitor| monitor.is_primary)
    }
}
