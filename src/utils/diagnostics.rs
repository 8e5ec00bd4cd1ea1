//! Hardware Diagnostics
//!
//! Summaries of what a backend reports, for logs and the `plan` command.

use tracing::info;

use crate::hardware::MonitorBackend;

/// Snapshot of the hardware a backend reports
#[derive(Debug, Clone)]
pub struct HardwareSummary {
    /// One line per connected monitor
    pub monitors: Vec<String>,

    /// Number of outputs
    pub output_count: usize,

    /// Number of CRTCs
    pub crtc_count: usize,

    /// Laptop lid state
    pub lid_closed: bool,

    /// Capability names
    pub capabilities: Vec<String>,
}

impl HardwareSummary {
    /// Gather a summary from `backend`
    pub fn gather<B: MonitorBackend + ?Sized>(backend: &B) -> Self {
        let monitors = backend
            .monitors()
            .iter()
            .map(|monitor| {
                let preferred = monitor
                    .preferred_mode()
                    .map(|mode| mode.spec.to_string())
                    .unwrap_or_else(|| "no modes".to_string());
                let mut line = format!("{} ({})", monitor.spec, preferred);
                if monitor.is_laptop_panel {
                    line.push_str(" [builtin]");
                }
                if !backend.is_monitor_active(monitor) {
                    line.push_str(" [lid closed]");
                }
                line
            })
            .collect();

        Self {
            monitors,
            output_count: backend.outputs().len(),
            crtc_count: backend.crtcs().len(),
            lid_closed: backend.is_lid_closed(),
            capabilities: backend
                .capabilities()
                .iter()
                .map(|capability| format!("{:?}", capability))
                .collect(),
        }
    }

    /// Log the summary
    pub fn log(&self) {
        info!("=== Hardware ===");
        info!("  Outputs: {}, CRTCs: {}", self.output_count, self.crtc_count);
        info!("  Lid closed: {}", self.lid_closed);
        info!("  Capabilities: {}", self.capabilities.join(", "));
        for monitor in &self.monitors {
            info!("  Monitor: {}", monitor);
        }
    }
}

/// Log the environment the store paths are derived from
pub fn log_startup_diagnostics() {
    info!("=== Environment ===");
    info!("  OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    for var in ["XDG_CONFIG_HOME", "XDG_CONFIG_DIRS", "XDG_SESSION_TYPE"] {
        match std::env::var(var) {
            Ok(value) => info!("  {}: {}", var, value),
            Err(_) => info!("  {}: (unset)", var),
        }
    }
}
