//! Monitors Configuration Verifier
//!
//! Pure checks of every arrangement invariant. Checks run in a fixed order
//! and stop at the first failure.

use enumflags2::BitFlags;
use std::collections::VecDeque;

use crate::hardware::Capability;
use crate::multimon::error::VerificationError;
use crate::multimon::geometry::{self, Rectangle};
use crate::multimon::monitors_config::MonitorsConfig;

/// Verify a configuration against the hardware capabilities
pub fn verify(
    config: &MonitorsConfig,
    capabilities: BitFlags<Capability>,
) -> Result<(), VerificationError> {
    let logical_monitors = &config.logical_monitor_configs;

    for logical_monitor in logical_monitors {
        logical_monitor.verify(config.layout_mode)?;
    }

    if capabilities.contains(Capability::GlobalScaleRequired) {
        for pair in logical_monitors.windows(2) {
            if pair[0].scale != pair[1].scale {
                return Err(VerificationError::ScaleMismatch {
                    previous: pair[0].scale,
                    current: pair[1].scale,
                });
            }
        }
    }

    let mut region: Vec<Rectangle> = Vec::with_capacity(logical_monitors.len());
    for logical_monitor in logical_monitors {
        if geometry::overlaps_region(&region, &logical_monitor.layout) {
            return Err(VerificationError::Overlap);
        }
        region.push(logical_monitor.layout);
    }

    match logical_monitors.iter().filter(|lm| lm.is_primary).count() {
        0 => return Err(VerificationError::MissingPrimary),
        1 => {}
        _ => return Err(VerificationError::MultiplePrimary),
    }

    if !is_connected(&region) {
        return Err(VerificationError::Disconnected);
    }

    let min_x = region.iter().map(|rect| rect.x).min().unwrap_or(0);
    let min_y = region.iter().map(|rect| rect.y).min().unwrap_or(0);
    if min_x != 0 || min_y != 0 {
        return Err(VerificationError::NonZeroOrigin { x: min_x, y: min_y });
    }

    if let Some(spec) = config
        .disabled_monitor_specs
        .iter()
        .find(|spec| config.has_enabled_monitor(spec))
    {
        return Err(VerificationError::DisabledConflict(spec.clone()));
    }

    Ok(())
}

/// Whether every rectangle is reachable from the first through shared edges
pub fn is_connected(rects: &[Rectangle]) -> bool {
    if rects.is_empty() {
        return true;
    }

    let mut visited = vec![false; rects.len()];
    let mut queue = VecDeque::from([0usize]);
    visited[0] = true;

    while let Some(current) = queue.pop_front() {
        for (index, rect) in rects.iter().enumerate() {
            if !visited[index] && geometry::is_adjacent(&rects[current], rect) {
                visited[index] = true;
                queue.push_back(index);
            }
        }
    }

    visited.into_iter().all(|v| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::logical::LogicalMonitorConfig;
    use crate::multimon::types::{LayoutMode, MonitorConfig, MonitorModeSpec, MonitorSpec, Transform};

    fn spec(connector: &str) -> MonitorSpec {
        MonitorSpec::new(connector, "MetaProduct's Inc.", "MetaMonitor", "0x123456")
    }

    fn lm(connector: &str, x: i32, y: i32, primary: bool) -> LogicalMonitorConfig {
        let mut lm = LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(spec(connector), MonitorModeSpec::new(1920, 1080, 60.0)),
            x,
            y,
            Transform::Normal,
            1.0,
            LayoutMode::Physical,
        );
        lm.is_primary = primary;
        lm
    }

    fn config(lms: Vec<LogicalMonitorConfig>) -> MonitorsConfig {
        MonitorsConfig::new(lms, vec![], LayoutMode::Physical, BitFlags::empty())
    }

    #[test]
    fn test_valid_side_by_side() {
        let config = config(vec![lm("DP-1", 0, 0, true), lm("DP-2", 1920, 0, false)]);
        assert_eq!(verify(&config, BitFlags::empty()), Ok(()));
    }

    #[test]
    fn test_overlap_by_one_unit_rejected() {
        let config = config(vec![lm("DP-1", 0, 0, true), lm("DP-2", 1919, 0, false)]);
        assert_eq!(verify(&config, BitFlags::empty()), Err(VerificationError::Overlap));
    }

    #[test]
    fn test_two_primaries_rejected() {
        let config = config(vec![lm("DP-1", 0, 0, true), lm("DP-2", 1920, 0, true)]);
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::MultiplePrimary)
        );
    }

    #[test]
    fn test_missing_primary_rejected() {
        let config = config(vec![lm("DP-1", 0, 0, false), lm("DP-2", 1920, 0, false)]);
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::MissingPrimary)
        );
    }

    #[test]
    fn test_offset_origin_rejected() {
        let config = config(vec![lm("DP-1", 1, 0, true)]);
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::NonZeroOrigin { x: 1, y: 0 })
        );
    }

    #[test]
    fn test_disconnected_rejected() {
        let config = config(vec![lm("DP-1", 0, 0, true), lm("DP-2", 1921, 0, false)]);
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::Disconnected)
        );
    }

    #[test]
    fn test_connectivity_is_transitive() {
        // DP-3 only touches DP-2, which touches DP-1
        let config = config(vec![
            lm("DP-1", 0, 0, true),
            lm("DP-3", 3840, 0, false),
            lm("DP-2", 1920, 0, false),
        ]);
        assert_eq!(verify(&config, BitFlags::empty()), Ok(()));
    }

    #[test]
    fn test_mode_size_mismatch_rejected() {
        let mut bad = lm("DP-1", 0, 0, true);
        bad.layout.width = 1280;
        let config = config(vec![bad]);
        assert!(matches!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_rotated_mode_mismatch_rejected() {
        let mut rotated = lm("DP-1", 0, 0, true);
        rotated.transform = Transform::Rotate90;
        let config = config(vec![rotated]);
        assert!(matches!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_global_scale_required() {
        let mut second = lm("DP-2", 1920, 0, false);
        second.scale = 2.0;
        second.layout.width = 960;
        second.layout.height = 540;
        let mut config = config(vec![lm("DP-1", 0, 0, true), second]);
        config.layout_mode = LayoutMode::Logical;

        assert_eq!(verify(&config, BitFlags::empty()), Ok(()));
        assert!(matches!(
            verify(&config, Capability::GlobalScaleRequired.into()),
            Err(VerificationError::ScaleMismatch { .. })
        ));
    }

    #[test]
    fn test_disabled_conflict_rejected() {
        let config = MonitorsConfig::new(
            vec![lm("DP-1", 0, 0, true)],
            vec![spec("DP-1")],
            LayoutMode::Physical,
            BitFlags::empty(),
        );
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::DisabledConflict(spec("DP-1")))
        );
    }

    #[test]
    fn test_empty_config_has_no_primary() {
        let config = config(vec![]);
        assert_eq!(
            verify(&config, BitFlags::empty()),
            Err(VerificationError::MissingPrimary)
        );
    }
}
