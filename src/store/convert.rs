//! Physical to Logical Layout Conversion
//!
//! Older files describe HiDPI arrangements in physical pixels. Converting
//! them to logical layout mode shrinks every scaled logical monitor, which
//! opens gaps or overlaps. The strategies below try to restore a connected
//! arrangement, from the least to the most invasive:
//!
//! 1. nudge each scale (within [`SCALE_TOLERANCE`]) so sizes stay integral
//! 2. re-pack a single horizontal row, then a single vertical column
//! 3. re-pack both sides of a shared horizontal, then vertical, edge
//! 4. lay everything end to end
//!
//! Every candidate is normalized to (0, 0) and must verify.

use enumflags2::BitFlags;
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::hardware::Capability;
use crate::multimon::geometry::Rectangle;
use crate::multimon::layout::normalize_origin;
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::MonitorsConfig;
use crate::multimon::types::LayoutMode;
use crate::multimon::verify::verify;

/// Maximum distance between the stored and the adjusted scale
pub const SCALE_TOLERANCE: f32 = 0.1;

type Strategy = fn(&[Rectangle], &mut [LogicalMonitorConfig]) -> bool;

/// Logical layout mode equivalent of a physical configuration
///
/// Returns `None` when no strategy yields a verifiable configuration.
pub fn convert_to_logical(
    config: &MonitorsConfig,
    capabilities: BitFlags<Capability>,
) -> Option<MonitorsConfig> {
    if config.layout_mode != LayoutMode::Physical {
        return None;
    }

    let physical: Vec<Rectangle> = config
        .logical_monitor_configs
        .iter()
        .map(|lm| lm.layout)
        .collect();

    let mut rescaled = Vec::with_capacity(physical.len());
    for logical_monitor in &config.logical_monitor_configs {
        rescaled.push(rescale(logical_monitor)?);
    }

    let strategies: [(&str, Strategy); 6] = [
        ("rescale", keep_scaled_positions),
        ("horizontal line", horizontal_line),
        ("vertical line", vertical_line),
        ("horizontal baseline", horizontal_baseline),
        ("vertical baseline", vertical_baseline),
        ("end to end", end_to_end),
    ];

    for (name, strategy) in strategies {
        let mut candidate = rescaled.clone();
        if !strategy(&physical, &mut candidate) {
            continue;
        }
        normalize_origin(&mut candidate);

        let converted = MonitorsConfig::new(
            candidate,
            config.disabled_monitor_specs.clone(),
            LayoutMode::Logical,
            config.flags,
        )
        .with_switch_config(config.switch_config);

        match verify(&converted, capabilities) {
            Ok(()) => {
                info!("Converted {} to logical layout mode ({})", config.key(), name);
                return Some(converted);
            }
            Err(e) => debug!("Conversion strategy '{}' rejected: {}", name, e),
        }
    }

    None
}

/// Copy with a scale that divides the physical size into whole pixels
fn rescale(logical_monitor: &LogicalMonitorConfig) -> Option<LogicalMonitorConfig> {
    let width = logical_monitor.layout.width;
    let height = logical_monitor.layout.height;
    let scale = closest_integral_scale(width, height, logical_monitor.scale)?;

    let mut rescaled = logical_monitor.clone();
    rescaled.scale = scale;
    rescaled.derive_layout(LayoutMode::Logical).ok()?;
    rescaled.layout.x = (logical_monitor.layout.x as f32 / scale).round() as i32;
    rescaled.layout.y = (logical_monitor.layout.y as f32 / scale).round() as i32;

    Some(rescaled)
}

/// Scale nearest to `scale` giving an integral logical size
pub fn closest_integral_scale(width: i32, height: i32, scale: f32) -> Option<f32> {
    if width <= 0 || height <= 0 || scale <= 0.0 {
        return None;
    }
    if divides_evenly(width, height, scale) {
        return Some(scale);
    }

    let min_scale = (scale - SCALE_TOLERANCE).max(f32::EPSILON);
    let max_scale = scale + SCALE_TOLERANCE;
    let min_width = (width as f32 / max_scale).ceil() as i32;
    let max_width = (width as f32 / min_scale).floor() as i32;

    (min_width.max(1)..=max_width)
        .map(|logical_width| width as f32 / logical_width as f32)
        .filter(|candidate| (candidate - scale).abs() <= SCALE_TOLERANCE)
        .filter(|candidate| divides_evenly(width, height, *candidate))
        .min_by(|a, b| {
            (a - scale)
                .abs()
                .partial_cmp(&(b - scale).abs())
                .unwrap_or(Ordering::Equal)
        })
}

fn divides_evenly(width: i32, height: i32, scale: f32) -> bool {
    let scaled_width = width as f32 / scale;
    let scaled_height = height as f32 / scale;
    scaled_width.fract() == 0.0 && scaled_height.fract() == 0.0
}

fn keep_scaled_positions(_physical: &[Rectangle], _logical: &mut [LogicalMonitorConfig]) -> bool {
    true
}

fn sorted_by<F>(physical: &[Rectangle], key: F) -> Vec<usize>
where
    F: Fn(&Rectangle) -> (i32, i32),
{
    let mut order: Vec<usize> = (0..physical.len()).collect();
    order.sort_by_key(|index| key(&physical[*index]));
    order
}

fn horizontal_line(physical: &[Rectangle], logical: &mut [LogicalMonitorConfig]) -> bool {
    let disjoint = physical.iter().enumerate().all(|(i, a)| {
        physical[i + 1..]
            .iter()
            .all(|b| a.right() <= b.x || b.right() <= a.x)
    });
    if !disjoint {
        return false;
    }

    pack_row(&sorted_by(physical, |r| (r.x, r.y)), logical, 0);
    true
}

fn vertical_line(physical: &[Rectangle], logical: &mut [LogicalMonitorConfig]) -> bool {
    let disjoint = physical.iter().enumerate().all(|(i, a)| {
        physical[i + 1..]
            .iter()
            .all(|b| a.bottom() <= b.y || b.bottom() <= a.y)
    });
    if !disjoint {
        return false;
    }

    pack_column(&sorted_by(physical, |r| (r.y, r.x)), logical, 0);
    true
}

fn horizontal_baseline(physical: &[Rectangle], logical: &mut [LogicalMonitorConfig]) -> bool {
    let Some(baseline) = physical
        .iter()
        .map(|r| r.bottom())
        .find(|line| physical.iter().all(|r| r.bottom() == *line || r.y == *line))
    else {
        return false;
    };

    let order = sorted_by(physical, |r| (r.x, r.y));
    let (above, below): (Vec<usize>, Vec<usize>) = order
        .into_iter()
        .partition(|index| physical[*index].bottom() == baseline);
    if above.is_empty() || below.is_empty() {
        return false;
    }

    pack_row(&above, logical, 0);
    for index in &above {
        logical[*index].layout.y = -logical[*index].layout.height;
    }
    pack_row(&below, logical, 0);
    true
}

fn vertical_baseline(physical: &[Rectangle], logical: &mut [LogicalMonitorConfig]) -> bool {
    let Some(baseline) = physical
        .iter()
        .map(|r| r.right())
        .find(|line| physical.iter().all(|r| r.right() == *line || r.x == *line))
    else {
        return false;
    };

    let order = sorted_by(physical, |r| (r.y, r.x));
    let (left, right): (Vec<usize>, Vec<usize>) = order
        .into_iter()
        .partition(|index| physical[*index].right() == baseline);
    if left.is_empty() || right.is_empty() {
        return false;
    }

    pack_column(&left, logical, 0);
    for index in &left {
        logical[*index].layout.x = -logical[*index].layout.width;
    }
    pack_column(&right, logical, 0);
    true
}

fn end_to_end(physical: &[Rectangle], logical: &mut [LogicalMonitorConfig]) -> bool {
    pack_row(&sorted_by(physical, |r| (r.x, r.y)), logical, 0);
    true
}

/// Place `order` left to right on `y`
fn pack_row(order: &[usize], logical: &mut [LogicalMonitorConfig], y: i32) {
    let mut x = 0;
    for index in order {
        let layout = &mut logical[*index].layout;
        layout.x = x;
        layout.y = y;
        x += layout.width;
    }
}

/// Place `order` top to bottom on `x`
fn pack_column(order: &[usize], logical: &mut [LogicalMonitorConfig], x: i32) {
    let mut y = 0;
    for index in order {
        let layout = &mut logical[*index].layout;
        layout.x = x;
        layout.y = y;
        y += layout.height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::types::{MonitorConfig, MonitorModeSpec, MonitorSpec, Transform};

    fn lm(connector: &str, width: i32, height: i32, x: i32, y: i32, scale: f32) -> LogicalMonitorConfig {
        LogicalMonitorConfig::for_monitor(
            MonitorConfig::new(
                MonitorSpec::new(connector, "MetaProduct's Inc.", "MetaMonitor", "0x123456"),
                MonitorModeSpec::new(width, height, 60.0),
            ),
            x,
            y,
            Transform::Normal,
            scale,
            LayoutMode::Physical,
        )
    }

    fn physical(mut lms: Vec<LogicalMonitorConfig>) -> MonitorsConfig {
        lms[0].is_primary = true;
        MonitorsConfig::new(lms, vec![], LayoutMode::Physical, BitFlags::empty())
    }

    fn layouts(config: &MonitorsConfig) -> Vec<Rectangle> {
        config.logical_monitor_configs.iter().map(|lm| lm.layout).collect()
    }

    #[test]
    fn test_uniform_scale_keeps_positions() {
        let config = physical(vec![
            lm("DP-1", 3840, 2160, 0, 0, 2.0),
            lm("DP-2", 3840, 2160, 3840, 0, 2.0),
        ]);
        let converted = convert_to_logical(&config, BitFlags::empty()).unwrap();

        assert_eq!(converted.layout_mode, LayoutMode::Logical);
        assert_eq!(
            layouts(&converted),
            vec![Rectangle::new(0, 0, 1920, 1080), Rectangle::new(1920, 0, 1920, 1080)]
        );
    }

    #[test]
    fn test_mixed_scales_horizontal_line() {
        let config = physical(vec![
            lm("eDP-1", 3840, 2160, 0, 0, 2.0),
            lm("DP-1", 1920, 1080, 3840, 0, 1.0),
        ]);
        let converted = convert_to_logical(&config, BitFlags::empty()).unwrap();

        assert_eq!(
            layouts(&converted),
            vec![Rectangle::new(0, 0, 1920, 1080), Rectangle::new(1920, 0, 1920, 1080)]
        );
        assert_ne!(converted.key(), config.key());
    }

    #[test]
    fn test_mixed_scales_vertical_line() {
        let config = physical(vec![
            lm("DP-1", 1920, 1080, 0, 0, 1.0),
            lm("eDP-1", 3840, 2160, 0, 1080, 2.0),
        ]);
        let converted = convert_to_logical(&config, BitFlags::empty()).unwrap();

        assert_eq!(
            layouts(&converted),
            vec![Rectangle::new(0, 0, 1920, 1080), Rectangle::new(0, 1080, 1920, 1080)]
        );
    }

    #[test]
    fn test_horizontal_baseline() {
        // Two monitors side by side above a third one
        let config = physical(vec![
            lm("DP-1", 1920, 1080, 0, 0, 1.0),
            lm("DP-2", 1920, 1080, 1920, 0, 1.0),
            lm("eDP-1", 3840, 2160, 0, 1080, 2.0),
        ]);
        let converted = convert_to_logical(&config, BitFlags::empty()).unwrap();

        assert_eq!(
            layouts(&converted),
            vec![
                Rectangle::new(0, 0, 1920, 1080),
                Rectangle::new(1920, 0, 1920, 1080),
                Rectangle::new(0, 1080, 1920, 1080),
            ]
        );
    }

    #[test]
    fn test_scale_nudged_to_integral_size() {
        let scale = closest_integral_scale(2560, 1440, 1.3).unwrap();
        assert!((scale - 1.3).abs() <= SCALE_TOLERANCE);
        assert_eq!((2560.0 / scale).fract(), 0.0);
        assert_eq!((1440.0 / scale).fract(), 0.0);

        assert_eq!(closest_integral_scale(1920, 1080, 1.5), Some(1.5));
    }

    #[test]
    fn test_logical_config_not_converted() {
        let mut config = physical(vec![lm("DP-1", 1920, 1080, 0, 0, 1.0)]);
        config.layout_mode = LayoutMode::Logical;
        assert!(convert_to_logical(&config, BitFlags::empty()).is_none());
    }

    #[test]
    fn test_global_scale_requirement_blocks_mixed_scales() {
        let config = physical(vec![
            lm("eDP-1", 3840, 2160, 0, 0, 2.0),
            lm("DP-1", 1920, 1080, 3840, 0, 1.0),
        ]);
        assert!(convert_to_logical(&config, Capability::GlobalScaleRequired.into()).is_none());
    }
}
