//! Monitor identity and mode value types
//!
//! Immutable values that name a physical monitor, one of its display
//! timings, and the binding of the two used inside a logical monitor.

use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::multimon::error::VerificationError;

/// Refresh rates closer than this are treated as the same timing
pub const REFRESH_RATE_TOLERANCE: f32 = 0.001;

/// Identity of one physical monitor
///
/// Ordering compares connector, vendor, product and serial in that order
/// and is the canonical order used by [`MonitorsConfigKey`](super::MonitorsConfigKey).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// Connector name (e.g. "DP-1")
    pub connector: String,
    /// EDID vendor
    pub vendor: String,
    /// EDID product
    pub product: String,
    /// EDID serial
    pub serial: String,
}

impl MonitorSpec {
    /// Create a new monitor spec
    pub fn new(
        connector: impl Into<String>,
        vendor: impl Into<String>,
        product: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            connector: connector.into(),
            vendor: vendor.into(),
            product: product.into(),
            serial: serial.into(),
        }
    }

    /// Check that all identity fields are present
    pub fn verify(&self) -> Result<(), VerificationError> {
        let missing = [
            ("connector", &self.connector),
            ("vendor", &self.vendor),
            ("product", &self.product),
            ("serial", &self.serial),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        match missing {
            Some((field, _)) => Err(VerificationError::InvalidSpec(format!(
                "Monitor spec for '{}' is missing its {}",
                self.connector, field
            ))),
            None => Ok(()),
        }
    }

    /// Whether vendor, product and serial identify a single physical unit
    pub fn has_known_identity(&self) -> bool {
        [&self.vendor, &self.product, &self.serial]
            .iter()
            .all(|value| !value.is_empty() && value.as_str() != "unknown")
    }

    /// Whether two specs describe the same physical unit, ignoring the connector
    pub fn same_identity(&self, other: &MonitorSpec) -> bool {
        self.vendor == other.vendor && self.product == other.product && self.serial == other.serial
    }
}

impl fmt::Display for MonitorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {} {})",
            self.connector, self.vendor, self.product, self.serial
        )
    }
}

/// Mode flag bits
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeFlag {
    /// Interlaced scan-out
    Interlace,
}

/// One display timing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorModeSpec {
    /// Width in physical pixels
    pub width: i32,
    /// Height in physical pixels
    pub height: i32,
    /// Refresh rate in Hz
    pub refresh_rate: f32,
    /// Timing flags
    #[serde(default)]
    pub flags: BitFlags<ModeFlag>,
}

impl MonitorModeSpec {
    /// Create a progressive mode spec
    pub fn new(width: i32, height: i32, refresh_rate: f32) -> Self {
        Self {
            width,
            height,
            refresh_rate,
            flags: BitFlags::empty(),
        }
    }

    /// Same mode with the given flags
    pub fn with_flags(mut self, flags: BitFlags<ModeFlag>) -> Self {
        self.flags = flags;
        self
    }

    /// Check that the timing is usable
    pub fn verify(&self) -> Result<(), VerificationError> {
        if self.width > 0 && self.height > 0 && self.refresh_rate > 0.0 {
            Ok(())
        } else {
            Err(VerificationError::InvalidSpec(format!(
                "Monitor mode {} is invalid",
                self
            )))
        }
    }

    /// Whether the width and height match another mode
    pub fn same_resolution(&self, other: &MonitorModeSpec) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Pixel area
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

impl PartialEq for MonitorModeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.refresh_rate - other.refresh_rate).abs() < REFRESH_RATE_TOLERANCE
            && self.flags == other.flags
    }
}

impl fmt::Display for MonitorModeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{:.3}", self.width, self.height, self.refresh_rate)?;
        if self.flags.contains(ModeFlag::Interlace) {
            write!(f, "i")?;
        }
        Ok(())
    }
}

/// A monitor bound to one of its modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Monitor identity
    pub monitor_spec: MonitorSpec,
    /// Selected mode
    pub mode_spec: MonitorModeSpec,
    /// Overscan compensation
    #[serde(default)]
    pub enable_underscanning: bool,
    /// Upper bound on bits per color channel
    #[serde(default)]
    pub max_bpc: Option<u32>,
}

impl MonitorConfig {
    /// Bind a monitor to a mode with default options
    pub fn new(monitor_spec: MonitorSpec, mode_spec: MonitorModeSpec) -> Self {
        Self {
            monitor_spec,
            mode_spec,
            enable_underscanning: false,
            max_bpc: None,
        }
    }

    /// Check both the identity and the mode
    pub fn verify(&self) -> Result<(), VerificationError> {
        self.monitor_spec.verify()?;
        self.mode_spec.verify()
    }
}

/// Rotation with optional horizontal flip
///
/// Rotations are counter-clockwise; flipped transforms mirror first and
/// rotate afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    /// Identity
    #[default]
    Normal,
    /// 90 degrees
    Rotate90,
    /// 180 degrees
    Rotate180,
    /// 270 degrees
    Rotate270,
    /// Mirrored
    Flipped,
    /// Mirrored, then 90 degrees
    Flipped90,
    /// Mirrored, then 180 degrees
    Flipped180,
    /// Mirrored, then 270 degrees
    Flipped270,
}

impl Transform {
    /// All eight transforms in numeric order
    pub const ALL: [Transform; 8] = [
        Transform::Normal,
        Transform::Rotate90,
        Transform::Rotate180,
        Transform::Rotate270,
        Transform::Flipped,
        Transform::Flipped90,
        Transform::Flipped180,
        Transform::Flipped270,
    ];

    /// Build from quarter turns and a flip bit
    pub fn from_parts(quarter_turns: u8, flipped: bool) -> Self {
        let index = (quarter_turns % 4) as usize + if flipped { 4 } else { 0 };
        Self::ALL[index]
    }

    /// Quarter turns counter-clockwise (0..=3)
    pub fn quarter_turns(self) -> u8 {
        (self as u8) % 4
    }

    /// Whether the transform mirrors
    pub fn is_flipped(self) -> bool {
        (self as u8) >= 4
    }

    /// Whether width and height are exchanged
    pub fn is_rotated(self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    /// Inverse transform
    pub fn invert(self) -> Self {
        match self {
            Transform::Rotate90 => Transform::Rotate270,
            Transform::Rotate270 => Transform::Rotate90,
            other => other,
        }
    }

    /// Apply `other` after `self`
    pub fn then(self, other: Transform) -> Self {
        let base = if other.is_flipped() { self.invert() } else { self };
        let turns = (base.quarter_turns() + other.quarter_turns()) % 4;
        Transform::from_parts(turns, self.is_flipped() != other.is_flipped())
    }

    /// Same transform, one quarter turn further, flip dropped
    pub fn rotated_once(self) -> Self {
        Transform::from_parts(self.quarter_turns() + 1, false)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::Normal => "normal",
            Transform::Rotate90 => "90",
            Transform::Rotate180 => "180",
            Transform::Rotate270 => "270",
            Transform::Flipped => "flipped",
            Transform::Flipped90 => "flipped-90",
            Transform::Flipped180 => "flipped-180",
            Transform::Flipped270 => "flipped-270",
        };
        f.write_str(name)
    }
}

/// Units of logical monitor rectangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Rectangles are physical size divided by scale
    #[default]
    Logical,
    /// Rectangles are physical pixels
    Physical,
}

impl LayoutMode {
    /// Name used by monitors.xml and the settings file
    pub fn as_str(self) -> &'static str {
        match self {
            LayoutMode::Logical => "logical",
            LayoutMode::Physical => "physical",
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logical" => Ok(LayoutMode::Logical),
            "physical" => Ok(LayoutMode::Physical),
            other => Err(format!("Invalid layout mode '{}'", other)),
        }
    }
}
