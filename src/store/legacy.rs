//! Legacy monitors.xml Migration
//!
//! Version 1 files describe outputs rather than monitors: one `<output>`
//! per connector, positions in physical pixels, and tiled monitors split
//! into one output per tile. Migration rebuilds monitor configurations
//! from that description:
//!
//! - outputs sharing an identity that tile a rectangle become one tiled
//!   monitor, named after the tile at the transform's origin corner
//! - outputs with identical rectangles become one clone group
//! - outputs without a size become disabled monitors
//!
//! Migrated configurations carry [`ConfigFlag::Migrated`] and a scale of 1
//! until [`finalize`] resolves scales against the live hardware.

use chrono::Local;
use enumflags2::BitFlags;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hardware::{Capability, MonitorBackend};
use crate::multimon::error::{ConfigError, Result, VerificationError};
use crate::multimon::geometry::{self, Rectangle};
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::{ConfigFlag, MonitorsConfig};
use crate::multimon::types::{LayoutMode, MonitorConfig, MonitorModeSpec, MonitorSpec, Transform};
use crate::multimon::verify::verify;
use crate::store::convert::convert_to_logical;
use crate::store::error::ParseError;
use crate::store::parser::{parse_bool, parse_number, parse_rotation, LEGACY_VERSION};

/// File name the legacy document is copied to after migration
pub const BACKUP_FILE_NAME: &str = "monitors-v1-backup.xml";

/// Legacy migration errors
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Same-identity outputs do not tile a rectangle
    #[error("Outputs do not form a tiled monitor")]
    NotTiled,

    /// No tile sits at the origin corner of a tiled monitor
    #[error("Tiled monitor '{0}' has no main tile")]
    NotMainTile(String),

    /// Malformed document
    #[error("Invalid legacy document: {0}")]
    Parse(#[from] ParseError),

    /// Migrated configuration is not a valid arrangement
    #[error("Migrated configuration invalid: {0}")]
    Invalid(#[from] VerificationError),

    /// No logical layout equivalent for a finalized configuration
    #[error("Configuration {0} cannot be expressed in logical layout mode")]
    Unconvertible(String),

    /// File could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
struct LegacyOutput {
    spec: MonitorSpec,
    rect: Rectangle,
    refresh_rate: f32,
    rotation: u8,
    reflect_x: bool,
    is_primary: bool,
    is_presentation: bool,
    is_underscanning: bool,
}

impl LegacyOutput {
    fn is_enabled(&self) -> bool {
        self.rect.width > 0 && self.rect.height > 0
    }

    fn transform(&self) -> Transform {
        Transform::from_parts(self.rotation, self.reflect_x)
    }

    fn same_identity(&self, other: &LegacyOutput) -> bool {
        self.spec.same_identity(&other.spec)
    }
}

type LegacyConfig = Vec<LegacyOutput>;

/// Migrate a version 1 document
///
/// Configurations that do not migrate cleanly are logged and skipped.
/// Configurations covering the same set of outputs collapse to the last
/// one in the document.
pub fn migrate(
    xml: &str,
    capabilities: BitFlags<Capability>,
) -> std::result::Result<Vec<MonitorsConfig>, MigrationError> {
    let legacy_configs = parse_legacy(xml)?;

    let mut by_outputs: BTreeMap<Vec<MonitorSpec>, LegacyConfig> = BTreeMap::new();
    for config in legacy_configs {
        let mut key: Vec<MonitorSpec> = config.iter().map(|output| output.spec.clone()).collect();
        key.sort();
        by_outputs.insert(key, config);
    }

    let mut migrated = Vec::with_capacity(by_outputs.len());
    for legacy in by_outputs.values() {
        match migrate_config(legacy, capabilities) {
            Ok(config) => {
                debug!("Migrated legacy configuration {}", config.key());
                migrated.push(config);
            }
            Err(e) => warn!("Skipping legacy configuration: {}", e),
        }
    }

    info!("Migrated {} legacy configuration(s)", migrated.len());
    Ok(migrated)
}

/// Read and migrate a version 1 file
pub fn migrate_file(
    path: &Path,
    capabilities: BitFlags<Capability>,
) -> std::result::Result<Vec<MonitorsConfig>, MigrationError> {
    let xml = fs::read_to_string(path).map_err(|source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    migrate(&xml, capabilities)
}

/// Copy the legacy file next to itself as [`BACKUP_FILE_NAME`]
///
/// An existing backup is moved aside under a timestamped name first.
pub fn backup_legacy_file(path: &Path) -> std::io::Result<PathBuf> {
    let backup = path.with_file_name(BACKUP_FILE_NAME);

    if backup.exists() {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let aside = path.with_file_name(format!("monitors-v1-backup-{}.xml", stamp));
        fs::rename(&backup, &aside)?;
        debug!("Moved previous backup to {:?}", aside);
    }

    fs::copy(path, &backup)?;
    info!("Legacy monitor configuration backed up to {:?}", backup);
    Ok(backup)
}

/// Resolve scales of a migrated configuration against live hardware
///
/// Returns a configuration without [`ConfigFlag::Migrated`] in
/// `layout_mode`. Logical layout mode goes through
/// [`convert_to_logical`].
pub fn finalize<B: MonitorBackend + ?Sized>(
    config: &MonitorsConfig,
    backend: &B,
    layout_mode: LayoutMode,
) -> Result<MonitorsConfig> {
    let capabilities = backend.capabilities();
    let mut logical_monitors = config.logical_monitor_configs.clone();

    for logical_monitor in &mut logical_monitors {
        let main = logical_monitor
            .main_monitor_config()
            .ok_or_else(|| ConfigError::ResourceExhausted("Empty logical monitor".to_string()))?;
        let monitor = backend.monitor_from_spec(&main.monitor_spec).ok_or_else(|| {
            ConfigError::ResourceExhausted(format!(
                "Monitor '{}' not connected",
                main.monitor_spec.connector
            ))
        })?;
        let mode = monitor.mode_from_spec(&main.mode_spec).ok_or_else(|| {
            ConfigError::ResourceExhausted(format!(
                "Monitor '{}' has no {}x{} mode",
                main.monitor_spec.connector, main.mode_spec.width, main.mode_spec.height
            ))
        })?;

        logical_monitor.scale = backend.calculate_scale(layout_mode, monitor, mode);
    }

    if capabilities.contains(Capability::GlobalScaleRequired) {
        let global = logical_monitors
            .iter()
            .find(|lm| lm.is_primary)
            .or(logical_monitors.first())
            .map(|lm| lm.scale)
            .unwrap_or(1.0);
        for logical_monitor in &mut logical_monitors {
            logical_monitor.scale = global;
        }
    }

    let physical = MonitorsConfig::new(
        logical_monitors,
        config.disabled_monitor_specs.clone(),
        LayoutMode::Physical,
        config.flags & !ConfigFlag::Migrated,
    );

    let finalized = match layout_mode {
        LayoutMode::Physical => physical,
        LayoutMode::Logical => convert_to_logical(&physical, capabilities).ok_or_else(|| {
            MigrationError::Unconvertible(physical.key().to_string())
        })?,
    };

    verify(&finalized, capabilities)?;
    Ok(finalized)
}

fn migrate_config(
    legacy: &LegacyConfig,
    capabilities: BitFlags<Capability>,
) -> std::result::Result<MonitorsConfig, MigrationError> {
    let enabled: Vec<&LegacyOutput> = legacy.iter().filter(|output| output.is_enabled()).collect();

    let mut consumed = vec![false; enabled.len()];
    let mut untiled = vec![false; enabled.len()];
    let mut monitors: Vec<(Rectangle, &LegacyOutput, MonitorConfig)> = Vec::new();

    for index in 0..enabled.len() {
        if consumed[index] {
            continue;
        }
        let output = enabled[index];

        let tiles: Vec<usize> = (index..enabled.len())
            .filter(|other| {
                !consumed[*other] && !untiled[*other] && enabled[*other].same_identity(output)
            })
            .collect();

        if tiles.len() >= 2 && output.spec.has_known_identity() {
            let members: Vec<&LegacyOutput> = tiles.iter().map(|tile| enabled[*tile]).collect();
            match derive_tiled(&members) {
                Ok((origin, bounds)) => {
                    for tile in &tiles {
                        consumed[*tile] = true;
                    }
                    monitors.push((bounds, origin, monitor_config(origin, &bounds)));
                    continue;
                }
                Err(e) => {
                    debug!("{}: {}; migrating tiles as separate monitors", output.spec.connector, e);
                    for tile in &tiles {
                        untiled[*tile] = true;
                    }
                }
            }
        }

        consumed[index] = true;
        monitors.push((output.rect, output, monitor_config(output, &output.rect)));
    }

    let mut logical_monitors: Vec<LogicalMonitorConfig> = Vec::new();
    for (rect, output, monitor_config) in monitors {
        match logical_monitors.iter_mut().find(|lm| lm.layout == rect) {
            Some(clone_group) => {
                clone_group.monitor_configs.push(monitor_config);
                clone_group.is_primary |= output.is_primary;
                clone_group.is_presentation |= output.is_presentation;
            }
            None => logical_monitors.push(LogicalMonitorConfig {
                layout: rect,
                monitor_configs: vec![monitor_config],
                transform: output.transform(),
                scale: 1.0,
                is_primary: output.is_primary,
                is_presentation: output.is_presentation,
            }),
        }
    }

    let mut seen_primary = false;
    for logical_monitor in &mut logical_monitors {
        logical_monitor.is_primary &= !seen_primary;
        seen_primary |= logical_monitor.is_primary;
    }
    if !seen_primary {
        if let Some(first) = logical_monitors.first_mut() {
            first.is_primary = true;
        }
    }

    let disabled: Vec<MonitorSpec> = legacy
        .iter()
        .filter(|output| !output.is_enabled() && output.spec.verify().is_ok())
        .map(|output| output.spec.clone())
        .collect();

    let config = MonitorsConfig::new(
        logical_monitors,
        disabled,
        LayoutMode::Physical,
        ConfigFlag::Migrated.into(),
    );
    verify(&config, capabilities)?;
    Ok(config)
}

/// Mode sized to `rect`, un-rotated into mode space
fn monitor_config(output: &LegacyOutput, rect: &Rectangle) -> MonitorConfig {
    let (width, height) = if output.transform().is_rotated() {
        (rect.height, rect.width)
    } else {
        (rect.width, rect.height)
    };

    let mut config = MonitorConfig::new(
        output.spec.clone(),
        MonitorModeSpec::new(width, height, output.refresh_rate),
    );
    config.enable_underscanning = output.is_underscanning;
    config
}

/// Origin tile and bounding box of same-identity outputs
fn derive_tiled<'o>(
    tiles: &[&'o LegacyOutput],
) -> std::result::Result<(&'o LegacyOutput, Rectangle), MigrationError> {
    let bounds = geometry::bounding_box(tiles.iter().map(|tile| &tile.rect))
        .ok_or(MigrationError::NotTiled)?;
    let transform = tiles[0].transform();

    // Tile (0, 0) lands in this corner after the transform is applied
    let at_origin = |tile: &LegacyOutput| match transform.quarter_turns() {
        0 => tile.rect.x == bounds.x && tile.rect.y == bounds.y,
        1 => tile.rect.x == bounds.x && tile.rect.bottom() == bounds.bottom(),
        2 => tile.rect.right() == bounds.right() && tile.rect.bottom() == bounds.bottom(),
        _ => tile.rect.right() == bounds.right() && tile.rect.y == bounds.y,
    };
    let origin = tiles
        .iter()
        .copied()
        .find(|tile| at_origin(tile))
        .ok_or_else(|| MigrationError::NotMainTile(tiles[0].spec.connector.clone()))?;

    let covered: i64 = tiles.iter().map(|tile| tile.rect.area()).sum();
    let overlapping = tiles.iter().enumerate().any(|(i, a)| {
        tiles[i + 1..]
            .iter()
            .any(|b| geometry::overlaps(&a.rect, &b.rect))
    });
    if covered != bounds.area()
        || overlapping
        || tiles.iter().any(|tile| tile.transform() != transform)
    {
        return Err(MigrationError::NotTiled);
    }

    Ok((origin, bounds))
}

fn parse_legacy(xml: &str) -> std::result::Result<Vec<LegacyConfig>, MigrationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut configs = Vec::new();
    let mut seen_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"monitors" => {
                check_legacy_version(e)?;
                seen_root = true;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"configuration" => {
                configs.push(parse_configuration(&mut reader)?);
            }
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                skip_element(&mut reader, &name)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e).into()),
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ParseError::MissingElement("monitors").into());
    }

    Ok(configs)
}

fn parse_configuration(
    reader: &mut Reader<&[u8]>,
) -> std::result::Result<LegacyConfig, MigrationError> {
    let mut outputs = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"output" => {
                let connector = output_name(e)?;
                outputs.push(parse_output(reader, connector)?);
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"output" => {
                let mut output = LegacyOutput::default();
                output.spec.connector = output_name(e)?;
                outputs.push(output);
            }
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                skip_element(reader, &name)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"configuration" => break,
            Ok(Event::Eof) => {
                return Err(ParseError::Xml {
                    position: reader.buffer_position(),
                    message: "unexpected EOF in configuration".to_string(),
                }
                .into())
            }
            Err(e) => return Err(xml_error(reader, e).into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(outputs)
}

fn parse_output(
    reader: &mut Reader<&[u8]>,
    connector: String,
) -> std::result::Result<LegacyOutput, MigrationError> {
    let mut output = LegacyOutput::default();
    output.spec.connector = connector;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                let text = read_text(reader, &name)?;
                apply_field(&mut output, &name, text.trim())?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"output" => break,
            Ok(Event::Eof) => {
                return Err(ParseError::Xml {
                    position: reader.buffer_position(),
                    message: "unexpected EOF in output".to_string(),
                }
                .into())
            }
            Err(e) => return Err(xml_error(reader, e).into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(output)
}

fn apply_field(
    output: &mut LegacyOutput,
    name: &[u8],
    text: &str,
) -> std::result::Result<(), ParseError> {
    match name {
        b"vendor" => output.spec.vendor = text.to_string(),
        b"product" => output.spec.product = text.to_string(),
        b"serial" => output.spec.serial = text.to_string(),
        b"width" => output.rect.width = parse_number("width", text)?,
        b"height" => output.rect.height = parse_number("height", text)?,
        b"rate" => output.refresh_rate = parse_number("rate", text)?,
        b"x" => output.rect.x = parse_number("x", text)?,
        b"y" => output.rect.y = parse_number("y", text)?,
        b"rotation" => output.rotation = parse_rotation(text)?,
        b"reflect_x" => output.reflect_x = parse_bool("reflect_x", text)?,
        b"primary" => output.is_primary = parse_bool("primary", text)?,
        b"presentation" => output.is_presentation = parse_bool("presentation", text)?,
        b"underscanning" => output.is_underscanning = parse_bool("underscanning", text)?,
        other => debug!(
            "Ignoring legacy output field <{}>",
            String::from_utf8_lossy(other)
        ),
    }
    Ok(())
}

fn check_legacy_version(e: &BytesStart<'_>) -> std::result::Result<(), ParseError> {
    let version = e
        .try_get_attribute("version")
        .ok()
        .flatten()
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .unwrap_or_default();

    if version == LEGACY_VERSION {
        Ok(())
    } else {
        Err(ParseError::InvalidVersion(version))
    }
}

fn output_name(e: &BytesStart<'_>) -> std::result::Result<String, ParseError> {
    e.try_get_attribute("name")
        .ok()
        .flatten()
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .ok_or(ParseError::MissingElement("name"))
}

fn read_text(reader: &mut Reader<&[u8]>, name: &[u8]) -> std::result::Result<String, ParseError> {
    let raw = reader
        .read_text(QName(name))
        .map_err(|e| xml_error(reader, e))?;
    let text = quick_xml::escape::unescape(&raw).map_err(|e| ParseError::Xml {
        position: reader.buffer_position(),
        message: e.to_string(),
    })?;
    Ok(text.into_owned())
}

fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> std::result::Result<(), ParseError> {
    reader
        .read_to_end(QName(name))
        .map(|_| ())
        .map_err(|e| xml_error(reader, e))
}

fn xml_error(reader: &Reader<&[u8]>, e: quick_xml::Error) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::virtual_backend::{MonitorDescription, VirtualBackend};

    fn output(name: &str, x: i32, y: i32, width: i32, height: i32, extra: &str) -> String {
        format!(
            "<output name=\"{}\"><vendor>MetaProduct&apos;s Inc.</vendor>\
             <product>MetaMonitor</product><serial>{}</serial><width>{}</width>\
             <height>{}</height><rate>60</rate><x>{}</x><y>{}</y>{}</output>",
            name, name, width, height, x, y, extra
        )
    }

    fn tile(name: &str, x: i32, y: i32, extra: &str) -> String {
        format!(
            "<output name=\"{}\"><vendor>Tiler</vendor><product>T1</product>\
             <serial>0xT</serial><width>1920</width><height>2160</height><rate>60</rate>\
             <x>{}</x><y>{}</y>{}</output>",
            name, x, y, extra
        )
    }

    fn document(configs: &[String]) -> String {
        let body: String = configs
            .iter()
            .map(|outputs| format!("<configuration><clone>no</clone>{}</configuration>", outputs))
            .collect();
        format!("<monitors version=\"1\">{}</monitors>", body)
    }

    fn caps() -> BitFlags<Capability> {
        Capability::LayoutMode | Capability::Mirroring
    }

    #[test]
    fn test_two_outputs() {
        let xml = document(&[format!(
            "{}{}",
            output("eDP-1", 0, 0, 1920, 1080, "<primary>no</primary>"),
            output("DP-1", 1920, 0, 1280, 1024, "<primary>yes</primary>")
        )]);
        let configs = migrate(&xml, caps()).unwrap();

        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert!(config.is_migrated());
        assert_eq!(config.layout_mode, LayoutMode::Physical);
        assert_eq!(config.logical_monitor_configs.len(), 2);
        assert!(!config.logical_monitor_configs[0].is_primary);
        assert!(config.logical_monitor_configs[1].is_primary);
        assert_eq!(config.logical_monitor_configs[0].monitor_configs[0].monitor_spec.vendor, "MetaProduct's Inc.");
    }

    #[test]
    fn test_rotated_output_mode_unrotated() {
        let xml = document(&[output("DP-1", 0, 0, 1080, 1920, "<rotation>left</rotation>")]);
        let config = &migrate(&xml, caps()).unwrap()[0];

        let lm = &config.logical_monitor_configs[0];
        assert_eq!(lm.transform, Transform::Rotate90);
        assert_eq!(lm.layout, Rectangle::new(0, 0, 1080, 1920));
        let mode = lm.monitor_configs[0].mode_spec;
        assert_eq!((mode.width, mode.height), (1920, 1080));
        // No primary in the document: promoted
        assert!(lm.is_primary);
    }

    #[test]
    fn test_disabled_and_clone_group() {
        let xml = document(&[format!(
            "{}{}<output name=\"HDMI-1\"><vendor>V</vendor><product>P</product>\
             <serial>S</serial></output><output name=\"VGA-1\"/>",
            output("eDP-1", 0, 0, 1920, 1080, "<presentation>yes</presentation>"),
            output("DP-1", 0, 0, 1920, 1080, "<underscanning>yes</underscanning>")
        )]);
        let config = &migrate(&xml, caps()).unwrap()[0];

        assert_eq!(config.logical_monitor_configs.len(), 1);
        let lm = &config.logical_monitor_configs[0];
        assert_eq!(lm.monitor_configs.len(), 2);
        assert!(lm.is_presentation);
        assert!(lm.monitor_configs[1].enable_underscanning);

        // VGA-1 has no identity and is dropped
        let disabled: Vec<&str> = config
            .disabled_monitor_specs
            .iter()
            .map(|spec| spec.connector.as_str())
            .collect();
        assert_eq!(disabled, vec!["HDMI-1"]);
    }

    #[test]
    fn test_tiled_monitor_normal() {
        let xml = document(&[format!("{}{}", tile("DP-2", 1920, 0, ""), tile("DP-1", 0, 0, ""))]);
        let config = &migrate(&xml, caps()).unwrap()[0];

        assert_eq!(config.logical_monitor_configs.len(), 1);
        let lm = &config.logical_monitor_configs[0];
        assert_eq!(lm.layout, Rectangle::new(0, 0, 3840, 2160));
        let mc = &lm.monitor_configs[0];
        assert_eq!(mc.monitor_spec.connector, "DP-1");
        assert_eq!((mc.mode_spec.width, mc.mode_spec.height), (3840, 2160));
    }

    #[test]
    fn test_tiled_monitor_origin_follows_transform() {
        // Rotated 90: tiles stack vertically, origin tile at the bottom
        let rotated = |name: &str, y: i32| {
            format!(
                "<output name=\"{}\"><vendor>Tiler</vendor><product>T1</product>\
                 <serial>0xT</serial><width>2160</width><height>1920</height><rate>60</rate>\
                 <x>0</x><y>{}</y><rotation>left</rotation></output>",
                name, y
            )
        };
        let xml = document(&[format!("{}{}", rotated("DP-1", 1920), rotated("DP-2", 0))]);
        let config = &migrate(&xml, caps()).unwrap()[0];

        let lm = &config.logical_monitor_configs[0];
        assert_eq!(lm.layout, Rectangle::new(0, 0, 2160, 3840));
        let mc = &lm.monitor_configs[0];
        assert_eq!(mc.monitor_spec.connector, "DP-1");
        assert_eq!((mc.mode_spec.width, mc.mode_spec.height), (3840, 2160));
    }

    #[test]
    fn test_tiled_2x2_origin_for_every_transform() {
        let rotations = ["normal", "left", "upside_down", "right"];
        // Origin tile per quarter turn: top-left, bottom-left, bottom-right, top-right
        let origins = ["DP-1", "DP-3", "DP-4", "DP-2"];

        for transform in Transform::ALL {
            let (width, height) = if transform.is_rotated() { (1080, 1920) } else { (1920, 1080) };
            let at = |name: &str, column: i32, row: i32| {
                format!(
                    "<output name=\"{}\"><vendor>Tiler</vendor><product>T1</product>\
                     <serial>0xT</serial><width>{}</width><height>{}</height><rate>60</rate>\
                     <x>{}</x><y>{}</y><rotation>{}</rotation><reflect_x>{}</reflect_x></output>",
                    name,
                    width,
                    height,
                    column * width,
                    row * height,
                    rotations[transform.quarter_turns() as usize],
                    if transform.is_flipped() { "yes" } else { "no" }
                )
            };
            let xml = document(&[format!(
                "{}{}{}{}",
                at("DP-4", 1, 1),
                at("DP-1", 0, 0),
                at("DP-3", 0, 1),
                at("DP-2", 1, 0)
            )]);
            let configs = migrate(&xml, caps()).unwrap();
            let config = &configs[0];

            assert_eq!(config.logical_monitor_configs.len(), 1, "{:?}", transform);
            let lm = &config.logical_monitor_configs[0];
            assert_eq!(lm.transform, transform);
            assert_eq!(lm.layout, Rectangle::new(0, 0, 2 * width, 2 * height), "{:?}", transform);
            assert_eq!(lm.monitor_configs.len(), 1);

            let mc = &lm.monitor_configs[0];
            assert_eq!(
                mc.monitor_spec.connector,
                origins[transform.quarter_turns() as usize],
                "{:?}",
                transform
            );
            assert_eq!((mc.mode_spec.width, mc.mode_spec.height), (3840, 2160));
        }
    }

    #[test]
    fn test_identical_monitors_not_tiled_when_apart() {
        let twin = |name: &str, x: i32| {
            format!(
                "<output name=\"{}\"><vendor>V</vendor><product>P</product><serial>0</serial>\
                 <width>1920</width><height>1080</height><rate>60</rate><x>{}</x><y>0</y></output>",
                name, x
            )
        };
        // Two identical panels with a clone of one of them: not a tile grid
        let xml = document(&[format!("{}{}{}", twin("DP-1", 0), twin("DP-2", 1920), twin("DP-3", 0))]);
        let config = &migrate(&xml, caps()).unwrap()[0];
        assert_eq!(config.logical_monitor_configs.len(), 2);
        assert_eq!(config.logical_monitor_configs[0].monitor_configs.len(), 2);
    }

    #[test]
    fn test_tile_without_origin_corner() {
        let at = |name: &str, x: i32, y: i32| LegacyOutput {
            spec: MonitorSpec::new(name, "Tiler", "T1", "0xT"),
            rect: Rectangle::new(x, y, 1920, 1080),
            refresh_rate: 60.0,
            ..Default::default()
        };
        let (a, b) = (at("DP-1", 1920, 0), at("DP-2", 0, 1080));
        assert!(matches!(
            derive_tiled(&[&a, &b]),
            Err(MigrationError::NotMainTile(connector)) if connector == "DP-1"
        ));

        let (a, b) = (at("DP-1", 0, 0), at("DP-2", 1920, 1080));
        assert!(matches!(derive_tiled(&[&a, &b]), Err(MigrationError::NotTiled)));
    }

    #[test]
    fn test_last_duplicate_wins_and_invalid_skipped() {
        let first = output("DP-1", 0, 0, 1920, 1080, "");
        let second = output("DP-1", 0, 0, 1280, 1024, "");
        let invalid = format!(
            "{}{}",
            output("eDP-1", 0, 0, 1920, 1080, ""),
            output("HDMI-1", 5000, 0, 1920, 1080, "")
        );
        let configs = migrate(&document(&[first, invalid, second]), caps()).unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].logical_monitor_configs[0].layout.width, 1280);
    }

    #[test]
    fn test_version_checked() {
        let result = migrate("<monitors version=\"2\"></monitors>", caps());
        assert!(matches!(
            result,
            Err(MigrationError::Parse(ParseError::InvalidVersion(v))) if v == "2"
        ));
    }

    #[test]
    fn test_backup_moves_previous_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitors.xml");
        fs::write(&path, "<monitors version=\"1\"/>").unwrap();
        fs::write(dir.path().join(BACKUP_FILE_NAME), "old").unwrap();

        let backup = backup_legacy_file(&path).unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "<monitors version=\"1\"/>");

        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 3);
    }

    fn hidpi_backend() -> VirtualBackend {
        let mut panel = MonitorDescription::new("eDP-1", &[(3840, 2160)]);
        panel.laptop_panel = true;
        panel.width_mm = Some(310);
        panel.height_mm = Some(174);
        let mut external = MonitorDescription::new("DP-1", &[(1920, 1080)]);
        external.width_mm = Some(530);
        external.height_mm = Some(300);

        VirtualBackend::builder()
            .crtcs(2)
            .with_monitor(panel)
            .with_monitor(external)
            .build()
    }

    fn migrated_hidpi() -> MonitorsConfig {
        let xml = document(&[format!(
            "{}{}",
            output("eDP-1", 0, 0, 3840, 2160, "<primary>yes</primary>"),
            output("DP-1", 3840, 0, 1920, 1080, "")
        )
        .replace("<serial>eDP-1</serial>", "<serial>0x123456</serial>")
        .replace("<serial>DP-1</serial>", "<serial>0x123456</serial>")]);
        migrate(&xml, caps()).unwrap().remove(0)
    }

    #[test]
    fn test_finalize_logical() {
        let backend = hidpi_backend();
        let finalized = finalize(&migrated_hidpi(), &backend, LayoutMode::Logical).unwrap();

        assert!(!finalized.is_migrated());
        assert_eq!(finalized.layout_mode, LayoutMode::Logical);
        let layouts: Vec<Rectangle> = finalized
            .logical_monitor_configs
            .iter()
            .map(|lm| lm.layout)
            .collect();
        assert_eq!(
            layouts,
            vec![Rectangle::new(0, 0, 1920, 1080), Rectangle::new(1920, 0, 1920, 1080)]
        );
        assert_eq!(finalized.logical_monitor_configs[0].scale, 2.0);
    }

    #[test]
    fn test_finalize_physical_keeps_positions() {
        let backend = hidpi_backend();
        let finalized = finalize(&migrated_hidpi(), &backend, LayoutMode::Physical).unwrap();

        assert_eq!(finalized.layout_mode, LayoutMode::Physical);
        assert_eq!(finalized.logical_monitor_configs[1].layout.x, 3840);
        assert_eq!(finalized.logical_monitor_configs[0].scale, 2.0);
    }

    #[test]
    fn test_finalize_requires_connected_monitor() {
        let backend = VirtualBackend::builder()
            .crtcs(1)
            .monitor("eDP-1", &[(3840, 2160)])
            .build();
        let result = finalize(&migrated_hidpi(), &backend, LayoutMode::Physical);
        assert!(matches!(result, Err(ConfigError::ResourceExhausted(_))));
    }
}
