//! monitors.xml Parser
//!
//! Streaming parser for version 2 documents. Each element moves the parser
//! into a new [`State`] pushed on a stack; the end tag pops it and commits
//! whatever the element collected. Elements the current state does not
//! know are skipped together with their children, so files written by
//! newer versions still load.
//!
//! ```xml
//! <monitors version="2">
//!   <configuration>
//!     <layoutmode>logical</layoutmode>
//!     <logicalmonitor>
//!       <x>0</x>
//!       <y>0</y>
//!       <scale>2</scale>
//!       <primary>yes</primary>
//!       <monitor>
//!         <monitorspec>...</monitorspec>
//!         <mode>...</mode>
//!       </monitor>
//!     </logicalmonitor>
//!     <disabled>
//!       <monitorspec>...</monitorspec>
//!     </disabled>
//!   </configuration>
//! </monitors>
//! ```

use enumflags2::BitFlags;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::mem;
use tracing::{debug, warn};

use crate::hardware::Capability;
use crate::multimon::geometry::Rectangle;
use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::{ConfigFlag, MonitorsConfig};
use crate::multimon::types::{
    LayoutMode, ModeFlag, MonitorConfig, MonitorModeSpec, MonitorSpec, Transform,
};
use crate::multimon::verify::verify;
use crate::store::convert::convert_to_logical;
use crate::store::error::ParseError;
use crate::store::{StoreKind, StorePolicy};

/// Current document version
pub const DOCUMENT_VERSION: &str = "2";
/// Version handled by the legacy migrator
pub const LEGACY_VERSION: &str = "1";

/// Per-document parse settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Flags applied to every configuration
    pub flags: BitFlags<ConfigFlag>,
    /// Whether `<policy>` is accepted
    pub allow_policy: bool,
    /// Capabilities used for verification and layout mode detection
    pub capabilities: BitFlags<Capability>,
}

/// Contents of one document
#[derive(Debug, Default)]
pub struct ParsedDocument {
    /// Configurations in document order
    pub configs: Vec<MonitorsConfig>,
    /// Policy, if the document declared one
    pub policy: Option<StorePolicy>,
    /// A configuration was converted and the file should be rewritten
    pub needs_rewrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Monitors,
    Configuration,
    LayoutMode,
    Migrated,
    LogicalMonitor,
    X,
    Y,
    Scale,
    Primary,
    Presentation,
    Transform,
    Rotation,
    Flipped,
    Monitor,
    MonitorSpec,
    Connector,
    Vendor,
    Product,
    Serial,
    Mode,
    Width,
    Height,
    Rate,
    Flag,
    Underscanning,
    MaxBpc,
    Disabled,
    Policy,
    Stores,
    Store,
    Dbus,
}

impl State {
    /// State entered by child `name`, `None` for unknown children
    fn child(self, name: &[u8]) -> Option<State> {
        let next = match (self, name) {
            (State::Monitors, b"configuration") => State::Configuration,
            (State::Monitors, b"policy") => State::Policy,
            (State::Configuration, b"layoutmode") => State::LayoutMode,
            (State::Configuration, b"migrated") => State::Migrated,
            (State::Configuration, b"logicalmonitor") => State::LogicalMonitor,
            (State::Configuration, b"disabled") => State::Disabled,
            (State::LogicalMonitor, b"x") => State::X,
            (State::LogicalMonitor, b"y") => State::Y,
            (State::LogicalMonitor, b"scale") => State::Scale,
            (State::LogicalMonitor, b"primary") => State::Primary,
            (State::LogicalMonitor, b"presentation") => State::Presentation,
            (State::LogicalMonitor, b"transform") => State::Transform,
            (State::LogicalMonitor, b"monitor") => State::Monitor,
            (State::Transform, b"rotation") => State::Rotation,
            (State::Transform, b"flipped") => State::Flipped,
            (State::Monitor, b"monitorspec") => State::MonitorSpec,
            (State::Monitor, b"mode") => State::Mode,
            (State::Monitor, b"underscanning") => State::Underscanning,
            (State::Monitor, b"maxbpc") => State::MaxBpc,
            (State::Disabled, b"monitorspec") => State::MonitorSpec,
            (State::MonitorSpec, b"connector") => State::Connector,
            (State::MonitorSpec, b"vendor") => State::Vendor,
            (State::MonitorSpec, b"product") => State::Product,
            (State::MonitorSpec, b"serial") => State::Serial,
            (State::Mode, b"width") => State::Width,
            (State::Mode, b"height") => State::Height,
            (State::Mode, b"rate") => State::Rate,
            (State::Mode, b"flag") => State::Flag,
            (State::Policy, b"stores") => State::Stores,
            (State::Policy, b"dbus") => State::Dbus,
            (State::Stores, b"store") => State::Store,
            _ => return None,
        };
        Some(next)
    }
}

#[derive(Debug, Default)]
struct PendingLogicalMonitor {
    x: Option<i32>,
    y: Option<i32>,
    scale: Option<f32>,
    is_primary: bool,
    is_presentation: bool,
    rotation: u8,
    flipped: bool,
    monitor_configs: Vec<MonitorConfig>,
}

#[derive(Debug, Default)]
struct PendingMonitor {
    spec: Option<MonitorSpec>,
    mode: Option<MonitorModeSpec>,
    enable_underscanning: bool,
    max_bpc: Option<u32>,
}

#[derive(Debug, Default)]
struct PendingSpec {
    connector: Option<String>,
    vendor: Option<String>,
    product: Option<String>,
    serial: Option<String>,
}

#[derive(Debug, Default)]
struct PendingMode {
    width: Option<i32>,
    height: Option<i32>,
    rate: Option<f32>,
    flags: BitFlags<ModeFlag>,
}

struct Parser {
    options: ParseOptions,
    stack: Vec<State>,
    unknown_depth: usize,
    text: String,
    document: ParsedDocument,

    layout_mode: Option<LayoutMode>,
    migrated: bool,
    logical_monitors: Vec<LogicalMonitorConfig>,
    disabled: Vec<MonitorSpec>,
    logical_monitor: PendingLogicalMonitor,
    monitor: PendingMonitor,
    spec: PendingSpec,
    mode: PendingMode,
    stores: Vec<StoreKind>,
    enable_dbus: Option<bool>,
}

/// Parse a version 2 document
///
/// # Errors
///
/// Any malformed element, invalid scalar or configuration that fails
/// verification rejects the whole document. Version 1 documents yield
/// [`ParseError::NeedsMigration`].
pub fn parse(xml: &str, options: ParseOptions) -> Result<ParsedDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut parser = Parser::new(options);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => parser.start_element(e)?,
            Ok(Event::Empty(ref e)) => {
                parser.start_element(e)?;
                parser.end_element()?;
            }
            Ok(Event::End(_)) => parser.end_element()?,
            Ok(Event::Text(ref e)) if parser.unknown_depth == 0 => {
                let text = e.unescape().map_err(|e| ParseError::Xml {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })?;
                parser.text.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if parser.stack.len() > 1 {
        return Err(ParseError::Xml {
            position: reader.buffer_position(),
            message: "unexpected end of document".to_string(),
        });
    }

    Ok(parser.document)
}

impl Parser {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            stack: vec![State::Initial],
            unknown_depth: 0,
            text: String::new(),
            document: ParsedDocument::default(),
            layout_mode: None,
            migrated: false,
            logical_monitors: Vec::new(),
            disabled: Vec::new(),
            logical_monitor: PendingLogicalMonitor::default(),
            monitor: PendingMonitor::default(),
            spec: PendingSpec::default(),
            mode: PendingMode::default(),
            stores: Vec::new(),
            enable_dbus: None,
        }
    }

    fn state(&self) -> State {
        self.stack.last().copied().unwrap_or(State::Initial)
    }

    fn start_element(&mut self, e: &BytesStart<'_>) -> Result<(), ParseError> {
        if self.unknown_depth > 0 {
            self.unknown_depth += 1;
            return Ok(());
        }

        let name = e.name();
        let state = self.state();

        if state == State::Initial {
            if name.as_ref() != b"monitors" {
                return Err(ParseError::UnexpectedRoot(
                    String::from_utf8_lossy(name.as_ref()).into_owned(),
                ));
            }
            check_version(e)?;
            self.stack.push(State::Monitors);
            return Ok(());
        }

        match state.child(name.as_ref()) {
            Some(State::Policy) if !self.options.allow_policy => Err(ParseError::PolicyNotAllowed),
            Some(next) => {
                self.text.clear();
                self.stack.push(next);
                Ok(())
            }
            None => {
                debug!(
                    "Skipping unknown element <{}>",
                    String::from_utf8_lossy(name.as_ref())
                );
                self.unknown_depth = 1;
                Ok(())
            }
        }
    }

    fn end_element(&mut self) -> Result<(), ParseError> {
        if self.unknown_depth > 0 {
            self.unknown_depth -= 1;
            return Ok(());
        }

        let Some(state) = self.stack.pop() else {
            return Ok(());
        };
        let text = mem::take(&mut self.text);
        let text = text.trim();

        match state {
            State::Initial | State::Monitors | State::Stores | State::Disabled => {}
            State::Configuration => self.finish_configuration()?,
            State::LayoutMode => {
                let mode = text
                    .parse::<LayoutMode>()
                    .map_err(|_| ParseError::invalid("layoutmode", text))?;
                self.layout_mode = Some(mode);
            }
            State::Migrated => self.migrated = true,
            State::LogicalMonitor => self.finish_logical_monitor()?,
            State::X => self.logical_monitor.x = Some(parse_number("x", text)?),
            State::Y => self.logical_monitor.y = Some(parse_number("y", text)?),
            State::Scale => {
                let scale: f32 = parse_number("scale", text)?;
                if scale <= 0.0 || !scale.is_finite() {
                    return Err(ParseError::invalid("scale", text));
                }
                self.logical_monitor.scale = Some(scale);
            }
            State::Primary => self.logical_monitor.is_primary = parse_bool("primary", text)?,
            State::Presentation => {
                self.logical_monitor.is_presentation = parse_bool("presentation", text)?
            }
            State::Transform => {}
            State::Rotation => self.logical_monitor.rotation = parse_rotation(text)?,
            State::Flipped => self.logical_monitor.flipped = parse_bool("flipped", text)?,
            State::Monitor => self.finish_monitor()?,
            State::MonitorSpec => self.finish_monitor_spec()?,
            State::Connector => self.spec.connector = Some(text.to_string()),
            State::Vendor => self.spec.vendor = Some(text.to_string()),
            State::Product => self.spec.product = Some(text.to_string()),
            State::Serial => self.spec.serial = Some(text.to_string()),
            State::Mode => self.finish_mode()?,
            State::Width => self.mode.width = Some(parse_number("width", text)?),
            State::Height => self.mode.height = Some(parse_number("height", text)?),
            State::Rate => self.mode.rate = Some(parse_number("rate", text)?),
            State::Flag => match text {
                "interlace" => self.mode.flags |= ModeFlag::Interlace,
                other => return Err(ParseError::invalid("flag", other)),
            },
            State::Underscanning => {
                self.monitor.enable_underscanning = parse_bool("underscanning", text)?
            }
            State::MaxBpc => self.monitor.max_bpc = Some(parse_number("maxbpc", text)?),
            State::Policy => {
                self.document.policy = Some(StorePolicy {
                    stores: (!self.stores.is_empty()).then(|| mem::take(&mut self.stores)),
                    enable_dbus: self.enable_dbus.take().unwrap_or(true),
                });
            }
            State::Store => {
                let kind = match text {
                    "system" => StoreKind::System,
                    "user" => StoreKind::User,
                    other => return Err(ParseError::invalid("store", other)),
                };
                if self.stores.contains(&kind) {
                    return Err(ParseError::invalid("store", text));
                }
                self.stores.push(kind);
            }
            State::Dbus => self.enable_dbus = Some(parse_bool("dbus", text)?),
        }

        Ok(())
    }

    fn finish_monitor_spec(&mut self) -> Result<(), ParseError> {
        let pending = mem::take(&mut self.spec);
        let spec = MonitorSpec::new(
            pending.connector.ok_or(ParseError::MissingElement("connector"))?,
            pending.vendor.ok_or(ParseError::MissingElement("vendor"))?,
            pending.product.ok_or(ParseError::MissingElement("product"))?,
            pending.serial.ok_or(ParseError::MissingElement("serial"))?,
        );
        spec.verify()?;

        match self.state() {
            State::Disabled => self.disabled.push(spec),
            _ => self.monitor.spec = Some(spec),
        }
        Ok(())
    }

    fn finish_mode(&mut self) -> Result<(), ParseError> {
        let pending = mem::take(&mut self.mode);
        let mode = MonitorModeSpec::new(
            pending.width.ok_or(ParseError::MissingElement("width"))?,
            pending.height.ok_or(ParseError::MissingElement("height"))?,
            pending.rate.ok_or(ParseError::MissingElement("rate"))?,
        )
        .with_flags(pending.flags);
        mode.verify()?;

        self.monitor.mode = Some(mode);
        Ok(())
    }

    fn finish_monitor(&mut self) -> Result<(), ParseError> {
        let pending = mem::take(&mut self.monitor);
        let mut monitor_config = MonitorConfig::new(
            pending.spec.ok_or(ParseError::MissingElement("monitorspec"))?,
            pending.mode.ok_or(ParseError::MissingElement("mode"))?,
        );
        monitor_config.enable_underscanning = pending.enable_underscanning;
        monitor_config.max_bpc = pending.max_bpc;

        self.logical_monitor.monitor_configs.push(monitor_config);
        Ok(())
    }

    fn finish_logical_monitor(&mut self) -> Result<(), ParseError> {
        let pending = mem::take(&mut self.logical_monitor);
        if pending.monitor_configs.is_empty() {
            return Err(ParseError::MissingElement("monitor"));
        }

        self.logical_monitors.push(LogicalMonitorConfig {
            layout: Rectangle::new(
                pending.x.ok_or(ParseError::MissingElement("x"))?,
                pending.y.ok_or(ParseError::MissingElement("y"))?,
                0,
                0,
            ),
            monitor_configs: pending.monitor_configs,
            transform: Transform::from_parts(pending.rotation, pending.flipped),
            scale: pending.scale.unwrap_or(1.0),
            is_primary: pending.is_primary,
            is_presentation: pending.is_presentation,
        });
        Ok(())
    }

    fn finish_configuration(&mut self) -> Result<(), ParseError> {
        let mut logical_monitors = mem::take(&mut self.logical_monitors);
        let disabled = mem::take(&mut self.disabled);
        let layout_mode = self.layout_mode.take();
        let mut flags = self.options.flags;
        if mem::take(&mut self.migrated) {
            flags |= ConfigFlag::Migrated;
        }

        if logical_monitors.is_empty() {
            return Err(ParseError::MissingElement("logicalmonitor"));
        }
        if !logical_monitors.iter().any(|lm| lm.is_primary) {
            logical_monitors[0].is_primary = true;
        }

        let capabilities = self.options.capabilities;

        if let Some(layout_mode) = layout_mode {
            let config = interpret(logical_monitors, disabled, layout_mode, flags, capabilities)?;
            self.document.configs.push(config);
            return Ok(());
        }

        // No <layoutmode>: keep every interpretation that verifies
        let physical = interpret(
            logical_monitors.clone(),
            disabled.clone(),
            LayoutMode::Physical,
            flags,
            capabilities,
        );
        let logical = if capabilities.contains(Capability::LayoutMode) {
            interpret(logical_monitors, disabled, LayoutMode::Logical, flags, capabilities).ok()
        } else {
            None
        };

        match (physical, logical) {
            (Ok(physical), None) => {
                if capabilities.contains(Capability::LayoutMode) {
                    if let Some(converted) = convert_to_logical(&physical, capabilities) {
                        self.document.configs.push(converted);
                        self.document.needs_rewrite = true;
                    } else {
                        warn!(
                            "Configuration {} has no logical layout equivalent",
                            physical.key()
                        );
                    }
                }
                self.document.configs.push(physical);
            }
            (Ok(physical), Some(logical)) => {
                self.document.configs.push(physical);
                self.document.configs.push(logical);
            }
            (Err(_), Some(logical)) => self.document.configs.push(logical),
            (Err(e), None) => return Err(e),
        }

        Ok(())
    }
}

/// Derive sizes for `layout_mode` and verify
fn interpret(
    mut logical_monitors: Vec<LogicalMonitorConfig>,
    disabled: Vec<MonitorSpec>,
    layout_mode: LayoutMode,
    flags: BitFlags<ConfigFlag>,
    capabilities: BitFlags<Capability>,
) -> Result<MonitorsConfig, ParseError> {
    for logical_monitor in &mut logical_monitors {
        logical_monitor.derive_layout(layout_mode)?;
    }

    let config = MonitorsConfig::new(logical_monitors, disabled, layout_mode, flags);
    verify(&config, capabilities)?;
    Ok(config)
}

fn check_version(e: &BytesStart<'_>) -> Result<(), ParseError> {
    let version = e
        .try_get_attribute("version")
        .map_err(|err| ParseError::Xml {
            position: 0,
            message: err.to_string(),
        })?
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .ok_or_else(|| ParseError::InvalidVersion(String::new()))?;

    match version.as_str() {
        DOCUMENT_VERSION => Ok(()),
        LEGACY_VERSION => Err(ParseError::NeedsMigration),
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

/// Booleans accept `yes`/`no` and `true`/`false`
pub(crate) fn parse_bool(element: &'static str, text: &str) -> Result<bool, ParseError> {
    match text {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(ParseError::invalid(element, other)),
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(
    element: &'static str,
    text: &str,
) -> Result<T, ParseError> {
    text.parse::<T>()
        .map_err(|_| ParseError::invalid(element, text))
}

/// Rotation name to quarter turns
pub(crate) fn parse_rotation(text: &str) -> Result<u8, ParseError> {
    match text {
        "normal" => Ok(0),
        "left" => Ok(1),
        "upside_down" => Ok(2),
        "right" => Ok(3),
        other => Err(ParseError::invalid("rotation", other)),
    }
}
