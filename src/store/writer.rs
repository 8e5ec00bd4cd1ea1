//! monitors.xml Writer
//!
//! Serializes configurations into the canonical version 2 document. Output
//! is deterministic: configurations are sorted by key and optional
//! elements are only written when they differ from their default.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::multimon::logical::LogicalMonitorConfig;
use crate::multimon::monitors_config::MonitorsConfig;
use crate::multimon::types::{ModeFlag, MonitorConfig, MonitorSpec, Transform};
use crate::store::parser::DOCUMENT_VERSION;

type XmlWriter = Writer<Vec<u8>>;
type XmlResult = quick_xml::Result<()>;

/// Render every non-system configuration as a version 2 document
pub fn to_xml<'a, I>(configs: I) -> String
where
    I: IntoIterator<Item = &'a MonitorsConfig>,
{
    let mut configs: Vec<&MonitorsConfig> = configs
        .into_iter()
        .filter(|config| !config.is_system_config())
        .collect();
    configs.sort_by(|a, b| a.key().cmp(b.key()));

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    // Writing into a Vec cannot fail
    let _ = write_document(&mut writer, &configs);

    let mut out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    out.push('\n');
    out
}

fn write_document(writer: &mut XmlWriter, configs: &[&MonitorsConfig]) -> XmlResult {
    let root = BytesStart::new("monitors").with_attributes([("version", DOCUMENT_VERSION)]);
    writer.write_event(Event::Start(root))?;
    for config in configs {
        write_configuration(writer, config)?;
    }
    end(writer, "monitors")
}

fn write_configuration(writer: &mut XmlWriter, config: &MonitorsConfig) -> XmlResult {
    start(writer, "configuration")?;
    if config.is_migrated() {
        writer.write_event(Event::Empty(BytesStart::new("migrated")))?;
    }
    text_element(writer, "layoutmode", config.layout_mode.as_str())?;

    for logical_monitor in &config.logical_monitor_configs {
        write_logical_monitor(writer, logical_monitor)?;
    }

    if !config.disabled_monitor_specs.is_empty() {
        start(writer, "disabled")?;
        for spec in &config.disabled_monitor_specs {
            write_monitor_spec(writer, spec)?;
        }
        end(writer, "disabled")?;
    }

    end(writer, "configuration")
}

fn write_logical_monitor(writer: &mut XmlWriter, lm: &LogicalMonitorConfig) -> XmlResult {
    start(writer, "logicalmonitor")?;
    text_element(writer, "x", &lm.layout.x.to_string())?;
    text_element(writer, "y", &lm.layout.y.to_string())?;
    text_element(writer, "scale", &lm.scale.to_string())?;
    if lm.is_primary {
        text_element(writer, "primary", "yes")?;
    }
    if lm.is_presentation {
        text_element(writer, "presentation", "yes")?;
    }
    if lm.transform != Transform::Normal {
        start(writer, "transform")?;
        text_element(writer, "rotation", rotation_name(lm.transform))?;
        text_element(
            writer,
            "flipped",
            if lm.transform.is_flipped() { "yes" } else { "no" },
        )?;
        end(writer, "transform")?;
    }

    for monitor_config in &lm.monitor_configs {
        write_monitor(writer, monitor_config)?;
    }

    end(writer, "logicalmonitor")
}

fn write_monitor(writer: &mut XmlWriter, config: &MonitorConfig) -> XmlResult {
    let mode = &config.mode_spec;

    start(writer, "monitor")?;
    write_monitor_spec(writer, &config.monitor_spec)?;
    start(writer, "mode")?;
    text_element(writer, "width", &mode.width.to_string())?;
    text_element(writer, "height", &mode.height.to_string())?;
    text_element(writer, "rate", &format!("{:.3}", mode.refresh_rate))?;
    if mode.flags.contains(ModeFlag::Interlace) {
        text_element(writer, "flag", "interlace")?;
    }
    end(writer, "mode")?;
    if config.enable_underscanning {
        text_element(writer, "underscanning", "yes")?;
    }
    if let Some(max_bpc) = config.max_bpc {
        text_element(writer, "maxbpc", &max_bpc.to_string())?;
    }
    end(writer, "monitor")
}

fn write_monitor_spec(writer: &mut XmlWriter, spec: &MonitorSpec) -> XmlResult {
    start(writer, "monitorspec")?;
    text_element(writer, "connector", &spec.connector)?;
    text_element(writer, "vendor", &spec.vendor)?;
    text_element(writer, "product", &spec.product)?;
    text_element(writer, "serial", &spec.serial)?;
    end(writer, "monitorspec")
}

fn start(writer: &mut XmlWriter, name: &str) -> XmlResult {
    writer.write_event(Event::Start(BytesStart::new(name)))
}

fn end(writer: &mut XmlWriter, name: &str) -> XmlResult {
    writer.write_event(Event::End(BytesEnd::new(name)))
}

/// `<name>text</name>` on one line, text escaped
fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> XmlResult {
    start(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

fn rotation_name(transform: Transform) -> &'static str {
    match transform.quarter_turns() {
        1 => "left",
        2 => "upside_down",
        3 => "right",
        _ => "normal",
    }
}
