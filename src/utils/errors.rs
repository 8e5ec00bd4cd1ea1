//! User-Friendly Error Formatting
//!
//! Turns engine errors into messages with troubleshooting hints for the
//! command-line tool.

use std::fmt::Write;

use crate::hardware::BackendError;
use crate::multimon::{ConfigError, VerificationError};
use crate::store::legacy::MigrationError;
use crate::store::ParseError;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// What went wrong, as far as hints are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Document,
    Migration,
    Arrangement,
    Hardware,
    Settings,
    Other,
}

fn classify(error: &anyhow::Error) -> ErrorKind {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return match e {
                ConfigError::VerificationFailed(_) | ConfigError::Layout(_) => {
                    ErrorKind::Arrangement
                }
                ConfigError::Parse(_) => ErrorKind::Document,
                ConfigError::Migration(_) => ErrorKind::Migration,
                ConfigError::BackendRejected(_) | ConfigError::ResourceExhausted(_) => {
                    ErrorKind::Hardware
                }
                _ => ErrorKind::Other,
            };
        }
        if cause.is::<MigrationError>() {
            return ErrorKind::Migration;
        }
        if cause.is::<ParseError>() {
            return ErrorKind::Document;
        }
        if cause.is::<VerificationError>() {
            return ErrorKind::Arrangement;
        }
        if cause.is::<BackendError>() {
            return ErrorKind::Hardware;
        }
        if cause.is::<toml::de::Error>() {
            return ErrorKind::Settings;
        }
    }

    if error.to_string().contains("config file") {
        ErrorKind::Settings
    } else {
        ErrorKind::Other
    }
}

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "╔════════════════════════════════════════════════════════════╗"
    )
    .ok();
    writeln!(
        &mut output,
        "║                     ERROR                                  ║"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();
    writeln!(&mut output).ok();

    match classify(error) {
        ErrorKind::Document => format_document_error(&mut output),
        ErrorKind::Migration => format_migration_error(&mut output),
        ErrorKind::Arrangement => format_arrangement_error(&mut output),
        ErrorKind::Hardware => format_hardware_error(&mut output),
        ErrorKind::Settings => format_settings_error(&mut output),
        ErrorKind::Other => format_generic_error(&mut output, &error.to_string()),
    }

    writeln!(&mut output).ok();
    writeln!(&mut output, "{}", RULE).ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "{:#}", error).ok();
    writeln!(&mut output).ok();

    writeln!(&mut output, "{}", RULE).ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(
        &mut output,
        "  - Run with --verbose for detailed logs: lamco-display-config -vv"
    )
    .ok();
    writeln!(
        &mut output,
        "  - Report issues: https://github.com/lamco-admin/lamco-display-config/issues"
    )
    .ok();

    output
}

fn format_document_error(output: &mut String) {
    writeln!(output, "Monitor Configuration File Error").ok();
    writeln!(output).ok();
    writeln!(output, "Could not read the stored monitor configuration.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. monitors.xml was edited by hand").ok();
    writeln!(output, "     → Check the markup is well formed").ok();
    writeln!(
        output,
        "     → Every <monitor> needs <monitorspec> and <mode>"
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "  2. <policy> in the user file").ok();
    writeln!(
        output,
        "     → Policies are only read from $XDG_CONFIG_DIRS/monitors.xml"
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "  3. Unknown document version").ok();
    writeln!(output, "     → Only versions 1 and 2 are understood").ok();
}

fn format_migration_error(output: &mut String) {
    writeln!(output, "Legacy Configuration Migration Error").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "A version 1 monitors.xml could not be converted to the current format."
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Outputs without vendor, product or serial").ok();
    writeln!(output, "     → Such outputs cannot be matched to monitors").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Incomplete tiled monitor").ok();
    writeln!(output, "     → Every tile must be listed with the same transform").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "The original file is kept as monitors-v1-backup.xml next to monitors.xml."
    )
    .ok();
}

fn format_arrangement_error(output: &mut String) {
    writeln!(output, "Invalid Monitor Arrangement").ok();
    writeln!(output).ok();
    writeln!(output, "The requested layout was rejected.").ok();
    writeln!(output).ok();
    writeln!(output, "Requirements:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Exactly one primary logical monitor").ok();
    writeln!(output, "  2. Monitors must touch and must not overlap").ok();
    writeln!(output, "  3. The top-left monitor must be at (0, 0)").ok();
    writeln!(output, "  4. Sizes must match the mode, transform and scale").ok();
}

fn format_hardware_error(output: &mut String) {
    writeln!(output, "Hardware Error").ok();
    writeln!(output).ok();
    writeln!(output, "The configuration cannot be driven by this hardware.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. More monitors than CRTCs").ok();
    writeln!(output, "     → Disable a monitor or use mirroring").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Mode or transform not supported").ok();
    writeln!(output, "     → Pick a mode listed for the connector").ok();
}

fn format_settings_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with the settings file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Unknown values").ok();
    writeln!(
        output,
        "     → layout_mode must be auto, logical or physical"
    )
    .ok();
    writeln!(output, "     → format must be pretty, compact or json").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Display Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
}
