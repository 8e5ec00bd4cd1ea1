//! lamco-display-config - Display Configuration Tool
//!
//! Entry point for the command-line binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use enumflags2::BitFlags;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_display_config::config::EngineConfig;
use lamco_display_config::hardware::{
    Capability, HardwareDescription, MonitorBackend, VirtualBackend,
};
use lamco_display_config::multimon::{ConfigManager, LayoutMode, MonitorsConfig, SwitchConfigType};
use lamco_display_config::store::{self, legacy, ConfigStore, ParseError, ParseOptions};
use lamco_display_config::utils::{format_user_error, log_startup_diagnostics, HardwareSummary};

/// Command-line arguments for lamco-display-config
#[derive(Parser, Debug)]
#[command(name = "lamco-display-config")]
#[command(version, about = "Monitor configuration planner and monitors.xml tool", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LAMCO_DISPLAY_CONFIG")]
    pub config: Option<String>,

    /// User monitors.xml (overrides the configuration file)
    #[arg(long, env = "LAMCO_MONITORS_FILE")]
    pub monitors_file: Option<PathBuf>,

    /// Layout mode for generated configurations
    #[arg(long)]
    pub layout_mode: Option<LayoutMode>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute the configuration the engine would apply to some hardware
    Plan {
        /// Hardware description (TOML)
        #[arg(long)]
        hardware: PathBuf,

        /// Apply a switch policy instead of the stored/generated configuration
        #[arg(long)]
        switch: Option<SwitchArg>,

        /// Store the result in the user monitors.xml
        #[arg(long)]
        save: bool,
    },

    /// Parse and verify a monitors.xml
    Check {
        /// Document to check
        file: PathBuf,

        /// Treat as a system file (allows <policy>)
        #[arg(long)]
        system: bool,

        /// Hardware description providing capabilities
        #[arg(long)]
        hardware: Option<PathBuf>,
    },

    /// Convert a version 1 monitors.xml to the current format
    Migrate {
        /// Legacy document
        file: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Hardware description providing capabilities
        #[arg(long)]
        hardware: Option<PathBuf>,
    },

    /// Rewrite a monitors.xml in canonical form
    Normalize {
        /// Document to rewrite
        file: PathBuf,

        /// Rewrite the file instead of printing
        #[arg(long)]
        in_place: bool,
    },
}

/// Switch policies selectable from the command line
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SwitchArg {
    /// Every monitor mirrors the same content
    Mirror,
    /// Monitors side by side
    Linear,
    /// External monitors only
    External,
    /// Built-in panel only
    Builtin,
}

impl From<SwitchArg> for SwitchConfigType {
    fn from(arg: SwitchArg) -> Self {
        match arg {
            SwitchArg::Mirror => SwitchConfigType::AllMirror,
            SwitchArg::Linear => SwitchConfigType::AllLinear,
            SwitchArg::External => SwitchConfigType::External,
            SwitchArg::Builtin => SwitchConfigType::Builtin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::default_config(),
    };
    let (config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (EngineConfig::default(), Some(e)),
    };

    init_logging(&args, &config)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-display-config v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("════════════════════════════════════════════════════════");

    log_startup_diagnostics();

    if let Some(e) = load_error {
        warn!("Failed to load config: {:#}, using defaults", e);
    }

    let config = config.with_overrides(args.monitors_file.clone(), args.layout_mode);
    tracing::debug!("Config: {:?}", config);

    if let Err(e) = run(args.command, &config).await {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    Ok(())
}

async fn run(command: Command, config: &EngineConfig) -> Result<()> {
    match command {
        Command::Plan {
            hardware,
            switch,
            save,
        } => plan(config, &hardware, switch, save).await,
        Command::Check {
            file,
            system,
            hardware,
        } => check(&file, system, capabilities(hardware.as_deref())?),
        Command::Migrate {
            file,
            output,
            hardware,
        } => migrate(&file, output.as_deref(), capabilities(hardware.as_deref())?),
        Command::Normalize { file, in_place } => normalize(&file, in_place, capabilities(None)?),
    }
}

fn capabilities(hardware: Option<&Path>) -> Result<BitFlags<Capability>> {
    match hardware {
        Some(path) => Ok(HardwareDescription::load(path)?.build().capabilities()),
        None => Ok(Capability::LayoutMode | Capability::Mirroring),
    }
}

async fn plan(
    config: &EngineConfig,
    hardware: &Path,
    switch: Option<SwitchArg>,
    save: bool,
) -> Result<()> {
    let backend = HardwareDescription::load(hardware)?.build();
    HardwareSummary::gather(&backend).log();

    let mut monitor_store = ConfigStore::new(config.store_paths(), backend.capabilities());
    monitor_store.load();
    info!("Loaded {} stored configurations", monitor_store.len());

    let mut manager = ConfigManager::new(backend, monitor_store, config.manager_settings());
    let applied = match switch {
        Some(switch) => {
            manager.switch_config(switch.into())?;
            manager.current().cloned()
        }
        None => manager.ensure_configured(),
    };
    let applied = applied.context("No configuration could be applied to this hardware")?;

    print_config(&applied);
    print_assignment(manager.backend());

    if save {
        let user_store = manager.store_mut();
        if user_store.write_path().is_none() {
            anyhow::bail!("No writable monitors.xml; set --monitors-file");
        }
        user_store.add(applied);
        user_store.flush().await;
        info!("Saved configuration");
    }

    Ok(())
}

fn check(file: &Path, system: bool, capabilities: BitFlags<Capability>) -> Result<()> {
    let xml = std::fs::read_to_string(file).context(format!("Failed to read {:?}", file))?;
    let options = ParseOptions {
        allow_policy: system,
        capabilities,
        ..ParseOptions::default()
    };

    let document = match store::parse(&xml, options) {
        Err(ParseError::NeedsMigration) => {
            println!("{}: legacy document, run `migrate` to convert it", file.display());
            return Ok(());
        }
        result => result.context(format!("Failed to parse {:?}", file))?,
    };

    println!(
        "{}: {} valid configuration(s)",
        file.display(),
        document.configs.len()
    );
    if let Some(policy) = &document.policy {
        println!("  policy: {}", policy);
    }
    if document.needs_rewrite {
        println!("  physical configurations were converted to logical; `normalize` rewrites them");
    }
    for config in &document.configs {
        print_config(config);
    }

    Ok(())
}

fn migrate(file: &Path, output: Option<&Path>, capabilities: BitFlags<Capability>) -> Result<()> {
    let configs = legacy::migrate_file(file, capabilities)?;
    info!("Migrated {} configurations from {:?}", configs.len(), file);

    let xml = store::to_xml(configs.iter());
    write_or_print(output, &xml)
}

fn normalize(file: &Path, in_place: bool, capabilities: BitFlags<Capability>) -> Result<()> {
    let xml = std::fs::read_to_string(file).context(format!("Failed to read {:?}", file))?;
    let options = ParseOptions {
        capabilities,
        ..ParseOptions::default()
    };
    let document = store::parse(&xml, options)
        .context(format!("Failed to parse {:?}", file))?;

    let normalized = store::to_xml(document.configs.iter());
    write_or_print(in_place.then_some(file), &normalized)
}

fn write_or_print(output: Option<&Path>, xml: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, xml).context(format!("Failed to write {:?}", path))?;
            info!("Wrote {:?}", path);
        }
        None => print!("{}", xml),
    }
    Ok(())
}

fn print_config(config: &MonitorsConfig) {
    println!(
        "{} ({} layout, {})",
        config.key(),
        config.layout_mode,
        config.switch_config
    );
    for logical_monitor in &config.logical_monitor_configs {
        let monitors: Vec<String> = logical_monitor
            .monitor_configs
            .iter()
            .map(|monitor| format!("{} {}", monitor.monitor_spec.connector, monitor.mode_spec))
            .collect();
        println!(
            "  {} scale {} {}{} [{}]",
            logical_monitor.layout,
            logical_monitor.scale,
            logical_monitor.transform,
            if logical_monitor.is_primary { " primary" } else { "" },
            monitors.join(", ")
        );
    }
    for spec in &config.disabled_monitor_specs {
        println!("  disabled: {}", spec);
    }
}

fn print_assignment(backend: &VirtualBackend) {
    let Some(applied) = backend.last_applied() else {
        return;
    };
    for crtc in &applied.crtcs {
        let outputs: Vec<&str> = crtc
            .outputs
            .iter()
            .filter_map(|id| backend.output(*id))
            .map(|output| output.name.as_str())
            .collect();
        let mode = backend
            .crtc_mode(crtc.mode)
            .map(|mode| format!("{}x{}@{:.3}", mode.width, mode.height, mode.refresh_rate))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  crtc {} -> {} {} at {} ({})",
            crtc.crtc.0,
            outputs.join("+"),
            mode,
            crtc.layout,
            crtc.transform
        );
    }
}

fn init_logging(args: &Args, config: &EngineConfig) -> Result<()> {
    use std::fs::File;

    let log_level = match args.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let log_format = args
        .log_format
        .as_deref()
        .unwrap_or(config.logging.format.as_str());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_display_config={level},warn",
            level = log_level
        ))
    });

    let log_file_path = args.log_file.clone().or_else(|| {
        config
            .logging
            .log_dir
            .as_ref()
            .map(|dir| dir.join("lamco-display-config.log"))
    });

    let file_layer = match &log_file_path {
        Some(path) => {
            let file = File::create(path).context(format!("Failed to create log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match log_format {
        "json" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        "compact" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init(),
        _ => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    if let Some(path) = &log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(())
}
