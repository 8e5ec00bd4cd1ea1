//! Configuration Store
//!
//! Persistent map of monitor configurations keyed by [`MonitorsConfigKey`].
//!
//! # Sources
//!
//! - `<dir>/monitors.xml` for each system config directory (read-only,
//!   first existing file only, may carry a `<policy>`)
//! - `$XDG_CONFIG_HOME/monitors.xml` (read/write)
//!
//! A version 1 user file is migrated on load and backed up as
//! `monitors-v1-backup.xml`. Every mutation rewrites the user file; the
//! write runs as a tokio task that the next save aborts.

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod convert;
pub mod error;
pub mod legacy;
pub mod parser;
pub mod writer;

pub use convert::convert_to_logical;
pub use error::ParseError;
pub use parser::{parse, ParseOptions, ParsedDocument};
pub use writer::to_xml;

use crate::hardware::Capability;
use crate::multimon::monitors_config::{ConfigFlag, MonitorsConfig, MonitorsConfigKey};

/// File name inside every config directory
pub const MONITORS_FILE_NAME: &str = "monitors.xml";

/// Default system config directory list
const DEFAULT_SYSTEM_DIRS: &str = "/etc/xdg";

/// Configuration source named by a store policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// System-wide file
    System,
    /// Per-user file
    User,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::System => f.write_str("system"),
            StoreKind::User => f.write_str("user"),
        }
    }
}

/// Which sources are honored, in priority order, and whether D-Bus may
/// reconfigure monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePolicy {
    /// Sources in priority order; `None` means every source, user first
    pub stores: Option<Vec<StoreKind>>,
    /// Whether `apply_monitors_config` requests are honored
    pub enable_dbus: bool,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            stores: None,
            enable_dbus: true,
        }
    }
}

impl fmt::Display for StorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stores: Vec<String> = self
            .stores
            .iter()
            .flatten()
            .map(ToString::to_string)
            .collect();
        match self.stores {
            Some(_) => write!(f, "stores [{}]", stores.join(", "))?,
            None => f.write_str("stores [user, system]")?,
        }
        write!(f, ", dbus {}", if self.enable_dbus { "yes" } else { "no" })
    }
}

impl StorePolicy {
    /// Whether configurations from `kind` are loaded
    pub fn includes(&self, kind: StoreKind) -> bool {
        self.stores
            .as_ref()
            .map_or(true, |stores| stores.contains(&kind))
    }

    /// Sources from highest to lowest priority
    pub fn priority(&self) -> Vec<StoreKind> {
        self.stores
            .clone()
            .unwrap_or_else(|| vec![StoreKind::User, StoreKind::System])
    }
}

/// Where the store reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePaths {
    /// User file, `None` when no config directory is known
    pub user_file: Option<PathBuf>,
    /// System config directories, in lookup order; see [`StorePaths::system_file`]
    pub system_dirs: Vec<PathBuf>,
}

impl StorePaths {
    /// Paths from `$XDG_CONFIG_HOME` and `$XDG_CONFIG_DIRS`
    pub fn from_env() -> Self {
        let system_dirs = std::env::var("XDG_CONFIG_DIRS")
            .ok()
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_DIRS.to_string());

        Self {
            user_file: dirs::config_dir().map(|dir| dir.join(MONITORS_FILE_NAME)),
            system_dirs: split_dirs(&system_dirs),
        }
    }

    /// First existing system file
    ///
    /// Only one system file is read: the directory listed first wins and
    /// files in later directories are ignored, the way `$XDG_CONFIG_DIRS`
    /// lookups shadow by precedence.
    pub fn system_file(&self) -> Option<PathBuf> {
        self.system_dirs
            .iter()
            .map(|dir| dir.join(MONITORS_FILE_NAME))
            .find(|path| path.is_file())
    }
}

fn split_dirs(list: &str) -> Vec<PathBuf> {
    list.split(':')
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Persistent configuration map
pub struct ConfigStore {
    configs: HashMap<MonitorsConfigKey, Arc<MonitorsConfig>>,
    paths: StorePaths,
    policy: StorePolicy,
    capabilities: BitFlags<Capability>,
    custom_read: Option<PathBuf>,
    custom_write: Option<PathBuf>,
    save_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("configs", &self.configs.len())
            .field("paths", &self.paths)
            .field("policy", &self.policy)
            .field("custom_read", &self.custom_read)
            .field("custom_write", &self.custom_write)
            .finish()
    }
}

impl ConfigStore {
    /// Empty store; call [`load`](Self::load) to read the files
    pub fn new(paths: StorePaths, capabilities: BitFlags<Capability>) -> Self {
        Self {
            configs: HashMap::new(),
            paths,
            policy: StorePolicy::default(),
            capabilities,
            custom_read: None,
            custom_write: None,
            save_task: None,
        }
    }

    /// Read the system and user files
    ///
    /// A document that fails to parse is logged and skipped; the other
    /// source still loads.
    pub fn load(&mut self) {
        self.configs.clear();
        self.policy = StorePolicy::default();

        let mut system = Vec::new();
        if let Some(path) = self.paths.system_file() {
            let options = ParseOptions {
                flags: ConfigFlag::SystemConfig.into(),
                allow_policy: true,
                capabilities: self.capabilities,
            };
            match read_document(&path, options) {
                Ok(document) => {
                    if let Some(policy) = document.policy {
                        info!("Monitor store policy from {:?}: {:?}", path, policy);
                        self.policy = policy;
                    }
                    system = document.configs;
                }
                Err(ParseError::NeedsMigration) => {
                    warn!("System monitor configuration {:?} uses the legacy format, ignoring", path)
                }
                Err(e) => warn!("Failed to load system monitor configuration {:?}: {}", path, e),
            }
        }

        let mut user = Vec::new();
        let mut needs_save = false;
        if self.policy.includes(StoreKind::User) {
            if let Some(path) = self.paths.user_file.clone().filter(|path| path.is_file()) {
                match self.read_user_file(&path) {
                    Ok((configs, rewrite)) => {
                        user = configs;
                        needs_save = rewrite;
                    }
                    Err(e) => warn!("Failed to load user monitor configuration {:?}: {}", path, e),
                }
            }
        }

        for kind in self.policy.priority().into_iter().rev() {
            let configs = match kind {
                StoreKind::System => std::mem::take(&mut system),
                StoreKind::User => std::mem::take(&mut user),
            };
            for config in configs {
                self.configs.insert(config.key().clone(), Arc::new(config));
            }
        }

        info!("Loaded {} monitor configuration(s)", self.configs.len());

        if needs_save {
            self.save();
        }
    }

    fn read_user_file(&self, path: &Path) -> Result<(Vec<MonitorsConfig>, bool), ParseError> {
        let options = ParseOptions {
            flags: BitFlags::empty(),
            allow_policy: false,
            capabilities: self.capabilities,
        };

        match read_document(path, options) {
            Ok(document) => Ok((document.configs, document.needs_rewrite)),
            Err(ParseError::NeedsMigration) => {
                info!("Migrating legacy monitor configuration {:?}", path);
                if let Err(e) = legacy::backup_legacy_file(path) {
                    warn!("Failed to back up legacy monitor configuration: {}", e);
                }
                match legacy::migrate_file(path, self.capabilities) {
                    Ok(configs) => Ok((configs, true)),
                    Err(e) => {
                        warn!("Legacy migration failed: {}", e);
                        Ok((Vec::new(), false))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the contents with a single file (tests and tooling)
    ///
    /// Without `write`, mutations stay in memory.
    pub fn set_custom(
        &mut self,
        read: &Path,
        write: Option<&Path>,
        flags: BitFlags<ConfigFlag>,
    ) -> Result<(), ParseError> {
        self.abort_save();
        self.custom_read = Some(read.to_path_buf());
        self.custom_write = write.map(Path::to_path_buf);
        self.configs.clear();
        self.policy = StorePolicy::default();

        let options = ParseOptions {
            flags,
            allow_policy: flags.contains(ConfigFlag::SystemConfig),
            capabilities: self.capabilities,
        };
        let document = read_document(read, options)?;

        if let Some(policy) = document.policy {
            self.policy = policy;
        }
        for config in document.configs {
            self.configs.insert(config.key().clone(), Arc::new(config));
        }

        debug!("Custom monitor store {:?} holds {} configuration(s)", read, self.configs.len());
        Ok(())
    }

    /// Configuration stored under `key`
    pub fn lookup(&self, key: &MonitorsConfigKey) -> Option<Arc<MonitorsConfig>> {
        self.configs.get(key).cloned()
    }

    /// Insert or replace by key and persist
    pub fn add(&mut self, config: Arc<MonitorsConfig>) {
        let is_system = config.is_system_config();
        debug!("Storing monitor configuration {}", config.key());
        self.configs.insert(config.key().clone(), config);

        if !is_system {
            self.save();
        }
    }

    /// Remove by key and persist
    pub fn remove(&mut self, key: &MonitorsConfigKey) -> Option<Arc<MonitorsConfig>> {
        let removed = self.configs.remove(key);
        if removed.is_some() {
            debug!("Removed monitor configuration {}", key);
            self.save();
        }
        removed
    }

    /// Active policy
    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Number of stored configurations
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Stored configurations in no particular order
    pub fn configs(&self) -> impl Iterator<Item = &Arc<MonitorsConfig>> {
        self.configs.values()
    }

    /// File mutations are written to, if any
    pub fn write_path(&self) -> Option<&Path> {
        if self.custom_read.is_some() {
            return self.custom_write.as_deref();
        }
        if !self.policy.includes(StoreKind::User) {
            return None;
        }
        self.paths.user_file.as_deref()
    }

    /// Current contents as a version 2 document
    pub fn to_xml(&self) -> String {
        writer::to_xml(self.configs.values().map(|config| config.as_ref()))
    }

    /// Persist in the background, cancelling any pending write
    ///
    /// Runs synchronously when called outside a tokio runtime.
    pub fn save(&mut self) {
        let Some(path) = self.write_path().map(Path::to_path_buf) else {
            debug!("Monitor store has no writable file, not saving");
            return;
        };
        let xml = self.to_xml();

        self.abort_save();
        match Handle::try_current() {
            Ok(handle) => {
                self.save_task = Some(handle.spawn(async move {
                    if let Err(e) = write_atomic_async(&path, xml).await {
                        warn!("Failed to save monitor configuration to {:?}: {}", path, e);
                    }
                }));
            }
            Err(_) => {
                if let Err(e) = write_atomic(&path, &xml) {
                    warn!("Failed to save monitor configuration to {:?}: {}", path, e);
                }
            }
        }
    }

    /// Persist now, blocking the caller
    pub fn save_sync(&mut self) -> std::io::Result<()> {
        self.abort_save();
        match self.write_path() {
            Some(path) => write_atomic(path, &self.to_xml()),
            None => Ok(()),
        }
    }

    /// Wait for a pending background save
    pub async fn flush(&mut self) {
        if let Some(task) = self.save_task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Monitor store save task failed: {}", e);
                }
            }
        }
    }

    fn abort_save(&mut self) {
        if let Some(task) = self.save_task.take() {
            task.abort();
        }
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.abort_save();
    }
}

fn read_document(path: &Path, options: ParseOptions) -> Result<ParsedDocument, ParseError> {
    let xml = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&xml, options)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, xml: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = temp_path(path);
    fs::write(&temp, xml)?;
    fs::rename(&temp, path)?;
    debug!("Saved monitor configuration to {:?}", path);
    Ok(())
}

async fn write_atomic_async(path: &Path, xml: String) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = temp_path(path);
    tokio::fs::write(&temp, xml).await?;
    tokio::fs::rename(&temp, path).await?;
    debug!("Saved monitor configuration to {:?}", path);
    Ok(())
}
