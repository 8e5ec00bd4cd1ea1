use enumflags2::BitFlags;
use lamco_display_config::hardware::Capability;
use lamco_display_config::multimon::{LayoutMode, MonitorSpec, MonitorsConfigKey};
use lamco_display_config::store::{ConfigStore, StoreKind, StorePaths};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const VENDOR: &str = "MetaProduct's Inc.";

fn monitor_xml(connector: &str, width: i32, height: i32) -> String {
    format!(
        "<monitor><monitorspec><connector>{}</connector><vendor>MetaProduct&apos;s Inc.</vendor>\
         <product>MetaMonitor</product><serial>0x123456</serial></monitorspec>\
         <mode><width>{}</width><height>{}</height><rate>60</rate></mode></monitor>",
        connector, width, height
    )
}

fn physical_config(connector: &str, width: i32, height: i32) -> String {
    format!(
        "<configuration><layoutmode>physical</layoutmode><logicalmonitor><x>0</x><y>0</y>\
         <primary>yes</primary>{}</logicalmonitor></configuration>",
        monitor_xml(connector, width, height)
    )
}

fn document(body: &str) -> String {
    format!("<monitors version=\"2\">{}</monitors>", body)
}

struct Fixture {
    dir: TempDir,
    user_file: PathBuf,
    system_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let user_dir = dir.path().join("user");
        let system_dir = dir.path().join("xdg");
        fs::create_dir_all(&user_dir).unwrap();
        fs::create_dir_all(&system_dir).unwrap();

        Self {
            user_file: user_dir.join("monitors.xml"),
            system_dir,
            dir,
        }
    }

    fn write_user(&self, xml: &str) {
        fs::write(&self.user_file, xml).unwrap();
    }

    fn write_system(&self, xml: &str) {
        fs::write(self.system_dir.join("monitors.xml"), xml).unwrap();
    }

    fn store(&self) -> ConfigStore {
        self.store_with_system_dirs(vec![self.system_dir.clone()])
    }

    fn store_with_system_dirs(&self, system_dirs: Vec<PathBuf>) -> ConfigStore {
        let paths = StorePaths {
            user_file: Some(self.user_file.clone()),
            system_dirs,
        };
        let mut store = ConfigStore::new(paths, Capability::LayoutMode | Capability::Mirroring);
        store.load();
        store
    }

    /// Another system directory next to the default one
    fn extra_system_dir(&self, name: &str, xml: Option<&str>) -> PathBuf {
        let dir = self.dir.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(xml) = xml {
            fs::write(dir.join("monitors.xml"), xml).unwrap();
        }
        dir
    }

    fn user_dir(&self) -> &Path {
        self.user_file.parent().unwrap()
    }
}

fn key(connectors: &[&str], layout_mode: LayoutMode) -> MonitorsConfigKey {
    let specs = connectors
        .iter()
        .map(|connector| MonitorSpec::new(*connector, VENDOR, "MetaMonitor", "0x123456"))
        .collect();
    MonitorsConfigKey::new(specs, layout_mode)
}

fn stored_width(store: &ConfigStore, connector: &str) -> i32 {
    let config = store.lookup(&key(&[connector], LayoutMode::Physical)).unwrap();
    config.logical_monitor_configs[0].monitor_configs[0].mode_spec.width
}

#[test]
fn test_user_file_overrides_system_without_policy() {
    let fixture = Fixture::new();
    fixture.write_system(&document(&format!(
        "{}{}",
        physical_config("DP-1", 1920, 1080),
        physical_config("HDMI-1", 1920, 1080)
    )));
    fixture.write_user(&document(&physical_config("DP-1", 1280, 1024)));

    let store = fixture.store();
    assert_eq!(store.len(), 2);
    assert_eq!(stored_width(&store, "DP-1"), 1280);

    let system_only = store.lookup(&key(&["HDMI-1"], LayoutMode::Physical)).unwrap();
    assert!(system_only.is_system_config());
}

#[test]
fn test_policy_first_listed_store_wins() {
    let fixture = Fixture::new();
    fixture.write_system(&document(&format!(
        "<policy><stores><store>system</store><store>user</store></stores></policy>{}",
        physical_config("DP-1", 1920, 1080)
    )));
    fixture.write_user(&document(&physical_config("DP-1", 1280, 1024)));

    let store = fixture.store();
    assert_eq!(
        store.policy().stores,
        Some(vec![StoreKind::System, StoreKind::User])
    );
    assert_eq!(stored_width(&store, "DP-1"), 1920);
}

#[test]
fn test_policy_without_user_store_ignores_user_file() {
    let fixture = Fixture::new();
    fixture.write_system(&document(&format!(
        "<policy><stores><store>system</store></stores><dbus>no</dbus></policy>{}",
        physical_config("DP-1", 1920, 1080)
    )));
    fixture.write_user(&document(&physical_config("HDMI-1", 1280, 1024)));

    let store = fixture.store();
    assert_eq!(store.len(), 1);
    assert!(!store.policy().enable_dbus);
    assert!(store.write_path().is_none());
}

#[test]
fn test_first_listed_system_dir_wins() {
    let fixture = Fixture::new();
    fixture.write_system(&document(&physical_config("DP-1", 1920, 1080)));
    let empty = fixture.extra_system_dir("empty", None);
    let shadowed = fixture.extra_system_dir(
        "shadowed",
        Some(&document(&format!(
            "{}{}",
            physical_config("DP-1", 1280, 1024),
            physical_config("HDMI-1", 1280, 1024)
        ))),
    );

    // Directories without a file are skipped
    let store = fixture.store_with_system_dirs(vec![
        empty.clone(),
        fixture.system_dir.clone(),
        shadowed.clone(),
    ]);
    assert_eq!(store.len(), 1);
    assert_eq!(stored_width(&store, "DP-1"), 1920);
    assert!(store.lookup(&key(&["HDMI-1"], LayoutMode::Physical)).is_none());

    let store = fixture.store_with_system_dirs(vec![shadowed, fixture.system_dir.clone()]);
    assert_eq!(store.len(), 2);
    assert_eq!(stored_width(&store, "DP-1"), 1280);
}

#[test]
fn test_broken_system_file_does_not_block_user_file() {
    let fixture = Fixture::new();
    fixture.write_system("<monitors version=\"2\"><configuration>");
    fixture.write_user(&document(&physical_config("DP-1", 1280, 1024)));

    let store = fixture.store();
    assert_eq!(store.len(), 1);
    assert_eq!(stored_width(&store, "DP-1"), 1280);
}

#[test]
fn test_policy_in_user_file_rejects_document() {
    let fixture = Fixture::new();
    fixture.write_user(&document(&format!(
        "<policy><dbus>no</dbus></policy>{}",
        physical_config("DP-1", 1280, 1024)
    )));

    let store = fixture.store();
    assert!(store.is_empty());
    assert!(store.policy().enable_dbus);
}

#[test]
fn test_legacy_user_file_migrated_and_backed_up() {
    let fixture = Fixture::new();
    let legacy = "<monitors version=\"1\"><configuration><clone>no</clone>\
        <output name=\"DP-1\"><vendor>MetaProduct&apos;s Inc.</vendor>\
        <product>MetaMonitor</product><serial>0x123456</serial><width>1920</width>\
        <height>1080</height><rate>60</rate><x>0</x><y>0</y><primary>yes</primary>\
        </output></configuration></monitors>";
    fixture.write_user(legacy);

    let store = fixture.store();
    let config = store.lookup(&key(&["DP-1"], LayoutMode::Physical)).unwrap();
    assert!(config.is_migrated());

    let backup = fixture.user_dir().join("monitors-v1-backup.xml");
    assert_eq!(fs::read_to_string(backup).unwrap(), legacy);

    // Rewritten in the current format, migrated flag preserved
    let rewritten = fs::read_to_string(&fixture.user_file).unwrap();
    assert!(rewritten.starts_with("<monitors version=\"2\">"));
    assert!(rewritten.contains("<migrated/>"));

    let reloaded = fixture.store();
    assert!(reloaded
        .lookup(&key(&["DP-1"], LayoutMode::Physical))
        .unwrap()
        .is_migrated());
}

#[test]
fn test_physical_only_document_rewritten_as_logical() {
    let fixture = Fixture::new();
    fixture.write_user(&document(&format!(
        "<configuration>\
         <logicalmonitor><x>0</x><y>0</y><scale>2</scale><primary>yes</primary>{}</logicalmonitor>\
         <logicalmonitor><x>3840</x><y>0</y><scale>1</scale>{}</logicalmonitor>\
         </configuration>",
        monitor_xml("eDP-1", 3840, 2160),
        monitor_xml("DP-1", 1920, 1080)
    )));

    let store = fixture.store();
    assert!(store
        .lookup(&key(&["eDP-1", "DP-1"], LayoutMode::Logical))
        .is_some());

    let rewritten = fs::read_to_string(&fixture.user_file).unwrap();
    assert!(rewritten.contains("<layoutmode>logical</layoutmode>"));
}

#[test]
fn test_remove_persists() {
    let fixture = Fixture::new();
    fixture.write_user(&document(&format!(
        "{}{}",
        physical_config("DP-1", 1920, 1080),
        physical_config("HDMI-1", 1920, 1080)
    )));

    let mut store = fixture.store();
    assert!(store.remove(&key(&["DP-1"], LayoutMode::Physical)).is_some());

    let reloaded = fixture.store();
    assert_eq!(reloaded.len(), 1);
    assert!(reloaded.lookup(&key(&["HDMI-1"], LayoutMode::Physical)).is_some());
}

#[test]
fn test_custom_store_keeps_mutations_in_memory() {
    let fixture = Fixture::new();
    fixture.write_user(&document(&format!(
        "{}{}",
        physical_config("DP-1", 1920, 1080),
        physical_config("HDMI-1", 1920, 1080)
    )));
    let before = fs::read_to_string(&fixture.user_file).unwrap();

    let mut store = ConfigStore::new(StorePaths::default(), BitFlags::empty());
    store
        .set_custom(&fixture.user_file, None, BitFlags::empty())
        .unwrap();
    assert_eq!(store.len(), 2);

    store.remove(&key(&["DP-1"], LayoutMode::Physical));
    assert_eq!(store.len(), 1);
    assert_eq!(fs::read_to_string(&fixture.user_file).unwrap(), before);
}
