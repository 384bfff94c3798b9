//! Shared fixtures for unit tests: a temp home, a config store and a `FakeHal`.

use crate::config_store::ConfigStore;
use crate::paths::Paths;
use crate::permissions::{rule_text_for_user, PermissionBootstrapper};
use nmount_hal::FakeHal;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestEnv {
    pub dir: TempDir,
    pub paths: Paths,
    pub store: ConfigStore,
    pub hal: FakeHal,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_hal(FakeHal::new())
    }

    pub fn with_hal(hal: FakeHal) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::from_home(dir.path().join("home"))
            .with_polkit_rule(dir.path().join("etc/polkit-1/rules.d/90-nmount.rules"));
        let store = ConfigStore::new(&paths.config_file, &paths.default_mount_base);
        Self {
            dir,
            paths,
            store,
            hal,
        }
    }

    pub fn permissions(&self) -> PermissionBootstrapper<'_, FakeHal> {
        PermissionBootstrapper::new(&self.hal, &self.store, &self.paths)
    }

    pub fn write_rule(&self, content: &str) {
        let rule = &self.paths.polkit_rule;
        fs::create_dir_all(rule.parent().unwrap()).unwrap();
        fs::write(rule, content).unwrap();
    }

    /// Installed rule plus the config flag.
    pub fn grant_permissions(&self) {
        self.write_rule(&rule_text_for_user("tester").unwrap());
        self.store
            .update(|cfg| cfg.polkit_rule_installed = true)
            .unwrap();
    }

    /// Create a small file standing in for an ISO image. Returns its canonical path.
    pub fn image(&self, name: &str) -> PathBuf {
        let dir = self.dir.path().join("isos");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"CD001").unwrap();
        fs::canonicalize(path).unwrap()
    }
}
