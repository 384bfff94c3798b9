//! Crash-safe persistence for [`Config`].
//!
//! Writes go through `<file>.tmp` and a rename, the previous primary is kept as
//! `<file>.bak`, and reads fall back to the backup when the primary is unreadable.
//! There is no locking: a single writer is assumed.

use crate::config::Config;
use nmount_error::{NmountError, NmountResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    default_mount_base: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, default_mount_base: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_mount_base: default_mount_base.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    pub fn temp_path(&self) -> PathBuf {
        sibling(&self.path, "tmp")
    }

    pub fn default_config(&self) -> Config {
        Config::with_mount_base(&self.default_mount_base)
    }

    /// Load the config. Never fails: a missing file yields defaults, a corrupt one the backup.
    pub fn read(&self) -> Config {
        match load(&self.path) {
            Ok(Some(cfg)) => return cfg,
            Ok(None) => return self.default_config(),
            Err(err) => log::warn!(
                "config {} unreadable ({}), trying backup",
                self.path.display(),
                err
            ),
        }

        let backup = self.backup_path();
        match load(&backup) {
            Ok(Some(cfg)) => {
                log::info!("recovered config from {}", backup.display());
                cfg
            }
            Ok(None) => self.default_config(),
            Err(err) => {
                log::warn!(
                    "config backup {} unreadable ({}), using defaults",
                    backup.display(),
                    err
                );
                self.default_config()
            }
        }
    }

    pub fn write(&self, cfg: &Config) -> NmountResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let payload = serde_json::to_string_pretty(cfg)
            .map_err(|e| NmountError::Config(format!("failed to serialize config: {}", e)))?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(payload.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        if self.path.exists() {
            if let Err(err) = fs::copy(&self.path, self.backup_path()) {
                log::debug!("config backup skipped: {}", err);
            }
        }

        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                dir.sync_all().ok();
            }
        }
        Ok(())
    }

    /// Read-modify-write. Returns the document that was written.
    pub fn update(&self, mutate: impl FnOnce(&mut Config)) -> NmountResult<Config> {
        let mut cfg = self.read();
        mutate(&mut cfg);
        self.write(&cfg)?;
        Ok(cfg)
    }

    pub fn add_recent_file(&self, path: &Path) -> NmountResult<Config> {
        self.update(|cfg| cfg.push_recent(path))
    }

    /// Mount base of `cfg`, or the default when the stored one is empty.
    pub fn mount_base(&self, cfg: &Config) -> PathBuf {
        if cfg.mount_base.as_os_str().is_empty() {
            self.default_mount_base.clone()
        } else {
            cfg.mount_base.clone()
        }
    }
}

fn load(path: &Path) -> NmountResult<Option<Config>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let cfg = serde_json::from_str(&content)
        .map_err(|e| NmountError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("config.json");
    path.with_file_name(format!("{}.{}", file_name, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> ConfigStore {
        ConfigStore::new(dir.join("nmount/config.json"), dir.join("mnt/nmount"))
    }

    #[test]
    fn missing_file_reads_defaults() {
        let dir = tempdir().unwrap();
        let cfg = store(dir.path()).read();
        assert_eq!(cfg.mount_base, dir.path().join("mnt/nmount"));
        assert_eq!(cfg.language, "en");
        assert!(!cfg.installed);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut cfg = store.read();
        cfg.installed = true;
        cfg.theme = "Dark".to_string();
        cfg.files.insert("/home/u/.local/bin/nmount".to_string());

        store.write(&cfg).unwrap();
        assert_eq!(store.read(), cfg);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn empty_mount_base_survives_a_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut cfg = Config::default();
        cfg.recent_files_max = 3;

        store.write(&cfg).unwrap();
        let read = store.read();
        assert_eq!(read, cfg);
        assert!(read.mount_base.as_os_str().is_empty());
        assert_eq!(store.mount_base(&read), dir.path().join("mnt/nmount"));
    }

    #[test]
    fn second_write_keeps_previous_primary_as_backup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.update(|c| c.language = "hr".to_string()).unwrap();
        store.update(|c| c.language = "de".to_string()).unwrap();

        let backup: Config =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.language, "hr");
        assert_eq!(store.read().language, "de");
    }

    #[test]
    fn crash_between_tmp_write_and_rename_keeps_last_good_state() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.update(|c| c.autostart = true).unwrap();

        // A torn temp file from an interrupted write.
        fs::write(store.temp_path(), "{\"autostart\": fal").unwrap();

        let cfg = store.read();
        assert!(cfg.autostart);

        // The next write replaces the stale temp file.
        store.update(|c| c.theme = "Dark".to_string()).unwrap();
        assert!(!store.temp_path().exists());
        assert!(store.read().autostart);
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.update(|c| c.language = "hr".to_string()).unwrap();
        store.update(|c| c.language = "de".to_string()).unwrap();
        fs::write(store.path(), "not json at all").unwrap();

        assert_eq!(store.read().language, "hr");
    }

    #[test]
    fn corrupt_primary_and_backup_yield_defaults() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "[").unwrap();
        fs::write(store.backup_path(), "]").unwrap();

        assert_eq!(store.read(), store.default_config());
    }

    #[test]
    fn add_recent_file_dedups() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.add_recent_file(Path::new("/isos/a.iso")).unwrap();
        store.add_recent_file(Path::new("/isos/b.iso")).unwrap();
        let cfg = store.add_recent_file(Path::new("/isos/a.iso")).unwrap();
        assert_eq!(
            cfg.recent_files,
            vec![PathBuf::from("/isos/a.iso"), PathBuf::from("/isos/b.iso")]
        );
    }
}
