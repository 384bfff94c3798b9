//! Filesystem locations used by NMount.
//!
//! Everything hangs off the user's home directory except the polkit rule, so tests can
//! point a whole [`Paths`] at a temp directory.

use nmount_error::{NmountError, NmountResult};
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "NMount";
pub const RULE_FILE_NAME: &str = "90-nmount.rules";
pub const SYSTEM_RULE_PATH: &str = "/etc/polkit-1/rules.d/90-nmount.rules";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub cache_dir: PathBuf,
    pub log_file: PathBuf,
    pub staged_rule: PathBuf,
    pub polkit_rule: PathBuf,
    pub bin_dir: PathBuf,
    pub app_bin: PathBuf,
    pub apps_dir: PathBuf,
    pub app_launcher: PathBuf,
    pub desktop_dir: PathBuf,
    pub desktop_shortcut: PathBuf,
    pub autostart_dir: PathBuf,
    pub autostart_file: PathBuf,
    pub default_mount_base: PathBuf,
}

impl Paths {
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let cache_dir = home.join(".cache").join("nmount");
        let bin_dir = home.join(".local").join("bin");
        let apps_dir = home.join(".local").join("share").join("applications");
        let desktop_dir = home.join("Desktop");
        let autostart_dir = home.join(".config").join("autostart");
        Self {
            config_file: home.join(".config").join("nmount").join("config.json"),
            log_file: cache_dir.join("nmount.log"),
            staged_rule: cache_dir.join(RULE_FILE_NAME),
            polkit_rule: PathBuf::from(SYSTEM_RULE_PATH),
            app_bin: bin_dir.join("nmount"),
            app_launcher: apps_dir.join("nmount.desktop"),
            desktop_shortcut: desktop_dir.join("NMount.desktop"),
            autostart_file: autostart_dir.join("nmount.desktop"),
            default_mount_base: home.join("mnt").join("nmount"),
            cache_dir,
            bin_dir,
            apps_dir,
            desktop_dir,
            autostart_dir,
            home,
        }
    }

    /// Resolve from `$HOME`, falling back to the passwd entry of the current uid.
    pub fn from_env() -> NmountResult<Self> {
        if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            return Ok(Self::from_home(home));
        }
        let user = nix::unistd::User::from_uid(nix::unistd::getuid())
            .map_err(|e| NmountError::Config(format!("passwd lookup failed: {}", e)))?
            .ok_or_else(|| NmountError::Config("cannot determine home directory".to_string()))?;
        Ok(Self::from_home(user.dir))
    }

    pub fn with_config_file(mut self, config_file: impl Into<PathBuf>) -> Self {
        self.config_file = config_file.into();
        self
    }

    pub fn with_polkit_rule(mut self, rule: impl AsRef<Path>) -> Self {
        self.polkit_rule = rule.as_ref().to_path_buf();
        self
    }
}
