//! Persistent configuration document and the mount record it embeds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_THEME: &str = "Light Minimal";
pub const DEFAULT_RECENT_FILES_MAX: usize = 10;

/// Placeholder mount point when udisks did not say where it mounted.
pub const UNKNOWN_MOUNT_POINT: &str = "unknown";

/// One mounted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    pub image_path: PathBuf,
    pub loop_device: String,
    /// The loop device itself or one of its partitions.
    pub mount_device: String,
    pub mount_point: PathBuf,
}

impl MountRecord {
    pub fn has_known_mount_point(&self) -> bool {
        !self.mount_point.as_os_str().is_empty()
            && self.mount_point != Path::new(UNKNOWN_MOUNT_POINT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub installed: bool,
    pub files: BTreeSet<String>,
    pub mount_base: PathBuf,
    pub language: String,
    pub theme: String,
    pub autostart: bool,
    pub auto_unmount_on_exit: bool,
    pub polkit_rule_installed: bool,
    pub recent_files: Vec<PathBuf>,
    pub recent_files_max: usize,
    #[serde(with = "empty_record")]
    pub last_mount: Option<MountRecord>,
    pub active_mounts: Vec<MountRecord>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            installed: false,
            files: BTreeSet::new(),
            mount_base: PathBuf::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            theme: DEFAULT_THEME.to_string(),
            autostart: false,
            auto_unmount_on_exit: false,
            polkit_rule_installed: false,
            recent_files: Vec::new(),
            recent_files_max: DEFAULT_RECENT_FILES_MAX,
            last_mount: None,
            active_mounts: Vec::new(),
        }
    }
}

impl Config {
    pub fn with_mount_base(mount_base: impl Into<PathBuf>) -> Self {
        Self {
            mount_base: mount_base.into(),
            ..Self::default()
        }
    }

    /// Move `path` to the front of the recent list, dropping duplicates and the oldest entries.
    pub fn push_recent(&mut self, path: &Path) {
        self.recent_files.retain(|p| p != path);
        self.recent_files.insert(0, path.to_path_buf());
        self.recent_files.truncate(self.recent_files_max.max(1));
    }

    /// Safe document written on uninstall.
    pub fn reset_for_uninstall(&self) -> Self {
        Self {
            mount_base: self.mount_base.clone(),
            language: self.language.clone(),
            theme: self.theme.clone(),
            ..Self::default()
        }
    }
}

/// `lastMount` is written as `{}` when nothing is mounted.
mod empty_record {
    use super::*;
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        value: &Option<MountRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(record) => record.serialize(serializer),
            None => serde_json::Map::new().serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<MountRecord>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(value) => MountRecord::deserialize(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
