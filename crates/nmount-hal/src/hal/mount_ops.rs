//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for mounting and unmounting filesystems through udisks.
pub trait MountOps {
    /// Mount a block device (`udisksctl mount -b <device> [--options ...]`).
    ///
    /// udisks picks the mount point itself; the returned stdout reports where.
    fn mount_device(&self, device: &str, options: &MountOptions) -> HalResult<String>;

    /// Unmount a block device (`udisksctl unmount -b <device>`).
    fn unmount_device(&self, device: &str) -> HalResult<()>;

    /// Unmount by mount point with plain `umount`. Teardown fallback only.
    fn unmount_path(&self, target: &Path) -> HalResult<()>;

    /// Check if a path is currently a mount point in the live mount table.
    fn is_mounted(&self, path: &Path) -> HalResult<bool>;
}

/// Mount options and flags.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Additional mount options as a comma-separated string (e.g., "ro,noexec")
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: impl Into<String>) -> Self {
        Self {
            options: Some(options.into()),
        }
    }

    /// Images are only ever mounted read-only.
    pub fn read_only() -> Self {
        Self::with_options("ro")
    }
}
