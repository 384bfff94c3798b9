//! System-level operations (udev settle, partition table re-reads).

use crate::HalResult;

/// System operations trait.
pub trait SystemOps {
    /// Best-effort udev settle (wait for block device events to quiesce).
    fn udev_settle(&self) -> HalResult<()>;

    /// Ask the kernel to re-read the partition table of `device` (`partprobe`).
    fn partprobe(&self, device: &str) -> HalResult<()>;

    /// Same as [`SystemOps::partprobe`] through `blockdev --rereadpt`.
    fn blockdev_rereadpt(&self, device: &str) -> HalResult<()>;
}
