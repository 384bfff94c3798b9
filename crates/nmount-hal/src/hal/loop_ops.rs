//! Loop device operations (udisksctl loop-setup / loop-delete, losetup fallback).

use crate::HalResult;
use std::path::Path;

pub trait LoopOps {
    /// Ask udisks for a read-only loop device backed by `image`
    /// (`udisksctl loop-setup -r -f <image>`).
    ///
    /// Returns the tool's stdout untouched; the loop device path has to be parsed out of the
    /// human-readable message by the caller.
    fn loop_setup(&self, image: &Path) -> HalResult<String>;

    /// Delete a loop device through udisks (`udisksctl loop-delete -b <dev>`).
    fn loop_delete(&self, loop_device: &str) -> HalResult<()>;

    /// Detach a loop device with `losetup -d`. Only used as a teardown fallback.
    fn losetup_detach(&self, loop_device: &str) -> HalResult<()>;
}
