//! Host information (read-only).
//!
//! This is "world-touching" (reads `/proc`, the passwd database, `PATH`) and belongs in the HAL.

use crate::procfs::mountinfo::MountInfo;
use crate::HalResult;
use std::path::PathBuf;

pub trait HostInfoOps {
    /// The live mount table (`/proc/self/mountinfo`, or `/proc/mounts` when
    /// mountinfo is unavailable).
    fn mount_table(&self) -> HalResult<Vec<MountInfo>>;

    /// Login name of the user running the process.
    fn current_user(&self) -> HalResult<String>;

    /// Locate an executable on `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;
}
