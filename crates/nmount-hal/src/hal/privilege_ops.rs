//! Privileged file operations (pkexec).

use crate::HalResult;
use std::path::Path;

pub trait PrivilegeOps {
    /// Copy `src` to the root-owned `dst` with the given mode
    /// (`pkexec install -m <mode> <src> <dst>`).
    fn pkexec_install(&self, src: &Path, dst: &Path, mode: u32) -> HalResult<()>;

    /// Remove a root-owned file (`pkexec rm -f <path>`).
    fn pkexec_remove(&self, path: &Path) -> HalResult<()>;
}
