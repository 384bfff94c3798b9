//! Device probing operations (lsblk).

use crate::HalResult;

/// Probing operations trait.
pub trait ProbeOps {
    /// Raw `lsblk -nrpo <columns> <device>` output: one space-separated row per device in the
    /// tree rooted at `device`.
    fn lsblk_columns(&self, device: &str, columns: &str) -> HalResult<String>;
}
