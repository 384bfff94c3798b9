//! Detection of the external tools NMount drives.

use nmount_hal::HostInfoOps;
use std::collections::BTreeSet;

pub const UDISKSCTL: &str = "udisksctl";
pub const LSBLK: &str = "lsblk";
pub const PKEXEC: &str = "pkexec";
pub const LOSETUP: &str = "losetup";
pub const UMOUNT: &str = "umount";
pub const UDEVADM: &str = "udevadm";
pub const PARTPROBE: &str = "partprobe";
pub const BLOCKDEV: &str = "blockdev";
pub const KIOCLIENT5: &str = "kioclient5";
pub const KIOCLIENT6: &str = "kioclient6";

const KNOWN_TOOLS: &[&str] = &[
    UDISKSCTL, LSBLK, PKEXEC, LOSETUP, UMOUNT, UDEVADM, PARTPROBE, BLOCKDEV, KIOCLIENT5,
    KIOCLIENT6,
];

/// Without these mounting is impossible or degraded enough to warn about.
const REQUIRED_TOOLS: &[&str] = &[UDISKSCTL, LSBLK, PKEXEC];

/// Snapshot of which tools were found on `PATH` at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSet {
    present: BTreeSet<String>,
}

impl ToolSet {
    pub fn detect<H: HostInfoOps + ?Sized>(hal: &H) -> Self {
        let present = KNOWN_TOOLS
            .iter()
            .filter(|tool| hal.which(tool).is_some())
            .map(|tool| tool.to_string())
            .collect();
        let tools = Self { present };
        let missing = tools.missing_required();
        if !missing.is_empty() {
            log::warn!("⚠️ missing tools: {}", missing.join(", "));
        }
        tools
    }

    /// Every known tool present. Mostly useful in tests.
    pub fn all() -> Self {
        Self::from_names(KNOWN_TOOLS)
    }

    pub fn from_names(names: &[&str]) -> Self {
        Self {
            present: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn without(mut self, tool: &str) -> Self {
        self.present.remove(tool);
        self
    }

    pub fn has(&self, tool: &str) -> bool {
        self.present.contains(tool)
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|tool| !self.has(tool))
            .collect()
    }
}
