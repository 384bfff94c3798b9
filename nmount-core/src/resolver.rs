//! Block device resolution inside a loop device (via `lsblk`).
//!
//! Hybrid ISOs expose partitions (`/dev/loop0p1`, ...) and the filesystem worth mounting may
//! live on the loop device itself or on one of them. The parsing is kept in pure functions.

use nmount_hal::ProbeOps;

/// Filesystem types in order of preference for an optical image.
pub const FS_PREFERENCE: &[&str] = &[
    "iso9660", "udf", "vfat", "squashfs", "ext4", "ext3", "ext2",
];

/// Paths of rows typed `part` in `lsblk -nrpo TYPE,PATH` output.
pub fn parse_partitions(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let kind = fields.next()?;
            let path = fields.next()?;
            (kind == "part").then(|| path.to_string())
        })
        .collect()
}

/// `(fstype, path)` pairs from `lsblk -nrpo FSTYPE,PATH` output. Rows without a
/// filesystem type are dropped; types are lowercased.
pub fn parse_fstypes(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return None;
            }
            let fstype = fields[0];
            if fstype.is_empty() || fstype == "-" {
                return None;
            }
            Some((fstype.to_lowercase(), fields[1].to_string()))
        })
        .collect()
}

/// Best candidate by [`FS_PREFERENCE`], else the first candidate, else `loop_device`.
pub fn choose_mountable(candidates: &[(String, String)], loop_device: &str) -> String {
    for wanted in FS_PREFERENCE {
        if let Some((_, path)) = candidates.iter().find(|(fstype, _)| fstype == wanted) {
            return path.clone();
        }
    }
    candidates
        .first()
        .map(|(_, path)| path.clone())
        .unwrap_or_else(|| loop_device.to_string())
}

pub struct BlockResolver<'a, H: ProbeOps + ?Sized> {
    hal: &'a H,
}

impl<'a, H: ProbeOps + ?Sized> BlockResolver<'a, H> {
    pub fn new(hal: &'a H) -> Self {
        Self { hal }
    }

    /// Child partitions of `loop_device`. Empty when lsblk fails or is missing.
    pub fn list_child_partitions(&self, loop_device: &str) -> Vec<String> {
        match self.hal.lsblk_columns(loop_device, "TYPE,PATH") {
            Ok(output) => parse_partitions(&output),
            Err(err) => {
                log::debug!("lsblk partitions of {} failed: {}", loop_device, err);
                Vec::new()
            }
        }
    }

    pub fn pick_mountable_block(&self, loop_device: &str) -> String {
        match self.hal.lsblk_columns(loop_device, "FSTYPE,PATH") {
            Ok(output) => choose_mountable(&parse_fstypes(&output), loop_device),
            Err(err) => {
                log::debug!("lsblk fstypes of {} failed: {}", loop_device, err);
                loop_device.to_string()
            }
        }
    }
}
