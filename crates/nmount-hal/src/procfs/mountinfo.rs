//! Parsing helpers for `/proc/self/mountinfo` and `/proc/mounts`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    /// Mount source (the block device for real filesystems). Empty when absent.
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <pre fields...> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ").unwrap_or((line, ""));
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mount_point = unescape_mount_path(pre_fields[4]);
            let source = post
                .split_whitespace()
                .nth(1)
                .map(unescape_mount_path)
                .unwrap_or_default();
            Some(MountInfo {
                mount_point: PathBuf::from(mount_point),
                source,
            })
        })
        .collect()
}

/// Parse the older `/proc/mounts` layout (`<source> <mount point> <fstype> ...`).
pub fn parse_proc_mounts(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(mount_point)),
                source: unescape_mount_path(source),
            })
        })
        .collect()
}

/// Read the mount table from `mountinfo`, falling back to the `/proc/mounts`
/// layout at `mounts` when the former is unreadable.
pub fn read_mount_table(mountinfo: &Path, mounts: &Path) -> io::Result<Vec<MountInfo>> {
    match fs::read_to_string(mountinfo) {
        Ok(content) => Ok(parse_mountinfo(&content)),
        Err(err) => {
            log::debug!(
                "{} unreadable ({}), falling back to {}",
                mountinfo.display(),
                err,
                mounts.display()
            );
            Ok(parse_proc_mounts(&fs::read_to_string(mounts)?))
        }
    }
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source is exactly `device`, in table order, deduplicated.
pub fn mount_points_for_source(entries: &[MountInfo], device: &str) -> Vec<PathBuf> {
    let mut mounts: Vec<PathBuf> = Vec::new();
    for entry in entries.iter().filter(|e| e.source == device) {
        if !mounts.contains(&entry.mount_point) {
            mounts.push(entry.mount_point.clone());
        }
    }
    mounts
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

pub fn escape_mount_path(raw: &str) -> String {
    raw.replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
        .replace('\n', "\\012")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
