//! Text heuristics over udisksctl's human-readable output.

use crate::config::UNKNOWN_MOUNT_POINT;

/// Prefixes udisks (or a distro's udev rules) use for automatic mount points.
pub const MOUNT_ROOTS: &[&str] = &["/run/media/", "/media/", "/mnt/"];

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '\'', '"', '`', ')'];

/// First `/dev/loop*` token of `udisksctl loop-setup` output.
///
/// `"Mapped file /isos/x.iso as /dev/loop0."` yields `/dev/loop0`.
pub fn parse_loop_device(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.starts_with("/dev/loop"))
        .map(|token| token.trim_end_matches(TRAILING_PUNCTUATION).to_string())
        .filter(|dev| dev.len() > "/dev/loop".len())
}

/// Mount point reported by `udisksctl mount`, or [`UNKNOWN_MOUNT_POINT`].
///
/// Labels may contain spaces (`/run/media/u/Ubuntu 24.04 LTS amd64`), so once the mount
/// point starts, the rest of the line belongs to it.
pub fn parse_mount_output(output: &str) -> String {
    for line in output.lines() {
        if let Some(start) = find_mount_root(line) {
            return clean_tail(&line[start..]);
        }
    }
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(idx) = tokens.iter().position(|t| *t == "at") {
            if idx + 1 < tokens.len() {
                return clean_tail(&tokens[idx + 1..].join(" "));
            }
        }
    }
    UNKNOWN_MOUNT_POINT.to_string()
}

/// Byte offset of the first whitespace-delimited token starting with a mount root.
fn find_mount_root(line: &str) -> Option<usize> {
    let mut offset = 0;
    for token in line.split(' ') {
        if MOUNT_ROOTS.iter().any(|root| token.starts_with(root)) {
            return Some(offset);
        }
        offset += token.len() + 1;
    }
    None
}

fn clean_tail(raw: &str) -> String {
    raw.trim().trim_end_matches('.').trim_end().to_string()
}
