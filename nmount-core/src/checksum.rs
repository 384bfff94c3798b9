//! SHA-256 of image files with progress reporting and cooperative cancellation.

use nmount_error::{NmountError, NmountResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumProgress {
    pub bytes_read: u64,
    pub bytes_total: u64,
}

impl ChecksumProgress {
    pub fn percent(&self) -> u8 {
        if self.bytes_total == 0 {
            return 100;
        }
        ((self.bytes_read.saturating_mul(100)) / self.bytes_total).min(100) as u8
    }
}

/// Hex SHA-256 of `path`. `cancel` is polled between chunks.
pub fn sha256_file(
    path: &Path,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(ChecksumProgress),
) -> NmountResult<String> {
    let mut file = File::open(path)?;
    let bytes_total = file.metadata()?.len();
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes_read = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            log::info!("checksum of {} cancelled", path.display());
            return Err(NmountError::ChecksumCancelled);
        }
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        bytes_read += read as u64;
        on_progress(ChecksumProgress {
            bytes_read,
            bytes_total,
        });
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Case-insensitive comparison against an expected hex digest.
pub fn matches_expected(computed: &str, expected: &str) -> bool {
    computed.eq_ignore_ascii_case(expected.trim())
}
