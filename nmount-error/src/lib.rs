use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type NmountResult<T> = Result<T, NmountError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// Raw diagnostic text suitable for showing next to a failed operation.
    ///
    /// For a failed command this is the tool's stderr (or the whole error when
    /// the tool printed nothing).
    pub fn diagnostic(&self) -> String {
        match self {
            HalError::CommandFailed { stderr, .. } if !stderr.is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_command_not_found(&self) -> bool {
        matches!(self, HalError::CommandNotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum NmountError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} not found. Install package: udisks2")]
    ToolMissing(String),

    #[error("Loop device not found in output: {output}")]
    NoLoopDeviceFound { output: String },

    #[error("Mount failed for {device}: {diagnostic}")]
    MountFailed { device: String, diagnostic: String },

    #[error("Unmount failed for {device}: {diagnostic}")]
    UnmountFailed { device: String, diagnostic: String },

    #[error("Loop delete failed for {loop_device}: {diagnostic}")]
    LoopDeleteFailed {
        loop_device: String,
        diagnostic: String,
    },

    #[error("Not ready: fix permissions first (run `nmount fix-permissions`)")]
    PermissionNotConfigured,

    #[error("Path invalid or file does not exist: {}", .0.display())]
    InvalidImage(PathBuf),

    #[error("Image is already mounted: {0}")]
    AlreadyMounted(String),

    #[error("Nothing mounted for {0}")]
    NotMounted(String),

    #[error("Refusing to generate polkit rule for invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Failed to install polkit rule: {0}")]
    RuleInstallFailed(String),

    #[error("Checksum scan cancelled")]
    ChecksumCancelled,

    #[error("Config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let err = HalError::CommandFailed {
            program: "udisksctl".to_string(),
            code: Some(1),
            stderr: "Error mounting /dev/loop0: wrong fs type".to_string(),
        };
        assert_eq!(err.diagnostic(), "Error mounting /dev/loop0: wrong fs type");
    }

    #[test]
    fn diagnostic_falls_back_to_display() {
        let err = HalError::CommandFailed {
            program: "udisksctl".to_string(),
            code: Some(1),
            stderr: String::new(),
        };
        assert!(err.diagnostic().contains("udisksctl"));
        assert!(HalError::CommandNotFound("lsblk".into()).is_command_not_found());
    }
}
