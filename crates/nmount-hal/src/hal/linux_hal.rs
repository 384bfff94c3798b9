//! Linux HAL implementation driving the real tools.

use super::{
    HostInfoOps, LoopOps, MountOps, MountOptions, PrivilegeOps, ProbeOps, ProcessOps, SystemOps,
};
use crate::procfs::mountinfo;
use crate::{HalError, HalResult};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);
const UDISKS_TIMEOUT: Duration = Duration::from_secs(30);
const LOSETUP_TIMEOUT: Duration = Duration::from_secs(30);
// pkexec waits for the user to authenticate.
const PKEXEC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    // udisksctl reports some failures on stdout only.
    let stderr = if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    };
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr,
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    // Avoid commands hanging waiting for input.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// Run to completion and return trimmed stdout, mapping a non-zero exit to `CommandFailed`.
fn stdout_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<String> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    stdout_with_timeout(program, cmd, timeout).map(|_| ())
}

pub(crate) fn find_executable_in_path(binary: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(binary);
        if let Ok(metadata) = fs::metadata(&candidate) {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

impl ProcessOps for LinuxHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, timeout)
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        let output = self.command_output(program, args, timeout)?;
        if !output.status.success() {
            return Err(output_failed(program, &output));
        }
        Ok(())
    }
}

impl LoopOps for LinuxHal {
    fn loop_setup(&self, image: &Path) -> HalResult<String> {
        let mut cmd = Command::new("udisksctl");
        cmd.args(["loop-setup", "-r", "-f"]).arg(image);
        stdout_with_timeout("udisksctl", &mut cmd, UDISKS_TIMEOUT)
    }

    fn loop_delete(&self, loop_device: &str) -> HalResult<()> {
        let mut cmd = Command::new("udisksctl");
        cmd.args(["loop-delete", "-b", loop_device]);
        status_with_timeout("udisksctl", &mut cmd, UDISKS_TIMEOUT)
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        let mut cmd = Command::new("losetup");
        cmd.args(["-d", loop_device]);
        status_with_timeout("losetup", &mut cmd, LOSETUP_TIMEOUT)
    }
}

impl MountOps for LinuxHal {
    fn mount_device(&self, device: &str, options: &MountOptions) -> HalResult<String> {
        let mut cmd = Command::new("udisksctl");
        cmd.args(["mount", "-b", device]);
        if let Some(opts) = options.options.as_deref() {
            cmd.args(["--options", opts]);
        }
        stdout_with_timeout("udisksctl", &mut cmd, UDISKS_TIMEOUT)
    }

    fn unmount_device(&self, device: &str) -> HalResult<()> {
        let mut cmd = Command::new("udisksctl");
        cmd.args(["unmount", "-b", device]);
        status_with_timeout("udisksctl", &mut cmd, UDISKS_TIMEOUT)
    }

    fn unmount_path(&self, target: &Path) -> HalResult<()> {
        let mut cmd = Command::new("umount");
        cmd.arg(target);
        status_with_timeout("umount", &mut cmd, UDISKS_TIMEOUT)
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let entries = self.mount_table()?;
        Ok(mountinfo::is_mounted_from_info(path, &entries))
    }
}

impl ProbeOps for LinuxHal {
    fn lsblk_columns(&self, device: &str, columns: &str) -> HalResult<String> {
        let mut cmd = Command::new("lsblk");
        cmd.args(["-nrpo", columns, device]);
        stdout_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)
    }
}

impl SystemOps for LinuxHal {
    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        status_with_timeout("udevadm", &mut cmd, SETTLE_TIMEOUT)
    }

    fn partprobe(&self, device: &str) -> HalResult<()> {
        let mut cmd = Command::new("partprobe");
        cmd.arg(device);
        status_with_timeout("partprobe", &mut cmd, SETTLE_TIMEOUT)
    }

    fn blockdev_rereadpt(&self, device: &str) -> HalResult<()> {
        let mut cmd = Command::new("blockdev");
        cmd.args(["--rereadpt", device]);
        status_with_timeout("blockdev", &mut cmd, SETTLE_TIMEOUT)
    }
}

impl HostInfoOps for LinuxHal {
    fn mount_table(&self) -> HalResult<Vec<mountinfo::MountInfo>> {
        Ok(mountinfo::read_mount_table(
            Path::new("/proc/self/mountinfo"),
            Path::new("/proc/mounts"),
        )?)
    }

    fn current_user(&self) -> HalResult<String> {
        let uid = nix::unistd::getuid();
        if let Some(user) = nix::unistd::User::from_uid(uid)? {
            return Ok(user.name);
        }
        std::env::var("USER")
            .ok()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| HalError::Other(format!("no passwd entry for uid {}", uid)))
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        let path_env = std::env::var("PATH").unwrap_or_default();
        find_executable_in_path(program, &path_env)
    }
}

impl PrivilegeOps for LinuxHal {
    fn pkexec_install(&self, src: &Path, dst: &Path, mode: u32) -> HalResult<()> {
        let mode = format!("{:04o}", mode);
        let mut cmd = Command::new("pkexec");
        cmd.args(["install", "-m", mode.as_str()]).arg(src).arg(dst);
        status_with_timeout("pkexec", &mut cmd, PKEXEC_TIMEOUT)
    }

    fn pkexec_remove(&self, path: &Path) -> HalResult<()> {
        let mut cmd = Command::new("pkexec");
        cmd.args(["rm", "-f"]).arg(path);
        status_with_timeout("pkexec", &mut cmd, PKEXEC_TIMEOUT)
    }
}
