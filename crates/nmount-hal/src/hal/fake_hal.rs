//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges, udisks or real images.
//! It keeps a tiny model of loop devices and mounts so that the mount table it
//! reports stays consistent with what callers did.

use super::{
    HostInfoOps, LoopOps, MountOps, MountOptions, PrivilegeOps, ProbeOps, ProcessOps, SystemOps,
};
use crate::procfs::mountinfo::{escape_mount_path, parse_mountinfo, MountInfo};
use crate::{HalError, HalResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    LoopSetup {
        image: PathBuf,
    },
    LoopDelete {
        loop_device: String,
    },
    LosetupDetach {
        loop_device: String,
    },
    Mount {
        device: String,
        options: Option<String>,
    },
    UnmountDevice {
        device: String,
    },
    UnmountPath {
        target: PathBuf,
    },
    Lsblk {
        device: String,
        columns: String,
    },
    UdevSettle,
    Partprobe {
        device: String,
    },
    BlockdevRereadpt {
        device: String,
    },
    PkexecInstall {
        src: PathBuf,
        dst: PathBuf,
        mode: u32,
    },
    PkexecRemove {
        path: PathBuf,
    },
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Mount points currently in the (fake) mount table
    mounted_paths: HashSet<PathBuf>,
    /// Block device -> mount point
    device_mounts: BTreeMap<String, PathBuf>,
    attached_loops: BTreeSet<String>,
    missing_tools: HashSet<String>,
    user: String,
    next_loop: u32,
    loop_setup_output: Option<String>,
    loop_setup_failure: Option<String>,
    lsblk_outputs: HashMap<(String, String), String>,
    mount_failures: HashMap<String, String>,
    mount_outputs: HashMap<String, String>,
    unmount_failures: HashMap<String, String>,
    loop_delete_failures: HashMap<String, String>,
    pkexec_failure: Option<String>,
}

impl Default for FakeHalState {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            mounted_paths: HashSet::new(),
            device_mounts: BTreeMap::new(),
            attached_loops: BTreeSet::new(),
            missing_tools: HashSet::new(),
            user: "tester".to_string(),
            next_loop: 0,
            loop_setup_output: None,
            loop_setup_failure: None,
            lsblk_outputs: HashMap::new(),
            mount_failures: HashMap::new(),
            mount_outputs: HashMap::new(),
            unmount_failures: HashMap::new(),
            loop_delete_failures: HashMap::new(),
            pkexec_failure: None,
        }
    }
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

fn failed(program: &str, stderr: impl Into<String>) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: Some(1),
        stderr: stderr.into(),
    }
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        self.state.lock().unwrap()
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Forget recorded operations (the mount and loop model is kept).
    pub fn clear(&self) {
        self.state().operations.clear();
    }

    /// Pretend `program` is not installed.
    pub fn without_tool(self, program: &str) -> Self {
        self.state().missing_tools.insert(program.to_string());
        self
    }

    pub fn set_user(&self, user: &str) {
        self.state().user = user.to_string();
    }

    /// Replace the stdout of the next loop-setups (the loop device is still allocated).
    pub fn set_loop_setup_output(&self, output: &str) {
        self.state().loop_setup_output = Some(output.to_string());
    }

    pub fn fail_loop_setup(&self, stderr: &str) {
        self.state().loop_setup_failure = Some(stderr.to_string());
    }

    pub fn set_lsblk_output(&self, device: &str, columns: &str, output: &str) {
        self.state().lsblk_outputs.insert(
            (device.to_string(), columns.to_string()),
            output.to_string(),
        );
    }

    pub fn fail_mount(&self, device: &str, stderr: &str) {
        self.state()
            .mount_failures
            .insert(device.to_string(), stderr.to_string());
    }

    /// Override what `udisksctl mount` prints for `device`. The device is not marked mounted
    /// anywhere, which mimics a mount point the output does not reveal.
    pub fn set_mount_output(&self, device: &str, output: &str) {
        self.state()
            .mount_outputs
            .insert(device.to_string(), output.to_string());
    }

    pub fn fail_unmount(&self, device: &str, stderr: &str) {
        self.state()
            .unmount_failures
            .insert(device.to_string(), stderr.to_string());
    }

    pub fn fail_loop_delete(&self, loop_device: &str, stderr: &str) {
        self.state()
            .loop_delete_failures
            .insert(loop_device.to_string(), stderr.to_string());
    }

    pub fn fail_pkexec(&self, stderr: &str) {
        self.state().pkexec_failure = Some(stderr.to_string());
    }

    /// Put a bare mount point in the mount table.
    pub fn set_mounted(&self, path: &Path) {
        self.state().mounted_paths.insert(path.to_path_buf());
    }

    /// Record `device` as mounted at `path`, as if someone else had mounted it.
    pub fn mark_mounted(&self, device: &str, path: &Path) {
        let mut state = self.state();
        state.mounted_paths.insert(path.to_path_buf());
        state
            .device_mounts
            .insert(device.to_string(), path.to_path_buf());
    }

    /// Register an existing loop device.
    pub fn attach_loop(&self, loop_device: &str) {
        self.state().attached_loops.insert(loop_device.to_string());
    }

    pub fn is_loop_attached(&self, loop_device: &str) -> bool {
        self.state().attached_loops.contains(loop_device)
    }

    pub fn mount_point_of(&self, device: &str) -> Option<PathBuf> {
        self.state().device_mounts.get(device).cloned()
    }

    fn record_operation(&self, op: Operation) {
        self.state().operations.push(op);
    }

    fn require_tool(&self, program: &str) -> HalResult<()> {
        if self.state().missing_tools.contains(program) {
            return Err(HalError::CommandNotFound(program.to_string()));
        }
        Ok(())
    }
}

impl LoopOps for FakeHal {
    fn loop_setup(&self, image: &Path) -> HalResult<String> {
        self.require_tool("udisksctl")?;
        self.record_operation(Operation::LoopSetup {
            image: image.to_path_buf(),
        });
        let mut state = self.state();
        if let Some(stderr) = state.loop_setup_failure.clone() {
            return Err(failed("udisksctl", stderr));
        }
        let loop_device = format!("/dev/loop{}", state.next_loop);
        state.next_loop += 1;
        state.attached_loops.insert(loop_device.clone());
        Ok(state
            .loop_setup_output
            .clone()
            .unwrap_or_else(|| format!("Mapped file {} as {}.", image.display(), loop_device)))
    }

    fn loop_delete(&self, loop_device: &str) -> HalResult<()> {
        self.require_tool("udisksctl")?;
        self.record_operation(Operation::LoopDelete {
            loop_device: loop_device.to_string(),
        });
        let mut state = self.state();
        if let Some(stderr) = state.loop_delete_failures.get(loop_device) {
            return Err(failed("udisksctl", stderr.clone()));
        }
        if !state.attached_loops.remove(loop_device) {
            return Err(failed(
                "udisksctl",
                format!("Error looking up object for device {}", loop_device),
            ));
        }
        Ok(())
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        self.require_tool("losetup")?;
        self.record_operation(Operation::LosetupDetach {
            loop_device: loop_device.to_string(),
        });
        if !self.state().attached_loops.remove(loop_device) {
            return Err(failed(
                "losetup",
                format!("{}: detach failed: No such device or address", loop_device),
            ));
        }
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(&self, device: &str, options: &MountOptions) -> HalResult<String> {
        self.require_tool("udisksctl")?;
        self.record_operation(Operation::Mount {
            device: device.to_string(),
            options: options.options.clone(),
        });
        let mut state = self.state();
        if let Some(stderr) = state.mount_failures.get(device) {
            return Err(failed("udisksctl", stderr.clone()));
        }
        if let Some(output) = state.mount_outputs.get(device) {
            return Ok(output.clone());
        }
        if let Some(mount_point) = state.device_mounts.get(device) {
            return Err(failed(
                "udisksctl",
                format!(
                    "Error mounting {}: GDBus.Error:org.freedesktop.UDisks2.Error.AlreadyMounted: Device {} is already mounted at `{}'.",
                    device,
                    device,
                    mount_point.display()
                ),
            ));
        }
        let name = Path::new(device)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "disk".to_string());
        let mount_point = PathBuf::from(format!("/run/media/{}/{}", state.user, name));
        state.mounted_paths.insert(mount_point.clone());
        state
            .device_mounts
            .insert(device.to_string(), mount_point.clone());
        Ok(format!("Mounted {} at {}.", device, mount_point.display()))
    }

    fn unmount_device(&self, device: &str) -> HalResult<()> {
        self.require_tool("udisksctl")?;
        self.record_operation(Operation::UnmountDevice {
            device: device.to_string(),
        });
        let mut state = self.state();
        if let Some(stderr) = state.unmount_failures.get(device) {
            return Err(failed("udisksctl", stderr.clone()));
        }
        match state.device_mounts.remove(device) {
            Some(mount_point) => {
                state.mounted_paths.remove(&mount_point);
                Ok(())
            }
            None => Err(failed(
                "udisksctl",
                format!(
                    "Error unmounting {}: GDBus.Error:org.freedesktop.UDisks2.Error.NotMounted: Device `{}' is not mounted",
                    device, device
                ),
            )),
        }
    }

    fn unmount_path(&self, target: &Path) -> HalResult<()> {
        self.require_tool("umount")?;
        self.record_operation(Operation::UnmountPath {
            target: target.to_path_buf(),
        });
        let mut state = self.state();
        if !state.mounted_paths.remove(target) {
            return Err(failed(
                "umount",
                format!("umount: {}: not mounted.", target.display()),
            ));
        }
        state.device_mounts.retain(|_, mp| mp.as_path() != target);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state().mounted_paths.contains(path))
    }
}

impl ProbeOps for FakeHal {
    fn lsblk_columns(&self, device: &str, columns: &str) -> HalResult<String> {
        self.require_tool("lsblk")?;
        self.record_operation(Operation::Lsblk {
            device: device.to_string(),
            columns: columns.to_string(),
        });
        Ok(self
            .state()
            .lsblk_outputs
            .get(&(device.to_string(), columns.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

impl SystemOps for FakeHal {
    fn udev_settle(&self) -> HalResult<()> {
        self.require_tool("udevadm")?;
        self.record_operation(Operation::UdevSettle);
        Ok(())
    }

    fn partprobe(&self, device: &str) -> HalResult<()> {
        self.require_tool("partprobe")?;
        self.record_operation(Operation::Partprobe {
            device: device.to_string(),
        });
        Ok(())
    }

    fn blockdev_rereadpt(&self, device: &str) -> HalResult<()> {
        self.require_tool("blockdev")?;
        self.record_operation(Operation::BlockdevRereadpt {
            device: device.to_string(),
        });
        Ok(())
    }
}

impl HostInfoOps for FakeHal {
    fn mount_table(&self) -> HalResult<Vec<MountInfo>> {
        let state = self.state();
        let mut out = String::new();
        for (idx, (device, mount_point)) in state.device_mounts.iter().enumerate() {
            out.push_str(&format!(
                "{} 28 7:{} / {} ro,nosuid,nodev,relatime - iso9660 {} ro\n",
                100 + idx,
                idx,
                escape_mount_path(&mount_point.to_string_lossy()),
                escape_mount_path(device)
            ));
        }
        Ok(parse_mountinfo(&out))
    }

    fn current_user(&self) -> HalResult<String> {
        Ok(self.state().user.clone())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        if self.state().missing_tools.contains(program) {
            return None;
        }
        Some(PathBuf::from("/usr/bin").join(program))
    }
}

impl PrivilegeOps for FakeHal {
    fn pkexec_install(&self, src: &Path, dst: &Path, mode: u32) -> HalResult<()> {
        self.require_tool("pkexec")?;
        self.record_operation(Operation::PkexecInstall {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            mode,
        });
        if let Some(stderr) = self.state().pkexec_failure.clone() {
            return Err(failed("pkexec", stderr));
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
        Ok(())
    }

    fn pkexec_remove(&self, path: &Path) -> HalResult<()> {
        self.require_tool("pkexec")?;
        self.record_operation(Operation::PkexecRemove {
            path: path.to_path_buf(),
        });
        if let Some(stderr) = self.state().pkexec_failure.clone() {
            return Err(failed("pkexec", stderr));
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            // rm -f
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ProcessOps for FakeHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        self.require_tool(program)?;
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
        });
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        self.command_output(program, args, timeout).map(|_| ())
    }
}
