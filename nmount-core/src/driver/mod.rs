//! Loop & mount driver: the mount/unmount state machine.
//!
//! A mount walks `Idle -> LoopProvisioned -> PartitionsSettled -> MountAttempted -> Mounted`.
//! Any failure after the loop device exists ends in `Failed` and the loop is deleted before
//! the error is returned (see [`LoopGuard`]).

pub mod parse;

use crate::config::MountRecord;
use crate::config_store::ConfigStore;
use crate::permissions::PermissionBootstrapper;
use crate::registry::MountRegistry;
use crate::resolver::BlockResolver;
use crate::tools::{
    ToolSet, BLOCKDEV, KIOCLIENT5, KIOCLIENT6, PARTPROBE, UDEVADM, UDISKSCTL,
};
use nmount_error::{HalError, NmountError, NmountResult};
use nmount_hal::procfs::mountinfo::mount_points_for_source;
use nmount_hal::{LoopGuard, MountOptions, SystemHal};
use parse::{parse_loop_device, parse_mount_output};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Idle,
    LoopProvisioned,
    PartitionsSettled,
    MountAttempted,
    Mounted,
    Failed,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MountState::Idle => "idle",
            MountState::LoopProvisioned => "loop-provisioned",
            MountState::PartitionsSettled => "partitions-settled",
            MountState::MountAttempted => "mount-attempted",
            MountState::Mounted => "mounted",
            MountState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a new mount is checked against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// An image may be mounted once.
    Single,
    /// The same image may be mounted again on a fresh loop device.
    Multi,
}

pub struct MountDriver<'a, H: SystemHal + ?Sized> {
    hal: &'a H,
    tools: &'a ToolSet,
    store: &'a ConfigStore,
    permissions: &'a PermissionBootstrapper<'a, H>,
}

impl<'a, H: SystemHal + ?Sized> MountDriver<'a, H> {
    pub fn new(
        hal: &'a H,
        tools: &'a ToolSet,
        store: &'a ConfigStore,
        permissions: &'a PermissionBootstrapper<'a, H>,
    ) -> Self {
        Self {
            hal,
            tools,
            store,
            permissions,
        }
    }

    pub fn mount(
        &self,
        image: &Path,
        mode: MountMode,
        registry: &mut MountRegistry<'_>,
    ) -> NmountResult<MountRecord> {
        self.require_udisks()?;
        if !self.permissions.is_configured() {
            return Err(NmountError::PermissionNotConfigured);
        }
        // Records, duplicate checks and recents all key on the absolute path.
        let canonical = match fs::canonicalize(image) {
            Ok(path) if path.is_file() => path,
            _ => return Err(NmountError::InvalidImage(image.to_path_buf())),
        };
        let image = canonical.as_path();
        if mode == MountMode::Single && registry.find_by_image(image).is_some() {
            return Err(NmountError::AlreadyMounted(image.display().to_string()));
        }

        transition(image, MountState::Idle);
        let output = self.hal.loop_setup(image).map_err(udisks_err)?;
        let loop_device = parse_loop_device(&output)
            .ok_or_else(|| NmountError::NoLoopDeviceFound { output: output.clone() })?;
        let guard = LoopGuard::new(self.hal, loop_device.clone());
        transition(image, MountState::LoopProvisioned);

        if registry.find_by_loop(&loop_device).is_some() {
            log::warn!(
                "{} was handed out again; dropping its stale record",
                loop_device
            );
            registry.remove(&loop_device)?;
        }

        self.settle(&loop_device);
        transition(image, MountState::PartitionsSettled);

        let resolver = BlockResolver::new(self.hal);
        let candidate = resolver.pick_mountable_block(&loop_device);
        transition(image, MountState::MountAttempted);

        let (mount_device, output) = match self.try_mount(&resolver, &loop_device, candidate) {
            Ok(mounted) => mounted,
            Err(err) => {
                transition(image, MountState::Failed);
                drop(guard);
                return Err(err);
            }
        };

        let mount_point = self.resolve_mount_point(&output, &mount_device);
        let record = MountRecord {
            image_path: image.to_path_buf(),
            loop_device: guard.release(),
            mount_device,
            mount_point,
        };
        transition(image, MountState::Mounted);
        log::info!(
            "💿 mounted {} ({} via {}) at {}",
            record.image_path.display(),
            record.mount_device,
            record.loop_device,
            record.mount_point.display()
        );

        if let Err(err) = registry.add(record.clone()) {
            log::warn!("failed to persist mount state: {}", err);
        }
        if let Err(err) = self.store.add_recent_file(image) {
            log::warn!("failed to update recent files: {}", err);
        }
        self.refresh_file_managers();
        Ok(record)
    }

    /// Unmount the filesystem, then delete the loop. The first failure stops the sequence.
    pub fn unmount(
        &self,
        record: &MountRecord,
        registry: &mut MountRegistry<'_>,
    ) -> NmountResult<()> {
        self.require_udisks()?;
        log::info!(
            "unmounting {} ({})",
            record.mount_device,
            record.image_path.display()
        );
        self.hal
            .unmount_device(&record.mount_device)
            .map_err(|e| match udisks_err(e) {
                NmountError::Hal(e) => NmountError::UnmountFailed {
                    device: record.mount_device.clone(),
                    diagnostic: e.diagnostic(),
                },
                other => other,
            })?;
        self.hal
            .loop_delete(&record.loop_device)
            .map_err(|e| match udisks_err(e) {
                NmountError::Hal(e) => NmountError::LoopDeleteFailed {
                    loop_device: record.loop_device.clone(),
                    diagnostic: e.diagnostic(),
                },
                other => other,
            })?;
        registry.remove(&record.loop_device)?;
        Ok(())
    }

    fn require_udisks(&self) -> NmountResult<()> {
        if !self.tools.has(UDISKSCTL) {
            return Err(NmountError::ToolMissing(UDISKSCTL.to_string()));
        }
        Ok(())
    }

    /// Nudge the kernel into publishing partitions of hybrid images. Failures are ignored.
    fn settle(&self, loop_device: &str) {
        if self.tools.has(UDEVADM) {
            if let Err(err) = self.hal.udev_settle() {
                log::debug!("udevadm settle failed: {}", err);
            }
        }
        if self.tools.has(PARTPROBE) {
            if let Err(err) = self.hal.partprobe(loop_device) {
                log::debug!("partprobe {} failed: {}", loop_device, err);
            }
        }
        if self.tools.has(BLOCKDEV) {
            if let Err(err) = self.hal.blockdev_rereadpt(loop_device) {
                log::debug!("blockdev --rereadpt {} failed: {}", loop_device, err);
            }
        }
    }

    /// Mount `candidate`, falling back to each child partition. Returns the device that
    /// mounted and udisks' output.
    fn try_mount(
        &self,
        resolver: &BlockResolver<'_, H>,
        loop_device: &str,
        candidate: String,
    ) -> NmountResult<(String, String)> {
        let options = MountOptions::read_only();
        let first_err = match self.hal.mount_device(&candidate, &options) {
            Ok(output) => return Ok((candidate, output)),
            Err(err) if err.is_command_not_found() => {
                return Err(NmountError::ToolMissing(UDISKSCTL.to_string()))
            }
            Err(err) => err,
        };
        log::debug!("mount of {} failed: {}", candidate, first_err);

        for part in resolver.list_child_partitions(loop_device) {
            if part == candidate {
                continue;
            }
            match self.hal.mount_device(&part, &options) {
                Ok(output) => return Ok((part, output)),
                Err(err) => log::debug!("mount of {} failed: {}", part, err),
            }
        }

        Err(NmountError::MountFailed {
            device: candidate,
            diagnostic: first_err.diagnostic(),
        })
    }

    /// Parsed mount point, cross-checked against the live mount table.
    fn resolve_mount_point(&self, output: &str, mount_device: &str) -> PathBuf {
        let parsed = PathBuf::from(parse_mount_output(output));
        let probe = MountRecord {
            image_path: PathBuf::new(),
            loop_device: String::new(),
            mount_device: mount_device.to_string(),
            mount_point: parsed.clone(),
        };
        if probe.has_known_mount_point() && self.hal.is_mounted(&parsed).unwrap_or(false) {
            return parsed;
        }
        match self.hal.mount_table() {
            Ok(table) => {
                if let Some(found) = mount_points_for_source(&table, mount_device).into_iter().next()
                {
                    log::debug!("mount point of {} taken from the mount table", mount_device);
                    return found;
                }
            }
            Err(err) => log::debug!("mount table unreadable: {}", err),
        }
        parsed
    }

    fn refresh_file_managers(&self) {
        for kio in [KIOCLIENT5, KIOCLIENT6] {
            if !self.tools.has(kio) {
                continue;
            }
            if let Err(err) = self.hal.command_status(kio, &["refresh", "/"], REFRESH_TIMEOUT) {
                log::debug!("{} refresh failed: {}", kio, err);
            }
        }
    }
}

fn transition(image: &Path, state: MountState) {
    log::debug!("mount {}: {}", image.display(), state);
}

fn udisks_err(err: HalError) -> NmountError {
    if err.is_command_not_found() {
        return NmountError::ToolMissing(UDISKSCTL.to_string());
    }
    NmountError::Hal(err)
}
