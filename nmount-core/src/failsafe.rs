//! Best-effort, idempotent teardown of every known mount.
//!
//! Used by uninstall and by `autoUnmountOnExit`. Nothing here returns an error: every failed
//! step lands in the [`CleanupReport`].

use crate::cleanup::CleanupReport;
use crate::config::MountRecord;
use crate::registry::MountRegistry;
use crate::tools::{ToolSet, LOSETUP, UDISKSCTL, UMOUNT};
use nmount_hal::procfs::mountinfo::mount_points_for_source;
use nmount_hal::SystemHal;

pub fn failsafe_unmount<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    registry: &mut MountRegistry<'_>,
) -> CleanupReport {
    let mut report = CleanupReport::new();

    let records: Vec<MountRecord> = if registry.is_empty() {
        registry.store().read().last_mount.into_iter().collect()
    } else {
        registry.list_active().to_vec()
    };
    if records.is_empty() {
        log::debug!("failsafe: nothing to tear down");
        return report;
    }

    for record in &records {
        teardown(hal, tools, record, &mut report);
        if let Err(err) = registry.remove(&record.loop_device) {
            report.record("forget", &record.loop_device, err);
        }
    }
    log::info!(
        "🧹 failsafe teardown of {} mount(s) finished with {} failure(s)",
        records.len(),
        report.failures.len()
    );
    report
}

fn teardown<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    record: &MountRecord,
    report: &mut CleanupReport,
) {
    if still_mounted(hal, record) {
        unmount(hal, tools, record, report);
    } else {
        log::info!(
            "{} is no longer mounted, only releasing {}",
            record.mount_point.display(),
            record.loop_device
        );
    }
    delete_loop(hal, tools, &record.loop_device, report);
}

fn still_mounted<H: SystemHal + ?Sized>(hal: &H, record: &MountRecord) -> bool {
    if record.has_known_mount_point() {
        return hal.is_mounted(&record.mount_point).unwrap_or(true);
    }
    match hal.mount_table() {
        Ok(table) => !mount_points_for_source(&table, &record.mount_device).is_empty(),
        Err(_) => true,
    }
}

fn unmount<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    record: &MountRecord,
    report: &mut CleanupReport,
) {
    let mut last_err = None;
    if tools.has(UDISKSCTL) {
        match hal.unmount_device(&record.mount_device) {
            Ok(()) => return,
            Err(err) => {
                log::debug!("udisksctl unmount {} failed: {}", record.mount_device, err);
                last_err = Some(err.to_string());
            }
        }
    }
    if tools.has(UMOUNT) && record.has_known_mount_point() {
        match hal.unmount_path(&record.mount_point) {
            Ok(()) => return,
            Err(err) => last_err = Some(err.to_string()),
        }
    }
    report.record(
        "unmount",
        &record.mount_device,
        last_err.unwrap_or_else(|| "no unmount tool available".to_string()),
    );
}

fn delete_loop<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    loop_device: &str,
    report: &mut CleanupReport,
) {
    let mut last_err = None;
    if tools.has(UDISKSCTL) {
        match hal.loop_delete(loop_device) {
            Ok(()) => return,
            Err(err) => {
                log::debug!("udisksctl loop-delete {} failed: {}", loop_device, err);
                last_err = Some(err.to_string());
            }
        }
    }
    if tools.has(LOSETUP) {
        match hal.losetup_detach(loop_device) {
            Ok(()) => return,
            Err(err) => last_err = Some(err.to_string()),
        }
    }
    report.record(
        "loop-delete",
        loop_device,
        last_err.unwrap_or_else(|| "no loop tool available".to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::TestEnv;
    use nmount_hal::Operation;
    use std::path::{Path, PathBuf};

    fn record(loop_device: &str, mount_point: &str) -> MountRecord {
        MountRecord {
            image_path: PathBuf::from("/isos/a.iso"),
            loop_device: loop_device.to_string(),
            mount_device: loop_device.to_string(),
            mount_point: PathBuf::from(mount_point),
        }
    }

    #[test]
    fn tears_down_every_active_mount() {
        let env = TestEnv::new();
        let mut registry = MountRegistry::new(&env.store);
        for (idx, mp) in ["/run/media/tester/A", "/run/media/tester/B"].iter().enumerate() {
            let dev = format!("/dev/loop{}", idx);
            env.hal.attach_loop(&dev);
            env.hal.mark_mounted(&dev, Path::new(mp));
            registry.add(record(&dev, mp)).unwrap();
        }

        let report = failsafe_unmount(&env.hal, &ToolSet::all(), &mut registry);

        assert!(report.is_clean());
        assert!(registry.is_empty());
        assert!(!env.hal.is_loop_attached("/dev/loop0"));
        assert!(!env.hal.is_loop_attached("/dev/loop1"));
        let cfg = env.store.read();
        assert!(cfg.active_mounts.is_empty());
        assert!(cfg.last_mount.is_none());
    }

    #[test]
    fn already_unmounted_still_deletes_loop_without_error() {
        let env = TestEnv::new();
        env.hal.attach_loop("/dev/loop0");
        env.store
            .update(|cfg| cfg.last_mount = Some(record("/dev/loop0", "/run/media/tester/GONE")))
            .unwrap();
        let mut registry = MountRegistry::new(&env.store);

        let report = failsafe_unmount(&env.hal, &ToolSet::all(), &mut registry);

        assert!(report.is_clean());
        assert!(!env.hal.has_operation(|op| matches!(op, Operation::UnmountDevice { .. })));
        assert!(env.hal.has_operation(|op| matches!(
            op,
            Operation::LoopDelete { loop_device } if loop_device == "/dev/loop0"
        )));
        assert!(env.store.read().last_mount.is_none());
    }

    #[test]
    fn falls_back_to_umount_and_losetup() {
        let env = TestEnv::new();
        env.hal.attach_loop("/dev/loop2");
        env.hal
            .mark_mounted("/dev/loop2", Path::new("/run/media/tester/X"));
        env.hal.fail_unmount("/dev/loop2", "busy");
        env.hal.fail_loop_delete("/dev/loop2", "busy");
        let mut registry = MountRegistry::new(&env.store);
        registry
            .add(record("/dev/loop2", "/run/media/tester/X"))
            .unwrap();

        let report = failsafe_unmount(&env.hal, &ToolSet::all(), &mut registry);

        assert!(report.is_clean(), "{:?}", report);
        assert!(env.hal.has_operation(|op| matches!(op, Operation::UnmountPath { .. })));
        assert!(env.hal.has_operation(|op| matches!(op, Operation::LosetupDetach { .. })));
        assert!(!env.hal.is_loop_attached("/dev/loop2"));
    }

    #[test]
    fn umount_fallback_needs_umount_on_path() {
        let env = TestEnv::new();
        env.hal.attach_loop("/dev/loop3");
        env.hal
            .mark_mounted("/dev/loop3", Path::new("/run/media/tester/Z"));
        env.hal.fail_unmount("/dev/loop3", "target is busy");
        let mut registry = MountRegistry::new(&env.store);
        registry
            .add(record("/dev/loop3", "/run/media/tester/Z"))
            .unwrap();

        let tools = ToolSet::all().without(UMOUNT);
        let report = failsafe_unmount(&env.hal, &tools, &mut registry);

        let steps: Vec<_> = report.failures.iter().map(|f| f.step.as_str()).collect();
        assert_eq!(steps, vec!["unmount"]);
        assert!(report.failures[0].message.contains("target is busy"));
        assert!(!env.hal.has_operation(|op| matches!(op, Operation::UnmountPath { .. })));
        assert!(!env.hal.is_loop_attached("/dev/loop3"));
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let env = TestEnv::new();
        let mut registry = MountRegistry::new(&env.store);
        registry
            .add(record("/dev/loop7", "/run/media/tester/Y"))
            .unwrap();
        env.hal.set_mounted(Path::new("/run/media/tester/Y"));

        let tools = ToolSet::all().without(LOSETUP);
        let report = failsafe_unmount(&env.hal, &tools, &mut registry);

        let steps: Vec<_> = report.failures.iter().map(|f| f.step.as_str()).collect();
        assert_eq!(steps, vec!["loop-delete"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn nothing_to_do_is_clean() {
        let env = TestEnv::new();
        let mut registry = MountRegistry::new(&env.store);
        assert!(failsafe_unmount(&env.hal, &ToolSet::all(), &mut registry).is_clean());
        assert_eq!(env.hal.operation_count(), 0);
    }
}
