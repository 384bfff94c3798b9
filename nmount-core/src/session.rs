//! Process lifecycle hooks: what runs once at startup and once on exit.

use crate::cleanup::CleanupReport;
use crate::failsafe::failsafe_unmount;
use crate::paths::Paths;
use crate::permissions::PermissionBootstrapper;
use crate::registry::MountRegistry;
use crate::tools::ToolSet;
use nmount_hal::SystemHal;

#[derive(Debug, Clone)]
pub struct Startup {
    pub tools: ToolSet,
    /// Result of removing a polkit rule we did not write.
    pub stale_rule: CleanupReport,
    /// Persisted mounts re-adopted into the registry.
    pub restored: usize,
}

/// Detect tools, drop a foreign polkit rule and re-adopt mounts that survived a restart.
/// Never fails; problems are logged.
pub fn startup<H: SystemHal + ?Sized>(
    hal: &H,
    paths: &Paths,
    registry: &mut MountRegistry<'_>,
) -> Startup {
    log::debug!("🔍 detecting tools");
    let tools = ToolSet::detect(hal);
    let stale_rule = PermissionBootstrapper::new(hal, registry.store(), paths).cleanup_stale();

    let restored = match hal.mount_table() {
        Ok(table) => match registry.reconcile_on_startup(&table) {
            Ok(count) => count,
            Err(err) => {
                log::warn!("failed to persist reconciled mounts: {}", err);
                registry.list_active().len()
            }
        },
        Err(err) => {
            log::warn!("mount table unreadable, skipping reconcile: {}", err);
            0
        }
    };

    Startup {
        tools,
        stale_rule,
        restored,
    }
}

/// Tear everything down when `autoUnmountOnExit` is set. `None` when the setting is off.
pub fn on_exit<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    registry: &mut MountRegistry<'_>,
) -> Option<CleanupReport> {
    if !registry.store().read().auto_unmount_on_exit {
        return None;
    }
    log::info!("auto-unmount on exit");
    Some(failsafe_unmount(hal, tools, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountRecord;
    use crate::test_env::TestEnv;
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
    fn startup_restores_live_mounts_and_drops_foreign_rule() {
        let env = TestEnv::new();
        env.write_rule("polkit.addRule(function() {});\n");
        env.hal.attach_loop("/dev/loop0");
        env.hal
            .mark_mounted("/dev/loop0", Path::new("/run/media/tester/A"));
        env.store
            .update(|cfg| {
                cfg.active_mounts = vec![
                    record("/dev/loop0", "/run/media/tester/A"),
                    record("/dev/loop1", "/run/media/tester/B"),
                ]
            })
            .unwrap();

        let mut registry = MountRegistry::new(&env.store);
        let startup = startup(&env.hal, &env.paths, &mut registry);

        assert_eq!(startup.restored, 1);
        assert!(startup.stale_rule.is_clean());
        assert!(!env.paths.polkit_rule.exists());
        assert!(startup.tools.missing_required().is_empty());
        assert_eq!(registry.list_active()[0].loop_device, "/dev/loop0");
    }

    #[test]
    fn startup_keeps_our_rule() {
        let env = TestEnv::new();
        env.grant_permissions();
        let mut registry = MountRegistry::new(&env.store);
        startup(&env.hal, &env.paths, &mut registry);
        assert!(env.permissions().is_configured());
    }

    #[test]
    fn on_exit_respects_setting() {
        let env = TestEnv::new();
        env.hal.attach_loop("/dev/loop0");
        let mut registry = MountRegistry::new(&env.store);
        registry
            .add(record("/dev/loop0", "/run/media/tester/A"))
            .unwrap();

        assert!(on_exit(&env.hal, &ToolSet::all(), &mut registry).is_none());
        assert!(env.hal.is_loop_attached("/dev/loop0"));

        env.store
            .update(|cfg| cfg.auto_unmount_on_exit = true)
            .unwrap();
        let report = on_exit(&env.hal, &ToolSet::all(), &mut registry).unwrap();
        assert!(report.is_clean());
        assert!(!env.hal.is_loop_attached("/dev/loop0"));
        assert!(registry.is_empty());
    }
}
