//! Per-user desktop integration: binary in `~/.local/bin`, launcher, desktop shortcut and
//! autostart entry. Every created file is recorded in `Config.files`.

use crate::cleanup::CleanupReport;
use crate::config_store::ConfigStore;
use crate::failsafe::failsafe_unmount;
use crate::paths::{Paths, APP_NAME};
use crate::permissions::PermissionBootstrapper;
use crate::registry::MountRegistry;
use crate::tools::ToolSet;
use nmount_error::NmountResult;
use nmount_hal::SystemHal;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DESKTOP_DB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub binary: PathBuf,
    pub launcher: PathBuf,
    pub desktop_shortcut: PathBuf,
    pub config: PathBuf,
}

pub fn desktop_entry(exec_path: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={name}\n\
         Comment=Mount/Unmount ISO images\n\
         Exec={exec}\n\
         Icon=media-optical\n\
         Terminal=false\n\
         Categories=Utility;System;\n\
         StartupNotify=false\n",
        name = APP_NAME,
        exec = exec_path.display()
    )
}

pub fn autostart_entry(exec_path: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={name}\n\
         Comment=Auto start {name} on login\n\
         Exec={exec}\n\
         Icon=media-optical\n\
         Terminal=false\n\
         Categories=Utility;System;\n\
         X-GNOME-Autostart-enabled=true\n",
        name = APP_NAME,
        exec = exec_path.display()
    )
}

/// Installed means the flag is set and every recorded file still exists.
pub fn is_installed(store: &ConfigStore) -> bool {
    let cfg = store.read();
    cfg.installed && cfg.files.iter().all(|f| Path::new(f).exists())
}

/// The command desktop entries should launch.
pub fn exec_path(store: &ConfigStore, paths: &Paths, current_exe: &Path) -> PathBuf {
    if is_installed(store) {
        paths.app_bin.clone()
    } else {
        current_exe.to_path_buf()
    }
}

pub fn install<H: SystemHal + ?Sized>(
    hal: &H,
    store: &ConfigStore,
    paths: &Paths,
    current_exe: &Path,
    mount_base: &Path,
) -> NmountResult<InstallReport> {
    fs::create_dir_all(&paths.bin_dir)?;
    if !same_file(current_exe, &paths.app_bin) {
        fs::copy(current_exe, &paths.app_bin)?;
    }
    fs::set_permissions(&paths.app_bin, fs::Permissions::from_mode(0o755))?;

    write_desktop_file(&paths.app_launcher, &desktop_entry(&paths.app_bin), 0o644)?;
    // KDE only trusts executable desktop files on the Desktop.
    write_desktop_file(&paths.desktop_shortcut, &desktop_entry(&paths.app_bin), 0o755)?;

    let cfg = store.update(|cfg| {
        cfg.installed = true;
        cfg.mount_base = mount_base.to_path_buf();
        for file in [&paths.app_bin, &paths.app_launcher, &paths.desktop_shortcut] {
            cfg.files.insert(file.display().to_string());
        }
    })?;
    set_autostart(store, paths, cfg.autostart, &paths.app_bin)?;
    refresh_desktop_databases(hal, paths);

    log::info!("📦 installed {}", paths.app_bin.display());
    Ok(InstallReport {
        binary: paths.app_bin.clone(),
        launcher: paths.app_launcher.clone(),
        desktop_shortcut: paths.desktop_shortcut.clone(),
        config: store.path().to_path_buf(),
    })
}

pub fn set_autostart(
    store: &ConfigStore,
    paths: &Paths,
    enabled: bool,
    exec_path: &Path,
) -> NmountResult<()> {
    let autostart = paths.autostart_file.display().to_string();
    if enabled {
        write_desktop_file(&paths.autostart_file, &autostart_entry(exec_path), 0o644)?;
    } else {
        match fs::remove_file(&paths.autostart_file) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to remove {}: {}", autostart, err),
        }
    }
    store.update(|cfg| {
        cfg.autostart = enabled;
        if enabled {
            cfg.files.insert(autostart.clone());
        } else {
            cfg.files.remove(&autostart);
        }
    })?;
    Ok(())
}

/// Failsafe unmount, then remove autostart, polkit rule and installed files, then reset
/// the config keeping `mountBase`, `language` and `theme`.
pub fn uninstall<H: SystemHal + ?Sized>(
    hal: &H,
    tools: &ToolSet,
    paths: &Paths,
    registry: &mut MountRegistry<'_>,
) -> CleanupReport {
    let store = registry.store();
    let mut report = failsafe_unmount(hal, tools, registry);

    if let Err(err) = remove_if_exists(&paths.autostart_file) {
        report.record("remove", &paths.autostart_file.display().to_string(), err);
    }

    report.merge(PermissionBootstrapper::new(hal, store, paths).remove());

    let cfg = store.read();
    for file in &cfg.files {
        if let Err(err) = remove_if_exists(Path::new(file)) {
            report.record("remove", file, err);
        }
    }
    for dir in [&paths.apps_dir, &paths.bin_dir] {
        remove_dir_if_empty(dir);
    }

    if let Err(err) = store.write(&cfg.reset_for_uninstall()) {
        report.record("config", &store.path().display().to_string(), err);
    }
    refresh_desktop_databases(hal, paths);
    log::info!("uninstalled ({} cleanup failure(s))", report.failures.len());
    report
}

fn write_desktop_file(path: &Path, content: &str, mode: u32) -> NmountResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_dir_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        if let Err(err) = fs::remove_dir(dir) {
            log::debug!("could not remove {}: {}", dir.display(), err);
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Ask menus to pick up launcher changes. Best-effort.
fn refresh_desktop_databases<H: SystemHal + ?Sized>(hal: &H, paths: &Paths) {
    let apps_dir = paths.apps_dir.display().to_string();
    let commands: [(&str, Vec<&str>); 4] = [
        ("update-desktop-database", vec![apps_dir.as_str()]),
        ("xdg-desktop-menu", vec!["forceupdate"]),
        ("kbuildsycoca6", vec![]),
        ("kbuildsycoca5", vec![]),
    ];
    for (program, args) in commands {
        if hal.which(program).is_none() {
            continue;
        }
        if let Err(err) = hal.command_status(program, &args, DESKTOP_DB_TIMEOUT) {
            log::debug!("{} failed: {}", program, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountRecord;
    use crate::test_env::TestEnv;
    use nmount_hal::Operation;

    fn fake_exe(env: &TestEnv) -> PathBuf {
        let exe = env.dir.path().join("build/nmount");
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, b"\x7fELF").unwrap();
        exe
    }

    #[test]
    fn install_places_files_and_records_them() {
        let env = TestEnv::new();
        let exe = fake_exe(&env);
        let mount_base = env.paths.default_mount_base.clone();

        let report = install(&env.hal, &env.store, &env.paths, &exe, &mount_base).unwrap();

        assert_eq!(report.binary, env.paths.app_bin);
        let mode = fs::metadata(&env.paths.app_bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let launcher = fs::read_to_string(&env.paths.app_launcher).unwrap();
        assert!(launcher.contains(&format!("Exec={}", env.paths.app_bin.display())));
        assert!(env.paths.desktop_shortcut.exists());
        assert!(!env.paths.autostart_file.exists());

        let cfg = env.store.read();
        assert!(cfg.installed);
        assert_eq!(cfg.files.len(), 3);
        assert!(is_installed(&env.store));
        assert_eq!(exec_path(&env.store, &env.paths, &exe), env.paths.app_bin);
        assert!(env.hal.has_operation(|op| matches!(
            op,
            Operation::Command { program, .. } if program == "update-desktop-database"
        )));
    }

    #[test]
    fn install_keeps_autostart_preference() {
        let env = TestEnv::new();
        env.store.update(|cfg| cfg.autostart = true).unwrap();
        let exe = fake_exe(&env);

        install(&env.hal, &env.store, &env.paths, &exe, Path::new("/data/mnt")).unwrap();

        let entry = fs::read_to_string(&env.paths.autostart_file).unwrap();
        assert!(entry.contains("X-GNOME-Autostart-enabled=true"));
        let cfg = env.store.read();
        assert!(cfg
            .files
            .contains(&env.paths.autostart_file.display().to_string()));
        assert_eq!(cfg.mount_base, PathBuf::from("/data/mnt"));
    }

    #[test]
    fn autostart_toggle_tracks_file() {
        let env = TestEnv::new();
        let exe = fake_exe(&env);
        set_autostart(&env.store, &env.paths, true, &exe).unwrap();
        assert!(env.paths.autostart_file.exists());
        assert!(env.store.read().autostart);

        set_autostart(&env.store, &env.paths, false, &exe).unwrap();
        assert!(!env.paths.autostart_file.exists());
        let cfg = env.store.read();
        assert!(!cfg.autostart);
        assert!(cfg.files.is_empty());
    }

    #[test]
    fn uninstall_removes_everything_and_resets_config() {
        let env = TestEnv::new();
        env.grant_permissions();
        let exe = fake_exe(&env);
        install(&env.hal, &env.store, &env.paths, &exe, Path::new("/data/mnt")).unwrap();
        set_autostart(&env.store, &env.paths, true, &env.paths.app_bin).unwrap();
        env.store
            .update(|cfg| {
                cfg.language = "hr".to_string();
                cfg.theme = "Dark".to_string();
            })
            .unwrap();

        env.hal.attach_loop("/dev/loop0");
        env.hal
            .mark_mounted("/dev/loop0", Path::new("/run/media/tester/ISO"));
        let mut registry = MountRegistry::new(&env.store);
        registry
            .add(MountRecord {
                image_path: PathBuf::from("/isos/a.iso"),
                loop_device: "/dev/loop0".to_string(),
                mount_device: "/dev/loop0".to_string(),
                mount_point: PathBuf::from("/run/media/tester/ISO"),
            })
            .unwrap();

        let report = uninstall(&env.hal, &ToolSet::all(), &env.paths, &mut registry);

        assert!(report.is_clean(), "{:?}", report);
        assert!(!env.hal.is_loop_attached("/dev/loop0"));
        for path in [
            &env.paths.app_bin,
            &env.paths.app_launcher,
            &env.paths.desktop_shortcut,
            &env.paths.autostart_file,
            &env.paths.polkit_rule,
        ] {
            assert!(!path.exists(), "{} still exists", path.display());
        }
        assert!(!env.paths.bin_dir.exists());

        let cfg = env.store.read();
        assert!(!cfg.installed);
        assert!(!cfg.polkit_rule_installed);
        assert!(cfg.files.is_empty());
        assert!(cfg.last_mount.is_none());
        assert_eq!(cfg.mount_base, PathBuf::from("/data/mnt"));
        assert_eq!(cfg.language, "hr");
        assert_eq!(cfg.theme, "Dark");
    }
}
