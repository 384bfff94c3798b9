use clap::Parser;
use nmount_cli::{run_with, EXIT_USAGE};
use nmount_core::cli::Cli;
use nmount_core::config::MountRecord;
use nmount_core::config_store::ConfigStore;
use nmount_core::paths::Paths;
use nmount_hal::{FakeHal, Operation};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    paths: Paths,
    hal: FakeHal,
    exe: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::from_home(dir.path().join("home"))
            .with_polkit_rule(dir.path().join("etc/polkit-1/rules.d/90-nmount.rules"));
        let exe = dir.path().join("target/nmount");
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, b"\x7fELF").unwrap();
        Self {
            dir,
            paths,
            hal: FakeHal::new(),
            exe,
        }
    }

    fn run(&self, args: &[&str]) -> (u8, String) {
        let cli = Cli::parse_from(std::iter::once("nmount").chain(args.iter().copied()));
        let mut out = Vec::new();
        let code = run_with(&cli, &self.hal, &self.paths, &self.exe, &mut out).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    fn run_err(&self, args: &[&str]) -> String {
        let cli = Cli::parse_from(std::iter::once("nmount").chain(args.iter().copied()));
        let mut out = Vec::new();
        let err = run_with(&cli, &self.hal, &self.paths, &self.exe, &mut out).unwrap_err();
        format!("{:#}", err)
    }

    fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.paths.config_file, &self.paths.default_mount_base)
    }

    fn image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, b"CD001").unwrap();
        path
    }
}

#[test]
fn install_and_uninstall_together_is_a_usage_error() {
    let h = Harness::new();
    let (code, out) = h.run(&["--install", "--uninstall"]);
    assert_eq!(code, EXIT_USAGE);
    assert!(out.is_empty());
    assert!(!h.paths.app_bin.exists());
}

#[test]
fn mount_requires_permissions_first() {
    let h = Harness::new();
    let iso = h.image("a.iso");
    let err = h.run_err(&["mount", iso.to_str().unwrap()]);
    assert!(err.contains("fix permissions"), "{}", err);
    assert_eq!(h.hal.operation_count(), 0);
}

#[test]
fn fix_permissions_then_mount_and_unmount_all() {
    let h = Harness::new();
    let (code, out) = h.run(&["fix-permissions"]);
    assert_eq!(code, 0);
    assert!(out.contains("Polkit rule installed"));
    assert!(h.paths.polkit_rule.exists());

    let iso = h.image("debian.iso");
    let (code, out) = h.run(&["mount", iso.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert!(out.contains("/run/media/tester/loop0"), "{}", out);

    let (_, status) = h.run(&["status"]);
    assert!(status.contains("Permissions: configured"));
    assert!(status.contains("Mounted:     1"));

    let (_, recent) = h.run(&["recent"]);
    assert!(recent.contains("debian.iso"));

    let (code, out) = h.run(&["unmount"]);
    assert_eq!(code, 0);
    assert!(out.contains("Unmounted"));
    assert!(!h.hal.is_loop_attached("/dev/loop0"));
    assert!(h.store().read().active_mounts.is_empty());
}

#[test]
fn fix_permissions_without_pkexec_prints_manual_command() {
    let mut h = Harness::new();
    h.hal = FakeHal::new().without_tool("pkexec");
    let (code, out) = h.run(&["fix-permissions"]);
    assert_eq!(code, 1);
    assert!(out.contains("sudo install -m 0644"));
}

#[test]
fn unmount_of_unknown_target_fails() {
    let h = Harness::new();
    let err = h.run_err(&["unmount", "/dev/loop9"]);
    assert!(err.contains("Nothing mounted for /dev/loop9"), "{}", err);
}

#[test]
fn status_is_read_only_and_quit_applies_auto_unmount() {
    let h = Harness::new();
    h.run(&["fix-permissions"]);
    let iso = h.image("a.iso");
    h.run(&["mount", iso.to_str().unwrap()]);

    let (code, out) = h.run(&["quit"]);
    assert_eq!(code, 0);
    assert!(out.contains("mounts left in place"));
    assert!(h.hal.is_loop_attached("/dev/loop0"));

    let (code, _) = h.run(&["set", "auto-unmount-on-exit", "on"]);
    assert_eq!(code, 0);
    let (_, status) = h.run(&["status"]);
    assert!(status.contains("Mounted:     1"), "{}", status);
    assert!(h.hal.is_loop_attached("/dev/loop0"));
    assert!(h.store().read().last_mount.is_some());

    let (code, out) = h.run(&["quit"]);
    assert_eq!(code, 0);
    assert!(out.contains("Unmounted all images."));
    assert!(!h.hal.is_loop_attached("/dev/loop0"));
    assert!(h.store().read().last_mount.is_none());
}

#[test]
fn relative_and_aliased_image_paths_resolve_to_one_mount() {
    let h = Harness::new();
    h.run(&["fix-permissions"]);
    let iso = h.image("debian.iso");
    let canonical = fs::canonicalize(&iso).unwrap();
    let aliased = h.dir.path().join("sub/../debian.iso");
    fs::create_dir_all(h.dir.path().join("sub")).unwrap();

    let (code, out) = h.run(&["mount", aliased.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert!(out.contains(&canonical.display().to_string()), "{}", out);

    let err = h.run_err(&["mount", iso.to_str().unwrap()]);
    assert!(err.contains("already mounted"), "{}", err);

    let cfg = h.store().read();
    assert_eq!(cfg.recent_files, vec![canonical.clone()]);
    assert_eq!(cfg.active_mounts[0].image_path, canonical);

    let (code, _) = h.run(&["unmount", aliased.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert!(!h.hal.is_loop_attached("/dev/loop0"));
}

#[test]
fn uninstall_releases_loop_whose_mount_vanished() {
    let h = Harness::new();
    h.hal.attach_loop("/dev/loop0");
    h.store()
        .update(|cfg| {
            cfg.last_mount = Some(MountRecord {
                image_path: PathBuf::from("/isos/a.iso"),
                loop_device: "/dev/loop0".to_string(),
                mount_device: "/dev/loop0".to_string(),
                mount_point: PathBuf::from("/run/media/tester/GONE"),
            })
        })
        .unwrap();
    assert!(h.hal.mount_point_of("/dev/loop0").is_none());

    let (code, out) = h.run(&["--uninstall"]);
    assert_eq!(code, 0);
    assert!(out.ends_with("Uninstalled.\n"), "{}", out);
    assert!(h.hal.has_operation(|op| matches!(
        op,
        Operation::LoopDelete { loop_device } if loop_device == "/dev/loop0"
    )));
    assert!(!h.hal.is_loop_attached("/dev/loop0"));
    let cfg = h.store().read();
    assert!(cfg.last_mount.is_none());
    assert!(cfg.active_mounts.is_empty());
}

#[test]
fn install_then_uninstall_round_trip() {
    let h = Harness::new();
    let (code, out) = h.run(&["--install", "--mount-base", "/data/iso"]);
    assert_eq!(code, 0);
    assert!(out.starts_with(&format!("Installed to {}", h.paths.app_bin.display())));
    assert!(out.contains("Desktop shortcut:"));
    assert!(h.paths.app_launcher.exists());

    let (code, _) = h.run(&["autostart", "on"]);
    assert_eq!(code, 0);
    let entry = fs::read_to_string(&h.paths.autostart_file).unwrap();
    assert!(entry.contains(&format!("Exec={}", h.paths.app_bin.display())));

    let (code, out) = h.run(&["--uninstall"]);
    assert_eq!(code, 0);
    assert!(out.ends_with("Uninstalled.\n"));
    assert!(!h.paths.app_bin.exists());
    assert!(!h.paths.autostart_file.exists());
    let cfg = h.store().read();
    assert!(!cfg.installed);
    assert_eq!(cfg.mount_base, PathBuf::from("/data/iso"));
}

#[test]
fn checksum_reports_mismatch_with_exit_code() {
    let h = Harness::new();
    let iso = h.image("a.iso");
    let (code, out) = h.run(&["checksum", iso.to_str().unwrap(), "--expect", "00"]);
    assert_eq!(code, 1);
    assert!(out.contains("MISMATCH"));
}

#[test]
fn set_rejects_bad_values() {
    let h = Harness::new();
    let err = h.run_err(&["set", "auto-unmount-on-exit", "sometimes"]);
    assert!(err.contains("Expected true/false"));
    let (code, _) = h.run(&["set", "theme", "Dark"]);
    assert_eq!(code, 0);
    assert_eq!(h.store().read().theme, "Dark");
}
