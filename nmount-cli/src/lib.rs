use anyhow::{bail, Context};
use clap::Parser;
use nmount_core::checksum::{matches_expected, sha256_file};
use nmount_core::cli::{Cli, Command, SettingKey};
use nmount_core::config_store::ConfigStore;
use nmount_core::driver::{MountDriver, MountMode};
use nmount_core::installer;
use nmount_core::paths::Paths;
use nmount_core::permissions::{InstallOutcome, PermissionBootstrapper};
use nmount_core::registry::MountRegistry;
use nmount_core::session;
use nmount_core::tools::ToolSet;
use nmount_hal::{LinuxHal, SystemHal};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Exit code for conflicting top-level flags.
pub const EXIT_USAGE: u8 = 2;

pub fn run() -> anyhow::Result<u8> {
    let cli = Cli::parse();
    let mut paths = Paths::from_env().context("Unable to resolve home directory")?;
    if let Some(config) = cli.config.as_ref() {
        paths = paths.with_config_file(config);
    }
    nmount_core::logging::init(&paths.log_file, cli.verbose);

    let exe = std::env::current_exe().context("Unable to locate the running executable")?;
    let hal = LinuxHal::new();
    let stdout = io::stdout();
    run_with(&cli, &hal, &paths, &exe, &mut stdout.lock())
}

/// Everything behind argument parsing, with the host and output injected.
pub fn run_with<H: SystemHal + ?Sized>(
    cli: &Cli,
    hal: &H,
    paths: &Paths,
    exe: &Path,
    out: &mut dyn Write,
) -> anyhow::Result<u8> {
    if cli.install && cli.uninstall {
        eprintln!("Choose either --install or --uninstall, not both.");
        return Ok(EXIT_USAGE);
    }

    let store = ConfigStore::new(&paths.config_file, &paths.default_mount_base);

    if cli.install {
        let mount_base = cli
            .mount_base
            .clone()
            .unwrap_or_else(|| store.mount_base(&store.read()));
        log::info!("📦 Installing NMount...");
        let report = installer::install(hal, &store, paths, exe, &mount_base)
            .context("Installation failed")?;
        writeln!(out, "Installed to {}", report.binary.display())?;
        writeln!(out, "Menu launcher: {}", report.launcher.display())?;
        writeln!(out, "Desktop shortcut: {}", report.desktop_shortcut.display())?;
        writeln!(out, "Config: {}", report.config.display())?;
        return Ok(0);
    }

    let mut registry = MountRegistry::new(&store);

    // Uninstall releases every persisted loop, including those whose mount already vanished.
    if cli.uninstall {
        log::info!("🧹 Uninstalling NMount...");
        let tools = ToolSet::detect(hal);
        registry.adopt_persisted();
        let report = installer::uninstall(hal, &tools, paths, &mut registry);
        for failure in &report.failures {
            writeln!(out, "warning: {}", failure)?;
        }
        writeln!(out, "Uninstalled.")?;
        return Ok(0);
    }

    let startup = session::startup(hal, paths, &mut registry);

    let permissions = PermissionBootstrapper::new(hal, &store, paths);
    let driver = MountDriver::new(hal, &startup.tools, &store, &permissions);

    match cli.command() {
        Command::Status => {
            print_status(out, &store, &startup.tools, &permissions, &registry)?;
            Ok(0)
        }
        Command::Quit => match session::on_exit(hal, &startup.tools, &mut registry) {
            Some(report) => {
                for failure in &report.failures {
                    writeln!(out, "warning: {}", failure)?;
                }
                writeln!(out, "Unmounted all images.")?;
                Ok(if report.is_clean() { 0 } else { 1 })
            }
            None => {
                writeln!(out, "Session ended; mounts left in place.")?;
                Ok(0)
            }
        },
        Command::Mount { iso, multi } => {
            let mode = if multi {
                MountMode::Multi
            } else {
                MountMode::Single
            };
            let record = driver
                .mount(&iso, mode, &mut registry)
                .with_context(|| format!("Unable to mount {}", iso.display()))?;
            writeln!(
                out,
                "Mounted {} at {} ({})",
                record.image_path.display(),
                record.mount_point.display(),
                record.mount_device
            )?;
            Ok(0)
        }
        Command::Unmount { target } => {
            let records = match target.as_deref() {
                Some(target) => vec![registry.find_target(target)?.clone()],
                None => registry.list_active().to_vec(),
            };
            if records.is_empty() {
                writeln!(out, "Nothing mounted.")?;
                return Ok(0);
            }
            for record in records {
                driver
                    .unmount(&record, &mut registry)
                    .with_context(|| format!("Unable to unmount {}", record.image_path.display()))?;
                writeln!(out, "Unmounted {}", record.image_path.display())?;
            }
            Ok(0)
        }
        Command::FixPermissions => match permissions
            .install()
            .context("Unable to configure permissions")?
        {
            InstallOutcome::AlreadyConfigured => {
                writeln!(out, "Permissions already configured.")?;
                Ok(0)
            }
            InstallOutcome::Installed => {
                writeln!(
                    out,
                    "Polkit rule installed at {}",
                    permissions.rule_path().display()
                )?;
                Ok(0)
            }
            InstallOutcome::ManualCommand(cmd) => {
                writeln!(out, "pkexec is not available. Run this as root:")?;
                writeln!(out, "  {}", cmd)?;
                Ok(1)
            }
        },
        Command::Autostart { state } => {
            let exec = installer::exec_path(&store, paths, exe);
            installer::set_autostart(&store, paths, state.enabled(), &exec)
                .context("Unable to change autostart")?;
            writeln!(
                out,
                "Autostart {}",
                if state.enabled() { "enabled" } else { "disabled" }
            )?;
            Ok(0)
        }
        Command::Recent => {
            let cfg = store.read();
            if cfg.recent_files.is_empty() {
                writeln!(out, "No recent images.")?;
            }
            for path in &cfg.recent_files {
                writeln!(out, "{}", path.display())?;
            }
            Ok(0)
        }
        Command::Checksum { iso, expect } => {
            let cancel = AtomicBool::new(false);
            let mut last_percent = None;
            let digest = sha256_file(&iso, &cancel, &mut |progress| {
                let percent = progress.percent();
                if last_percent != Some(percent) {
                    log::debug!("checksum {}%", percent);
                    last_percent = Some(percent);
                }
            })
            .with_context(|| format!("Unable to hash {}", iso.display()))?;
            writeln!(out, "{}  {}", digest, iso.display())?;
            match expect {
                Some(expected) if !matches_expected(&digest, &expected) => {
                    writeln!(out, "MISMATCH (expected {})", expected.trim())?;
                    Ok(1)
                }
                Some(_) => {
                    writeln!(out, "OK")?;
                    Ok(0)
                }
                None => Ok(0),
            }
        }
        Command::Set { key, value } => {
            apply_setting(&store, key, &value)?;
            writeln!(out, "Saved.")?;
            Ok(0)
        }
    }
}

fn apply_setting(store: &ConfigStore, key: SettingKey, value: &str) -> anyhow::Result<()> {
    match key {
        SettingKey::Language => {
            let value = value.trim().to_string();
            store.update(|cfg| cfg.language = value)?;
        }
        SettingKey::Theme => {
            let value = value.trim().to_string();
            store.update(|cfg| cfg.theme = value)?;
        }
        SettingKey::AutoUnmountOnExit => {
            let enabled = parse_bool(value)?;
            store.update(|cfg| cfg.auto_unmount_on_exit = enabled)?;
        }
        SettingKey::RecentFilesMax => {
            let max: usize = value
                .trim()
                .parse()
                .with_context(|| format!("Not a number: {}", value))?;
            if max == 0 {
                bail!("recent-files-max must be at least 1");
            }
            store.update(|cfg| {
                cfg.recent_files_max = max;
                cfg.recent_files.truncate(max);
            })?;
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => bail!("Expected true/false, got {:?}", other),
    }
}

fn print_status<H: SystemHal + ?Sized>(
    out: &mut dyn Write,
    store: &ConfigStore,
    tools: &ToolSet,
    permissions: &PermissionBootstrapper<'_, H>,
    registry: &MountRegistry<'_>,
) -> io::Result<()> {
    let cfg = store.read();
    writeln!(out, "NMount")?;
    let missing = tools.missing_required();
    if missing.is_empty() {
        writeln!(out, "  Tools:       ok")?;
    } else {
        writeln!(out, "  Tools:       missing {}", missing.join(", "))?;
    }
    if permissions.is_configured() {
        writeln!(out, "  Permissions: configured")?;
    } else {
        writeln!(
            out,
            "  Permissions: not configured (run `nmount fix-permissions`)"
        )?;
    }
    writeln!(
        out,
        "  Installed:   {}",
        if installer::is_installed(store) { "yes" } else { "no" }
    )?;
    writeln!(out, "  Mount base:  {}", store.mount_base(&cfg).display())?;
    writeln!(out, "  Mounted:     {}", registry.list_active().len())?;
    for record in registry.list_active() {
        writeln!(
            out,
            "    {} -> {} ({})",
            record.image_path.display(),
            record.mount_point.display(),
            record.loop_device
        )?;
    }
    Ok(())
}
