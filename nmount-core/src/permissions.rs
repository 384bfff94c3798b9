//! Polkit rule bootstrap.
//!
//! A one-time rule lets the active local user drive udisks loop and mount actions without a
//! password prompt per mount. The rule is staged in the user's cache and copied into
//! `/etc/polkit-1/rules.d` through `pkexec install`.

use crate::cleanup::CleanupReport;
use crate::config_store::ConfigStore;
use crate::paths::Paths;
use crate::tools::PKEXEC;
use nmount_error::{NmountError, NmountResult};
use nmount_hal::SystemHal;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

/// First line of every rule we generate.
pub const RULE_MARKER: &str = "// # Managed by NMount";

static USERNAME_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyConfigured,
    Installed,
    /// `pkexec` is unavailable; the user has to run this command themselves.
    ManualCommand(String),
}

pub fn is_valid_username(user: &str) -> bool {
    USERNAME_RE
        .as_ref()
        .is_some_and(|re| re.is_match(user))
}

pub fn rule_text_for_user(user: &str) -> NmountResult<String> {
    if !is_valid_username(user) {
        return Err(NmountError::InvalidUsername(user.to_string()));
    }
    Ok(format!(
        r#"{marker}
polkit.addRule(function(action, subject) {{
  function allow() {{
    return (subject.user == "{user}" && subject.local && subject.active) ? polkit.Result.YES : polkit.Result.NO;
  }}
  if (action.id.indexOf("org.freedesktop.udisks2.filesystem-mount") === 0) {{
    return allow();
  }}
  if (action.id === "org.freedesktop.udisks2.filesystem-unmount-others") {{
    return allow();
  }}
  if (action.id === "org.freedesktop.udisks2.loop-setup" ||
      action.id === "org.freedesktop.udisks2.loop-delete-others" ||
      action.id === "org.freedesktop.udisks2.loop-modify-others") {{
    return allow();
  }}
}});
"#,
        marker = RULE_MARKER,
        user = user
    ))
}

pub struct PermissionBootstrapper<'a, H: SystemHal + ?Sized> {
    hal: &'a H,
    store: &'a ConfigStore,
    paths: &'a Paths,
}

impl<'a, H: SystemHal + ?Sized> PermissionBootstrapper<'a, H> {
    pub fn new(hal: &'a H, store: &'a ConfigStore, paths: &'a Paths) -> Self {
        Self { hal, store, paths }
    }

    pub fn rule_path(&self) -> &Path {
        &self.paths.polkit_rule
    }

    /// Recomputed on every call: config flag AND rule file on disk.
    pub fn is_configured(&self) -> bool {
        self.store.read().polkit_rule_installed && self.rule_path().exists()
    }

    pub fn install(&self) -> NmountResult<InstallOutcome> {
        if self.is_configured() {
            return Ok(InstallOutcome::AlreadyConfigured);
        }
        if self.rule_path().exists() {
            log::info!(
                "adopting existing polkit rule {}",
                self.rule_path().display()
            );
            self.store.update(|cfg| cfg.polkit_rule_installed = true)?;
            return Ok(InstallOutcome::AlreadyConfigured);
        }

        let user = self.hal.current_user()?;
        let rule = rule_text_for_user(&user)?;
        let staged = &self.paths.staged_rule;
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(staged, rule)?;

        if self.hal.which(PKEXEC).is_none() {
            let cmd = format!(
                "sudo install -m 0644 {} {}",
                staged.display(),
                self.rule_path().display()
            );
            log::warn!("pkexec not available, manual step required: {}", cmd);
            return Ok(InstallOutcome::ManualCommand(cmd));
        }

        log::info!("🔐 installing polkit rule for {}", user);
        self.hal
            .pkexec_install(staged, self.rule_path(), 0o644)
            .map_err(|e| NmountError::RuleInstallFailed(e.diagnostic()))?;
        self.store.update(|cfg| cfg.polkit_rule_installed = true)?;
        Ok(InstallOutcome::Installed)
    }

    /// Remove a rule file at our path that we did not generate.
    pub fn cleanup_stale(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        let path = self.rule_path();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return report,
            Err(err) => {
                log::debug!("cannot inspect {}: {}", path.display(), err);
                return report;
            }
        };
        if content.contains(RULE_MARKER) {
            return report;
        }

        log::info!("removing unmanaged polkit rule {}", path.display());
        if let Err(err) = self.remove_rule_file() {
            report.record("remove-stale-rule", &path.display().to_string(), err);
            return report;
        }
        if let Err(err) = self.store.update(|cfg| cfg.polkit_rule_installed = false) {
            report.record("config", &self.store.path().display().to_string(), err);
        }
        report
    }

    /// Remove the rule on uninstall and clear the flag.
    pub fn remove(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        if let Err(err) = self.remove_rule_file() {
            report.record("remove-rule", &self.rule_path().display().to_string(), err);
        }
        if let Err(err) = self.store.update(|cfg| cfg.polkit_rule_installed = false) {
            report.record("config", &self.store.path().display().to_string(), err);
        }
        report
    }

    fn remove_rule_file(&self) -> NmountResult<()> {
        let path = self.rule_path();
        if self.hal.which(PKEXEC).is_some() {
            self.hal.pkexec_remove(path)?;
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
