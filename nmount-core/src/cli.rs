//! CLI argument parsing for NMount
//!
//! `status` is the default when no subcommand is given.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

/// Settings that can be changed from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SettingKey {
    Language,
    Theme,
    AutoUnmountOnExit,
    RecentFilesMax,
}

#[derive(Parser, Debug)]
#[command(name = "nmount")]
#[command(about = "💿 NMount - mount and unmount ISO images without root")]
#[command(long_about = "💿 NMount - mount and unmount ISO images without root\n\n\
    Images are attached through udisks2 loop devices and mounted read-only.\n\
    A polkit rule (installed once with `fix-permissions`) removes the password prompts.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Install NMount for the current user (binary, menu launcher, desktop shortcut)
    #[arg(long)]
    pub install: bool,

    /// Unmount everything, then remove installed files and the polkit rule
    #[arg(long)]
    pub uninstall: bool,

    /// Mount base directory recorded at install time
    #[arg(long, global = true)]
    pub mount_base: Option<PathBuf>,

    /// Alternative config file (defaults to ~/.config/nmount/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 📋 Show tools, permission state and active mounts
    Status,

    /// 💿 Mount an ISO image read-only
    Mount {
        /// Path to the image file
        iso: PathBuf,

        /// Allow mounting an image that is already mounted
        #[arg(long)]
        multi: bool,
    },

    /// ⏏️ Unmount an image (by loop device, partition or image path); everything when omitted
    Unmount { target: Option<String> },

    /// 🔐 Install the polkit rule for password-less udisks operations
    FixPermissions,

    /// Enable or disable starting NMount on login
    Autostart {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// List recently mounted images
    Recent,

    /// Compute the SHA-256 of an image
    Checksum {
        iso: PathBuf,

        /// Expected digest; exit code 1 on mismatch
        #[arg(long)]
        expect: Option<String>,
    },

    /// Change a setting
    Set {
        #[arg(value_enum)]
        key: SettingKey,
        value: String,
    },

    /// End the session; unmounts everything when auto-unmount-on-exit is set
    Quit,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Status)
    }
}
