//! NMount core library.
//!
//! `nmount-core` holds the mount orchestration engine (loop provisioning, block device
//! resolution, the mount/unmount state machine), the persistent config store, the polkit
//! bootstrapper and the failsafe teardown used by the `nmount` binary.

pub mod checksum;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod config_store;
pub mod driver;
pub mod failsafe;
pub mod installer;
pub mod logging;
pub mod paths;
pub mod permissions;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tools;

pub use nmount_error::{NmountError, NmountResult};

#[cfg(test)]
pub(crate) mod test_env;
