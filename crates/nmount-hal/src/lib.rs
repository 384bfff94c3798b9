//! NMount host abstraction layer (HAL).
//!
//! Everything that touches the outside world (spawning udisksctl/lsblk/pkexec,
//! reading the live mount table, looking up binaries on PATH) goes through the
//! traits in [`hal`], so the mount orchestration in `nmount-core` can be driven
//! against [`FakeHal`] in tests.

pub mod hal;
pub mod procfs;

pub use hal::*;
pub use nmount_error::{HalError, HalResult};
