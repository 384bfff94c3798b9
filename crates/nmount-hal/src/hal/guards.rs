use crate::LoopOps;

/// RAII guard that deletes a freshly provisioned loop device when dropped.
///
/// The mount driver holds one from loop-setup until the mount succeeds, so every early
/// return rolls the loop device back.
#[derive(Debug)]
pub struct LoopGuard<'a, H: LoopOps + ?Sized> {
    hal: &'a H,
    loop_device: String,
    active: bool,
}

impl<'a, H: LoopOps + ?Sized> LoopGuard<'a, H> {
    pub fn new(hal: &'a H, loop_device: impl Into<String>) -> Self {
        Self {
            hal,
            loop_device: loop_device.into(),
            active: true,
        }
    }

    /// Prevent automatic deletion and return the loop device path.
    pub fn release(mut self) -> String {
        self.active = false;
        self.loop_device.clone()
    }

    pub fn device(&self) -> &str {
        &self.loop_device
    }
}

impl<'a, H: LoopOps + ?Sized> Drop for LoopGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        log::info!("rolling back loop device {}", self.loop_device);
        if let Err(err) = self.hal.loop_delete(&self.loop_device) {
            log::warn!("loop guard failed to delete {}: {}", self.loop_device, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeHal, Operation};
    use std::path::Path;

    fn deleted(hal: &FakeHal) -> Vec<String> {
        hal.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::LoopDelete { loop_device } => Some(loop_device),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn loop_guard_deletes_on_drop() {
        let hal = FakeHal::new();
        hal.loop_setup(Path::new("/tmp/image.iso")).unwrap();

        {
            let _guard = LoopGuard::new(&hal, "/dev/loop0");
        }

        assert_eq!(deleted(&hal), vec!["/dev/loop0".to_string()]);
        assert!(!hal.is_loop_attached("/dev/loop0"));
    }

    #[test]
    fn loop_guard_release_keeps_device() {
        let hal = FakeHal::new();
        hal.loop_setup(Path::new("/tmp/image.iso")).unwrap();

        {
            let guard = LoopGuard::new(&hal, "/dev/loop0");
            assert_eq!(guard.release(), "/dev/loop0");
        }

        assert!(deleted(&hal).is_empty());
        assert!(hal.is_loop_attached("/dev/loop0"));
    }
}
