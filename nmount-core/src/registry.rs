//! Ordered set of active mounts, mirrored into the config store on every change.

use crate::config::{Config, MountRecord};
use crate::config_store::ConfigStore;
use nmount_error::{NmountError, NmountResult};
use nmount_hal::procfs::mountinfo::{is_mounted_from_info, mount_points_for_source, MountInfo};
use std::fs;
use std::path::Path;

pub struct MountRegistry<'s> {
    store: &'s ConfigStore,
    records: Vec<MountRecord>,
}

impl<'s> MountRegistry<'s> {
    /// Empty registry. Call [`MountRegistry::reconcile_on_startup`] to adopt persisted mounts.
    pub fn new(store: &'s ConfigStore) -> Self {
        Self {
            store,
            records: Vec::new(),
        }
    }

    pub fn store(&self) -> &'s ConfigStore {
        self.store
    }

    pub fn add(&mut self, record: MountRecord) -> NmountResult<()> {
        self.records.retain(|r| r.loop_device != record.loop_device);
        self.records.push(record);
        self.persist()
    }

    /// Remove the record for `loop_device`. Persisted state is rewritten even when the loop
    /// was not tracked, which also clears a stale `lastMount`.
    pub fn remove(&mut self, loop_device: &str) -> NmountResult<Option<MountRecord>> {
        let removed = self
            .records
            .iter()
            .position(|r| r.loop_device == loop_device)
            .map(|idx| self.records.remove(idx));
        self.persist()?;
        Ok(removed)
    }

    pub fn list_active(&self) -> &[MountRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_image(&self, image: &Path) -> Option<&MountRecord> {
        self.records.iter().find(|r| r.image_path == image)
    }

    pub fn find_by_loop(&self, loop_device: &str) -> Option<&MountRecord> {
        self.records.iter().find(|r| r.loop_device == loop_device)
    }

    /// Find a record by loop device, mount device or image path. Image paths are also
    /// matched after canonicalization, so relative or aliased spellings resolve.
    pub fn find_target(&self, target: &str) -> NmountResult<&MountRecord> {
        self.records
            .iter()
            .find(|r| r.loop_device == target || r.mount_device == target)
            .or_else(|| self.find_by_image(Path::new(target)))
            .or_else(|| {
                let canonical = fs::canonicalize(target).ok()?;
                self.find_by_image(&canonical)
            })
            .ok_or_else(|| NmountError::NotMounted(target.to_string()))
    }

    /// Most recently added record still active.
    pub fn last_mount(&self) -> Option<&MountRecord> {
        self.records.last()
    }

    /// Re-adopt persisted mounts that are still present in `mount_table`, drop the rest and
    /// write the pruned state back. No mount is invoked. Returns the number adopted.
    pub fn reconcile_on_startup(&mut self, mount_table: &[MountInfo]) -> NmountResult<usize> {
        self.records.clear();
        for record in persisted_records(self.store.read()) {
            if self.find_by_loop(&record.loop_device).is_some() {
                continue;
            }
            if is_live(&record, mount_table) {
                log::info!(
                    "♻️ restored mount {} -> {}",
                    record.image_path.display(),
                    record.mount_point.display()
                );
                self.records.push(record);
            } else {
                log::info!(
                    "dropping stale mount record for {} ({})",
                    record.image_path.display(),
                    record.loop_device
                );
            }
        }

        self.persist()?;
        Ok(self.records.len())
    }

    /// Take every persisted record as-is, mounted or not, without rewriting the config.
    /// Teardown paths use this so loops whose mount already vanished are still released.
    pub fn adopt_persisted(&mut self) -> usize {
        self.records = persisted_records(self.store.read());
        self.records.len()
    }

    fn persist(&self) -> NmountResult<()> {
        let records = self.records.clone();
        let last = self.records.last().cloned();
        self.store.update(move |cfg| {
            cfg.active_mounts = records;
            cfg.last_mount = last;
        })?;
        Ok(())
    }
}

/// `activeMounts` plus `lastMount`, one record per loop device.
fn persisted_records(cfg: Config) -> Vec<MountRecord> {
    let mut records: Vec<MountRecord> = Vec::new();
    for record in cfg.active_mounts.into_iter().chain(cfg.last_mount) {
        if !records.iter().any(|r| r.loop_device == record.loop_device) {
            records.push(record);
        }
    }
    records
}

fn is_live(record: &MountRecord, mount_table: &[MountInfo]) -> bool {
    if record.has_known_mount_point() {
        return is_mounted_from_info(&record.mount_point, mount_table);
    }
    !mount_points_for_source(mount_table, &record.mount_device).is_empty()
}
