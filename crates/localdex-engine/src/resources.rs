//! Disk and memory checks run periodically during bulk operations.

use std::path::Path;

use localdex_core::config::ResourceSettings;
use localdex_core::error::{Error, ResourceKind, Result};
use sysinfo::{Disks, System};

/// Source of resource readings. `None` means the reading is unavailable,
/// which never blocks work.
pub trait ResourceProbe: Send + Sync {
    fn free_disk_bytes(&self, path: &Path) -> Option<u64>;
    fn memory_used_percent(&self) -> Option<f32>;
}

/// Readings from the operating system.
pub struct SystemProbe;

impl ResourceProbe for SystemProbe {
    fn free_disk_bytes(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    fn memory_used_percent(&self) -> Option<f32> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return None;
        }
        Some(sys.used_memory() as f32 / total as f32 * 100.0)
    }
}

/// Fails with [`Error::Resource`] when free disk under `dir` or available
/// memory falls below the configured limits.
pub fn check_resources(probe: &dyn ResourceProbe, limits: &ResourceSettings, dir: &Path) -> Result<()> {
    if let Some(free) = probe.free_disk_bytes(dir) {
        let floor = limits.min_free_disk_mb * 1024 * 1024;
        if free < floor {
            return Err(Error::Resource {
                kind: ResourceKind::Disk,
                detail: format!("{} MiB free under {}, need {} MiB", free / (1024 * 1024), dir.display(), limits.min_free_disk_mb),
            });
        }
    }
    if let Some(used) = probe.memory_used_percent() {
        if used > limits.max_memory_percent {
            return Err(Error::Resource {
                kind: ResourceKind::Memory,
                detail: format!("memory use at {used:.1}%, limit {:.1}%", limits.max_memory_percent),
            });
        }
    }
    Ok(())
}
