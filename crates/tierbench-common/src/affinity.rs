//! Core pinning and NUMA lookup

use crate::error::{CommonError, CommonResult};
use std::path::Path;

/// Pin the calling thread to logical core `core`
pub fn pin_current_thread(core: usize) -> CommonResult<()> {
    let ids = core_affinity::get_core_ids().unwrap_or_default();
    let id = ids
        .into_iter()
        .find(|c| c.id == core)
        .ok_or(CommonError::Affinity(core))?;
    if core_affinity::set_for_current(id) {
        tracing::debug!(core, "thread pinned");
        Ok(())
    } else {
        Err(CommonError::Affinity(core))
    }
}

/// Pin if possible, otherwise log and keep running unpinned
pub fn pin_or_warn(core: usize, role: &str) {
    if let Err(e) = pin_current_thread(core) {
        tracing::warn!(core, role, error = %e, "running unpinned");
    }
}

/// Logical cores available to the process
pub fn available_cores() -> usize {
    core_affinity::get_core_ids().map(|c| c.len()).unwrap_or(1)
}

/// NUMA node of a logical core, read from sysfs
pub fn numa_node_of_cpu(cpu: usize) -> Option<usize> {
    numa_node_in(Path::new("/sys/devices/system/cpu"), cpu)
}

/// Number of NUMA nodes, read from sysfs (1 when unknown)
pub fn numa_node_count() -> usize {
    let Ok(entries) = std::fs::read_dir("/sys/devices/system/node") else {
        return 1;
    };
    let n = entries
        .filter_map(Result::ok)
        .filter(|e| node_id(&e.file_name().to_string_lossy()).is_some())
        .count();
    n.max(1)
}

fn numa_node_in(root: &Path, cpu: usize) -> Option<usize> {
    let dir = root.join(format!("cpu{cpu}"));
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .find_map(|e| node_id(&e.file_name().to_string_lossy()))
}

fn node_id(name: &str) -> Option<usize> {
    name.strip_prefix("node")?.parse().ok()
}
