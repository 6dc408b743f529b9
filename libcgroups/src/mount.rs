//! Folds `/proc/mounts` entries into the set of cgroup hierarchies mounted
//! on this host, deciding which mount path "owns" each hierarchy.

use std::collections::HashMap;
use std::path::PathBuf;

use common::fileline::MountEntry;
use common::syscall::FsOps;

use crate::hierarchy::Hierarchy;

/// Where one hierarchy is mounted, and whether this process considers
/// itself the owner of that mount path (can create/destroy cgroup
/// directories under it, as opposed to merely reading an externally-managed
/// tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMountPoint {
    pub mount_point: PathBuf,
    pub owns_mount: bool,
}

pub type CgroupMountMap = HashMap<Hierarchy, CgroupMountPoint>;

fn hierarchies_in_options(options: &[String]) -> Vec<Hierarchy> {
    options
        .iter()
        .filter_map(|opt| Hierarchy::from_name(opt))
        .collect()
}

/// Builds the hierarchy -> mount map from a sequence of `/proc/mounts`
/// entries, keeping only `cgroup`-typed, currently-accessible mountpoints.
/// The first hierarchy named in a given line's options owns that mount
/// path; any hierarchy co-mounted alongside it there is recorded as
/// non-owning. A hierarchy already discovered on an earlier line is never
/// overwritten by a later one.
pub fn discover(fs: &dyn FsOps, entries: impl Iterator<Item = MountEntry>) -> CgroupMountMap {
    let mut map = CgroupMountMap::new();
    for entry in entries {
        if entry.fstype != "cgroup" {
            continue;
        }
        if !fs.is_dir(std::path::Path::new(&entry.mountpoint)) {
            continue;
        }
        let mut owner_assigned = false;
        for hierarchy in hierarchies_in_options(&entry.options) {
            if map.contains_key(&hierarchy) {
                owner_assigned = true;
                continue;
            }
            map.insert(
                hierarchy,
                CgroupMountPoint {
                    mount_point: PathBuf::from(&entry.mountpoint),
                    owns_mount: !owner_assigned,
                },
            );
            owner_assigned = true;
        }
    }
    map
}

/// A request to register `hierarchies` as mounted (co-mounted in one
/// `mount(2)` call) at `mount_path`.
#[derive(Debug, Clone)]
pub struct CgroupMountSpec {
    pub mount_path: PathBuf,
    pub hierarchies: Vec<Hierarchy>,
}
