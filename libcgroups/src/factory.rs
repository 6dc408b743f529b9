//! Discovers mounted cgroup hierarchies and arbitrates directory lifecycle
//! (`Get`/`Create`) and new-mount registration (`Mount`) against that
//! discovery.

use std::path::{Path, PathBuf};

use common::error::{NsconError, Result};
use common::fileline;
use common::fsutil::ensure_dir_all;
use common::syscall::{create_fs_ops, FsOps};
use nix::mount::MsFlags;

use crate::hierarchy::Hierarchy;
use crate::mount::{self, CgroupMountMap, CgroupMountPoint, CgroupMountSpec};

pub struct CgroupFactory {
    mounts: CgroupMountMap,
    fs: Box<dyn FsOps>,
}

impl CgroupFactory {
    /// Scans the live `/proc/mounts`.
    pub fn new() -> Result<Self> {
        Self::from_mounts_file("/proc/mounts")
    }

    pub fn from_mounts_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let fs = create_fs_ops();
        let entries = fileline::mounts_at(path)?;
        let mounts = mount::discover(fs.as_ref(), entries);
        Ok(CgroupFactory { mounts, fs })
    }

    pub fn mount_point(&self, hierarchy: Hierarchy) -> Option<&CgroupMountPoint> {
        self.mounts.get(&hierarchy)
    }

    pub fn owns(&self, hierarchy: Hierarchy) -> bool {
        self.mounts
            .get(&hierarchy)
            .map(|m| m.owns_mount)
            .unwrap_or(false)
    }

    fn resolve(&self, hierarchy: Hierarchy, relative_path: &Path) -> Result<(PathBuf, bool)> {
        let mount = self.mounts.get(&hierarchy).ok_or_else(|| {
            NsconError::not_found(format!("hierarchy {hierarchy} is not mounted"))
        })?;
        let relative = relative_path.strip_prefix("/").unwrap_or(relative_path);
        Ok((mount.mount_point.join(relative), mount.owns_mount))
    }

    /// Joins the hierarchy's mountpoint with `relative_path`, requiring the
    /// resulting directory to already exist.
    pub fn get(&self, hierarchy: Hierarchy, relative_path: &Path) -> Result<PathBuf> {
        let (path, _owns) = self.resolve(hierarchy, relative_path)?;
        if !self.fs.is_dir(&path) {
            return Err(NsconError::not_found(format!(
                "cgroup path {} does not exist",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Creates a fresh cgroup directory. Hierarchies this process does not
    /// own fall back to `Get` semantics (the directory must already exist,
    /// managed by whoever does own the mount).
    pub fn create(&self, hierarchy: Hierarchy, relative_path: &Path) -> Result<PathBuf> {
        let (path, owns) = self.resolve(hierarchy, relative_path)?;
        if !owns {
            return self.get(hierarchy, relative_path);
        }
        if self.fs.exists(&path) {
            return Err(NsconError::already_exists(format!(
                "cgroup path {} already exists",
                path.display()
            )));
        }
        self.fs.mkdir(&path, 0o755)?;
        Ok(path)
    }

    /// Idempotently registers `spec.hierarchies` as mounted at
    /// `spec.mount_path`. See the module docs on [`CgroupFactory`] for the
    /// compatibility rules this enforces before mounting.
    pub fn mount(&mut self, spec: CgroupMountSpec) -> Result<()> {
        let mut already_satisfied = true;
        for hierarchy in &spec.hierarchies {
            match self.mounts.get(hierarchy) {
                Some(existing) if existing.mount_point == spec.mount_path => {}
                Some(existing) => {
                    return Err(NsconError::invalid_argument(format!(
                        "hierarchy {hierarchy} already mounted at {}, requested {}",
                        existing.mount_point.display(),
                        spec.mount_path.display()
                    )));
                }
                None => already_satisfied = false,
            }
        }

        let requested: std::collections::HashSet<Hierarchy> =
            spec.hierarchies.iter().copied().collect();
        for (hierarchy, mounted) in self.mounts.iter() {
            if mounted.mount_point == spec.mount_path && !requested.contains(hierarchy) {
                return Err(NsconError::invalid_argument(format!(
                    "mount path {} already hosts unrequested hierarchy {hierarchy}",
                    spec.mount_path.display()
                )));
            }
        }

        if already_satisfied {
            return Ok(());
        }

        ensure_dir_all(self.fs.as_ref(), &spec.mount_path, 0o755)?;
        let names = spec
            .hierarchies
            .iter()
            .map(|h| h.name())
            .collect::<Vec<_>>()
            .join(",");
        self.fs.mount(
            Some("cgroup"),
            &spec.mount_path,
            Some("cgroup"),
            MsFlags::empty(),
            Some(&names),
        )?;

        let mut owner_assigned = false;
        for hierarchy in &spec.hierarchies {
            if self.mounts.contains_key(hierarchy) {
                owner_assigned = true;
                continue;
            }
            self.mounts.insert(
                *hierarchy,
                CgroupMountPoint {
                    mount_point: spec.mount_path.clone(),
                    owns_mount: !owner_assigned,
                },
            );
            owner_assigned = true;
        }
        Ok(())
    }

    /// Walks `/proc/<tid>/cgroup`, returning the hierarchy path of the line
    /// whose subsystem list names `hierarchy`.
    pub fn detect_cgroup_path(&self, tid: i32, hierarchy: Hierarchy) -> Result<PathBuf> {
        let proc_path = format!("/proc/{tid}/cgroup");
        let lines = fileline::proc_cgroup(&proc_path)?;
        for line in lines {
            if line.subsystems.iter().any(|s| s == hierarchy.name()) {
                return Ok(PathBuf::from(line.hierarchy_path));
            }
        }
        Err(NsconError::not_found(format!(
            "hierarchy {hierarchy} not present in {proc_path}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mounts(dir: &std::path::Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("mounts");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn get_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        let mounts = write_mounts(
            dir.path(),
            &[&format!(
                "cgroup {} cgroup rw,freezer 0 0",
                cgroup_root.display()
            )],
        );
        let factory = CgroupFactory::from_mounts_file(&mounts).unwrap();
        assert!(factory.get(Hierarchy::Freezer, Path::new("test")).is_err());
        std::fs::create_dir(cgroup_root.join("test")).unwrap();
        assert!(factory.get(Hierarchy::Freezer, Path::new("test")).is_ok());
    }

    #[test]
    fn create_fails_already_exists_when_owned() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        let mounts = write_mounts(
            dir.path(),
            &[&format!(
                "cgroup {} cgroup rw,freezer 0 0",
                cgroup_root.display()
            )],
        );
        let factory = CgroupFactory::from_mounts_file(&mounts).unwrap();
        factory
            .create(Hierarchy::Freezer, Path::new("test"))
            .unwrap();
        let err = factory
            .create(Hierarchy::Freezer, Path::new("test"))
            .unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn mount_rejects_conflicting_path_for_existing_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        let mounts = write_mounts(
            dir.path(),
            &[&format!(
                "cgroup {} cgroup rw,freezer 0 0",
                cgroup_root.display()
            )],
        );
        let mut factory = CgroupFactory::from_mounts_file(&mounts).unwrap();
        let err = factory
            .mount(CgroupMountSpec {
                mount_path: dir.path().join("elsewhere"),
                hierarchies: vec![Hierarchy::Freezer],
            })
            .unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn mount_is_idempotent_for_already_satisfied_spec() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        let mounts = write_mounts(
            dir.path(),
            &[&format!(
                "cgroup {} cgroup rw,freezer 0 0",
                cgroup_root.display()
            )],
        );
        let mut factory = CgroupFactory::from_mounts_file(&mounts).unwrap();
        factory
            .mount(CgroupMountSpec {
                mount_path: cgroup_root.clone(),
                hierarchies: vec![Hierarchy::Freezer],
            })
            .unwrap();
    }
}
