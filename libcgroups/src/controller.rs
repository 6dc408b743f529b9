//! Typed read/write access to a single cgroup directory, bound at
//! construction to a hierarchy, a path, and whether this process owns the
//! directory (may create/destroy it) or merely observes it.

use std::fs;
use std::path::{Path, PathBuf};

use common::error::{NsconError, Result};
use common::syscall::{create_fs_ops, FsOps};
use nix::unistd::{Gid, Uid};

use crate::hierarchy::Hierarchy;

pub const TASKS: &str = "tasks";
pub const CGROUP_PROCS: &str = "cgroup.procs";

pub struct CgroupController {
    hierarchy: Hierarchy,
    path: PathBuf,
    owns_cgroup: bool,
    fs: Box<dyn FsOps>,
}

impl CgroupController {
    pub fn new(hierarchy: Hierarchy, path: PathBuf, owns_cgroup: bool) -> Self {
        CgroupController {
            hierarchy,
            path,
            owns_cgroup,
            fs: create_fs_ops(),
        }
    }

    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owns_cgroup(&self) -> bool {
        self.owns_cgroup
    }

    fn control_file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn has_control_file(&self, name: &str) -> bool {
        self.fs.is_file(&self.control_file(name))
    }

    /// Writes `tid` into `tasks`. No-op on a cgroup this process does not
    /// own — an observer has no business moving threads into it.
    pub fn enter(&self, tid: i32) -> Result<()> {
        if !self.owns_cgroup {
            return Ok(());
        }
        self.set_param_string(TASKS, &tid.to_string())
    }

    /// Chowns the cgroup directory and its `tasks` file so an unprivileged
    /// user can join it directly. No-op on a non-owned cgroup.
    pub fn delegate(&self, uid: Uid, gid: Gid) -> Result<()> {
        if !self.owns_cgroup {
            return Ok(());
        }
        self.fs
            .chown(&self.path, Some(uid), Some(gid))
            .map_err(|e| {
                NsconError::failed_precondition(format!(
                    "chown {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        self.fs
            .chown(&self.control_file(TASKS), Some(uid), Some(gid))
            .map_err(|e| {
                NsconError::failed_precondition(format!("chown {}: {}", TASKS, e))
            })?;
        Ok(())
    }

    pub fn get_threads(&self) -> Result<Vec<i32>> {
        self.read_pid_list(TASKS)
    }

    pub fn get_processes(&self) -> Result<Vec<i32>> {
        self.read_pid_list(CGROUP_PROCS)
    }

    fn read_pid_list(&self, file: &str) -> Result<Vec<i32>> {
        let content = fs::read_to_string(self.control_file(file))?;
        Ok(content.lines().filter_map(|l| l.trim().parse().ok()).collect())
    }

    /// Immediate subdirectory basenames, in lexical order.
    pub fn get_subcontainers(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Recursively removes the cgroup's directory subtree. Discovers every
    /// directory first (a breadth stack), then removes deepest-first (a
    /// second stack), so a non-empty directory is never handed to `rmdir`
    /// before its children are gone. No-op on a non-owned cgroup.
    pub fn destroy(&self) -> Result<()> {
        if !self.owns_cgroup {
            return Ok(());
        }
        let mut discover_stack = vec![self.path.clone()];
        let mut deletion_stack = Vec::new();
        while let Some(dir) = discover_stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    discover_stack.push(entry.path());
                }
            }
            deletion_stack.push(dir);
        }
        while let Some(dir) = deletion_stack.pop() {
            self.fs.rmdir(&dir)?;
        }
        Ok(())
    }

    pub fn set_param_string(&self, file: &str, value: &str) -> Result<()> {
        fs::write(self.control_file(file), value).map_err(NsconError::from)
    }

    pub fn get_param_string(&self, file: &str) -> Result<String> {
        Ok(fs::read_to_string(self.control_file(file))?
            .trim_end_matches('\n')
            .to_string())
    }

    pub fn set_param_int(&self, file: &str, value: i64) -> Result<()> {
        self.set_param_string(file, &value.to_string())
    }

    pub fn get_param_int(&self, file: &str) -> Result<i64> {
        self.get_param_string(file)?
            .trim()
            .parse()
            .map_err(|_| NsconError::internal(format!("{file}: not an integer")))
    }

    pub fn set_param_bool(&self, file: &str, value: bool) -> Result<()> {
        self.set_param_string(file, if value { "1" } else { "0" })
    }

    /// `OutOfRange` on any value other than the literal `"0"`/`"1"`.
    pub fn get_param_bool(&self, file: &str) -> Result<bool> {
        match self.get_param_string(file)?.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(NsconError::out_of_range(format!(
                "{file}: expected 0 or 1, got {other:?}"
            ))),
        }
    }
}
