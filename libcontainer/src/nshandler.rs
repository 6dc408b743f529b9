//! Glue that ties [`crate::controller::NamespaceController`] and
//! [`crate::lock::FileLockHandler`] into the shape a container manager
//! expects: a stable container *name* rather than a raw [`NsHandle`], and a
//! tolerance for the handle's pid having been reused by something unrelated
//! while the container itself is still alive.
//!
//! A container is a *virtual host* iff its spec requested a pid namespace —
//! it owns its own init and therefore its own pid tree. For a virtual host
//! whose stored handle has gone stale (the original init exited but a
//! descendant under the same namespace is still running as the new pid-1
//! equivalent) [`NamespaceHandler::init_pid_for`] re-detects it by crawling
//! *up* the `ppid` chain from a pid already known to be a member of the
//! container (via its cgroup/task membership, supplied by the caller) until
//! crossing into the root pid namespace, then re-verifies the result —
//! mirroring `CrawlTreeToFindInit`/`DetectInit` in the lmctfy namespace
//! handler this module is grounded on, rather than trusting the first
//! `ppid == stale_pid` match found by scanning all of `/proc`: once the
//! stored pid has been reused, that number can belong to a completely
//! unrelated process, and a single unscoped hop would misattach `run`/`exec`
//! to one of *that* process's children.

use std::path::{Path, PathBuf};

use common::error::{ErrorKind, NsconError, Result};
use common::fileline::parse_stat_ppid;

use crate::controller::NamespaceController;
use crate::handle::{CookieGenerator, NsHandle};
use crate::nsflag::NsFlag;
use crate::nsutil;
use crate::spec::{ContainerSpec, RunSpec};

/// Bounds both the number of crawl retries (a member pid dying mid-crawl)
/// and the number of `ppid` hops within one crawl (a malformed or cyclic
/// `/proc` snapshot), so re-detection gives up rather than spinning forever.
const MAX_CRAWL_RETRIES: usize = 10;
const MAX_PPID_HOPS: usize = 64;

/// Ties a [`NamespaceController`] to the durable identity (container name)
/// a caller actually wants to hold onto, rather than the [`NsHandle`] pid
/// pair that becomes stale once the original init exits.
pub struct NamespaceHandler {
    controller: NamespaceController,
    proc_root: PathBuf,
}

impl NamespaceHandler {
    pub fn new(controller: NamespaceController, proc_root: PathBuf) -> Self {
        NamespaceHandler {
            controller,
            proc_root,
        }
    }

    /// True iff `spec` asks for a pid namespace, i.e. the container owns its
    /// own init process rather than sharing the host's pid tree.
    pub fn is_virtual_host(spec: &ContainerSpec) -> bool {
        spec.pid.is_some()
    }

    /// Resolves `handle` to the pid that is actually running as this
    /// container's init right now. If `handle` is still valid, that's just
    /// `handle.pid()`. Otherwise `member_pids` — pids the caller already
    /// knows belong to this container, typically via
    /// `CgroupController::get_processes`/`get_threads` on the container's
    /// own cgroup — seeds a crawl up the `ppid` chain toward the root pid
    /// namespace; the last pid still inside the container's namespace
    /// before that crossing is init. A crawl that hits a pid that dies
    /// mid-walk, or whose result fails re-verification, is retried up to
    /// [`MAX_CRAWL_RETRIES`] times before giving up.
    pub fn init_pid_for(&self, handle: &NsHandle, member_pids: &[i32]) -> Result<i32> {
        let cookies = CookieGenerator::new(&self.proc_root);
        if cookies.is_valid(handle) {
            return Ok(handle.pid());
        }
        let Some(&seed) = member_pids.first() else {
            return Err(NsconError::invalid_argument(
                "container has no known member pids; cannot re-detect init after pid reuse",
            ));
        };

        let root_namespace = nsutil::namespace_id(1, NsFlag::Pid, &self.proc_root)?;
        for _ in 0..MAX_CRAWL_RETRIES {
            match self.crawl_tree_to_find_init(seed, &root_namespace, member_pids) {
                Ok(pid) => return Ok(pid),
                // A member pid died mid-crawl, or the detected candidate
                // failed re-verification: both are transient races with a
                // genuinely exiting tree, worth a fresh crawl.
                Err(e) if e.kind == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(NsconError::unavailable(format!(
            "ran out of tries re-detecting init for a stale handle at pid {}",
            handle.pid()
        )))
    }

    /// One crawl attempt: walk `ppid` pointers up from `seed` until the
    /// namespace identity crosses into `root_namespace`; the pid one hop
    /// before that crossing is the candidate init. Re-verifies the
    /// candidate's parent wasn't itself reused during the crawl and that
    /// the candidate is still among `member_pids`, since either condition
    /// means a race was lost and the candidate cannot be trusted.
    fn crawl_tree_to_find_init(
        &self,
        seed: i32,
        root_namespace: &str,
        member_pids: &[i32],
    ) -> Result<i32> {
        let mut previous = seed;
        let mut current = seed;
        let mut current_namespace = String::new();
        let mut hops = 0usize;
        while current_namespace != root_namespace {
            hops += 1;
            if hops > MAX_PPID_HOPS {
                return Err(NsconError::unavailable(format!(
                    "ppid crawl from pid {seed} did not reach the root namespace within {MAX_PPID_HOPS} hops"
                )));
            }
            previous = current;
            current = self.parent_pid(current)?;
            current_namespace = nsutil::namespace_id(current, NsFlag::Pid, &self.proc_root)?;
        }

        let init_pid = previous;
        let init_parent = self.parent_pid(init_pid)?;
        if init_parent != current {
            return Err(NsconError::not_found(format!(
                "falsely detected {init_pid} as init: its parent was reused during the crawl"
            )));
        }
        if !member_pids.contains(&init_pid) {
            return Err(NsconError::not_found(format!(
                "falsely detected {init_pid} as init: it is not a member of the target container"
            )));
        }
        Ok(init_pid)
    }

    /// `/proc/<pid>/stat`'s `ppid` field. `NotFound` if `pid` has already
    /// exited, so crawl retries treat it the same as any other transient
    /// race with a dying tree.
    fn parent_pid(&self, pid: i32) -> Result<i32> {
        let stat_path = self.proc_root.join(pid.to_string()).join("stat");
        let contents = std::fs::read_to_string(&stat_path)
            .map_err(|_| NsconError::not_found(format!("pid {pid} is gone")))?;
        parse_stat_ppid(&contents)
            .ok_or_else(|| NsconError::internal(format!("malformed /proc/{pid}/stat")))
    }

    pub fn run(
        &self,
        handle: &NsHandle,
        member_pids: &[i32],
        argv: &[String],
        run_spec: &RunSpec,
    ) -> Result<i32> {
        let pid = self.init_pid_for(handle, member_pids)?;
        let retargeted = NsHandle::parse(&format!("c{}-{}", handle.cookie(), pid))?;
        self.controller
            .run(&retargeted, argv, run_spec)
            .map(|p| p.as_raw())
    }

    pub fn exec(&self, handle: &NsHandle, member_pids: &[i32], argv: &[String]) -> Result<()> {
        let pid = self.init_pid_for(handle, member_pids)?;
        let retargeted = NsHandle::parse(&format!("c{}-{}", handle.cookie(), pid))?;
        self.controller.exec(&retargeted, argv)
    }

    pub fn destroy(&self, locks_dir: &Path, name: &str) -> Result<()> {
        let factory = crate::lock::LockFactory::new(locks_dir.to_path_buf());
        factory.get(name)?.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ContainerSpec;

    fn write_stat(dir: &Path, pid: i32, ppid: i32, starttime: &str) {
        let pid_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&pid_dir).unwrap();
        let stat = format!(
            "{pid} (init) S {ppid} {pid} {pid} 0 -1 4194304 0 0 0 0 0 0 0 0 20 0 1 0 {starttime} 0 0 0"
        );
        std::fs::write(pid_dir.join("stat"), stat).unwrap();
    }

    /// `/proc/<pid>/ns/pid` as a real symlink, so [`nsutil::namespace_id`]'s
    /// `read_link` sees it the way it would on a live kernel. The link
    /// target need not resolve to anything; only its text is compared.
    fn write_pid_ns(dir: &Path, pid: i32, namespace: &str) {
        let ns_dir = dir.join(pid.to_string()).join("ns");
        std::fs::create_dir_all(&ns_dir).unwrap();
        std::os::unix::fs::symlink(namespace, ns_dir.join("pid")).unwrap();
    }

    fn handler(dir: &Path) -> NamespaceHandler {
        NamespaceHandler::new(
            NamespaceController::with_roots(
                PathBuf::from("/sbin/nsinit"),
                dir.to_path_buf(),
                PathBuf::from("/tmp"),
            ),
            dir.to_path_buf(),
        )
    }

    #[test]
    fn is_virtual_host_requires_pid_namespace() {
        assert!(NamespaceHandler::is_virtual_host(&ContainerSpec {
            pid: Some(()),
            ..Default::default()
        }));
        assert!(!NamespaceHandler::is_virtual_host(&ContainerSpec::default()));
    }

    #[test]
    fn init_pid_for_returns_handle_pid_when_still_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, 1, "1000");
        let h = handler(dir.path());
        let handle = CookieGenerator::new(dir.path()).handle_for(42).unwrap();
        assert_eq!(h.init_pid_for(&handle, &[]).unwrap(), 42);
    }

    /// Stale handle: the stored pid (42) has been reused by an unrelated
    /// root-namespace process. The crawl instead starts from a pid the
    /// caller already knows is a member of the container (100, a
    /// grandchild of the container's real, never-reused init at 50) and
    /// walks `ppid` pointers upward — two hops, not one — until it crosses
    /// into the root namespace, landing on 50.
    #[test]
    fn init_pid_for_crawls_multiple_hops_to_current_init() {
        let dir = tempfile::tempdir().unwrap();

        write_stat(dir.path(), 1, 0, "1");
        write_pid_ns(dir.path(), 1, "pid:[root]");

        // Unrelated process that reused the stale pid 42.
        write_stat(dir.path(), 42, 1, "9000");
        write_pid_ns(dir.path(), 42, "pid:[root]");

        write_stat(dir.path(), 7, 1, "10");
        write_pid_ns(dir.path(), 7, "pid:[root]");

        // The container's real, currently-live init and a grandchild.
        write_stat(dir.path(), 50, 7, "20");
        write_pid_ns(dir.path(), 50, "pid:[containerA]");
        write_stat(dir.path(), 100, 50, "30");
        write_pid_ns(dir.path(), 100, "pid:[containerA]");

        let h = handler(dir.path());
        let handle = CookieGenerator::new(dir.path()).handle_for(42).unwrap();
        assert_eq!(
            h.init_pid_for(&handle, &[100, 50]).unwrap(),
            50,
            "crawl must land on the container's real init, not the reused stale pid"
        );
    }

    #[test]
    fn init_pid_for_rejects_candidate_outside_container_membership() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 1, 0, "1");
        write_pid_ns(dir.path(), 1, "pid:[root]");
        write_stat(dir.path(), 42, 1, "9000");
        write_pid_ns(dir.path(), 42, "pid:[root]");
        write_stat(dir.path(), 7, 1, "10");
        write_pid_ns(dir.path(), 7, "pid:[root]");
        write_stat(dir.path(), 50, 7, "20");
        write_pid_ns(dir.path(), 50, "pid:[containerA]");
        write_stat(dir.path(), 100, 50, "30");
        write_pid_ns(dir.path(), 100, "pid:[containerA]");

        let h = handler(dir.path());
        let handle = CookieGenerator::new(dir.path()).handle_for(42).unwrap();
        // The crawl from the valid seed 100 still lands on 50 by
        // namespace-crossing, but the caller's membership list (e.g. a
        // stale cgroup snapshot) doesn't include it — the result must not
        // be trusted.
        let err = h.init_pid_for(&handle, &[100]).unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::Unavailable);
    }

    #[test]
    fn init_pid_for_requires_member_pids_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, 1, "1000");
        let h = handler(dir.path());
        let handle = CookieGenerator::new(dir.path()).handle_for(42).unwrap();
        write_stat(dir.path(), 42, 1, "5000");
        let err = h.init_pid_for(&handle, &[]).unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::InvalidArgument);
    }
}
