//! Namespace-flag bookkeeping that does not belong to a single
//! configurator: kernel-support detection, entering/leaving namespace FDs
//! in the right order, and namespace-identity comparison.

use std::collections::HashSet;
use std::fs;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use common::error::{NsconError, Result};
use common::syscall::ProcessOps;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::nsflag::NsFlag;

/// Probes `/proc/self/ns/<name>` for every known flag, returning the subset
/// the running kernel actually supports.
pub fn supported_namespaces(proc_self_ns: &Path) -> HashSet<NsFlag> {
    NsFlag::ALL
        .into_iter()
        .filter(|ns| proc_self_ns.join(ns.name()).exists())
        .collect()
}

/// The kernel namespace identity exposed by `/proc/<pid>/ns/<name>`, e.g.
/// `pid:[4026531836]`. Two processes share a namespace iff these strings
/// are equal.
pub fn namespace_id(pid: i32, ns: NsFlag, proc_root: &Path) -> Result<String> {
    let path = proc_root.join(pid.to_string()).join("ns").join(ns.name());
    let target = fs::read_link(&path)
        .map_err(|_| NsconError::not_found(format!("{} is not available", path.display())))?;
    Ok(target.to_string_lossy().into_owned())
}

/// The namespaces among `candidates` where `pid`'s identity differs from
/// this process's own — i.e. the ones `new_ns_process_in_target` actually
/// needs to `setns` into, rather than ones the target already shares with
/// the caller.
pub fn unshared_namespaces(
    pid: i32,
    candidates: &[NsFlag],
    proc_root: &Path,
) -> Result<Vec<NsFlag>> {
    let mut out = Vec::new();
    for &ns in candidates {
        let target_id = namespace_id(pid, ns, proc_root)?;
        let self_id = namespace_id(unistd::getpid().as_raw(), ns, proc_root)?;
        if target_id != self_id {
            out.push(ns);
        }
    }
    Ok(out)
}

fn open_ns_fd(pid: i32, ns: NsFlag, proc_root: &Path) -> Result<RawFd> {
    let path = proc_root.join(pid.to_string()).join("ns").join(ns.name());
    fcntl::open(&path, OFlag::empty(), Mode::empty())
        .map_err(|e| NsconError::from_errno(&format!("open({})", path.display()), e))
}

/// Opens one FD per requested namespace (in `namespaces` order) then
/// `setns`-es them. A user namespace, if present, is attached first: the
/// uid/gid mapping it establishes must be in place before any other
/// namespace's privileged operations run.
pub fn attach_namespaces(
    process: &dyn ProcessOps,
    namespaces: &[NsFlag],
    target_pid: i32,
    proc_root: &Path,
) -> Result<()> {
    let fds: Vec<(NsFlag, RawFd)> = namespaces
        .iter()
        .map(|&ns| open_ns_fd(target_pid, ns, proc_root).map(|fd| (ns, fd)))
        .collect::<Result<_>>()?;

    let (user_fds, other_fds): (Vec<_>, Vec<_>) =
        fds.iter().partition(|(ns, _)| *ns == NsFlag::User);

    let result = (|| {
        for (ns, fd) in user_fds.iter().chain(other_fds.iter()) {
            process.setns(*fd, ns.clone_flag())?;
        }
        Ok(())
    })();

    for (_, fd) in &fds {
        let _ = unistd::close(*fd);
    }
    result
}

/// `unshare(2)`s the OR of `namespaces`' clone flags in one call.
pub fn unshare_namespaces(process: &dyn ProcessOps, namespaces: &[NsFlag]) -> Result<()> {
    process.unshare(crate::nsflag::combined_flags(namespaces))
}

/// A namespace FD saved via [`save_namespace`], restored and closed by
/// [`restore_and_delete`].
pub struct SavedNamespace {
    ns: NsFlag,
    fd: RawFd,
}

/// Opens an FD over the caller's current `/proc/self/ns/<name>`, to
/// `setns` back into later (used by `Update`'s save/attach/restore dance).
pub fn save_namespace(ns: NsFlag, proc_self_ns: &Path) -> Result<SavedNamespace> {
    let path = proc_self_ns.join(ns.name());
    let fd = fcntl::open(&path, OFlag::empty(), Mode::empty())
        .map_err(|e| NsconError::from_errno(&format!("open({})", path.display()), e))?;
    Ok(SavedNamespace { ns, fd })
}

pub fn restore_and_delete(process: &dyn ProcessOps, saved: SavedNamespace) -> Result<()> {
    let result = process.setns(saved.fd, saved.ns.clone_flag());
    let _ = unistd::close(saved.fd);
    result
}

/// Lists the numeric entries of `/proc/self/fd` — every FD currently open
/// in this process.
pub fn open_fds(proc_self_fd: &Path) -> Result<Vec<RawFd>> {
    let mut fds = Vec::new();
    for entry in fs::read_dir(proc_self_fd)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(fd) = name.parse::<RawFd>() {
                fds.push(fd);
            }
        }
    }
    Ok(fds)
}

/// Opens the slave side of the pty device numbered `minor` (e.g.
/// `/dev/pts/<minor>`), for handoff into the clone child's stdio.
pub fn open_slave_pty(minor: u32) -> Result<RawFd> {
    let path: PathBuf = format!("/dev/pts/{minor}").into();
    fcntl::open(&path, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
        .map_err(|e| NsconError::from_errno(&format!("open({})", path.display()), e))
}

/// Makes `slave_fd` the controlling tty of the calling process and dups it
/// onto stdin/stdout/stderr. Missing `TIOCSCTTY` support on non-Linux
/// targets is best-effort, neither an error nor a warning.
pub fn attach_to_console_fd(process: &dyn ProcessOps, slave_fd: RawFd) -> Result<()> {
    process.dup2(slave_fd, 0)?;
    process.dup2(slave_fd, 1)?;
    process.dup2(slave_fd, 2)?;
    #[cfg(target_os = "linux")]
    {
        if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) } < 0 {
            tracing::warn!("could not TIOCSCTTY on slave pty fd {slave_fd}");
        }
    }
    if slave_fd > 2 {
        let _ = unistd::close(slave_fd);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::syscall::test::TestProcess;

    #[test]
    fn supported_namespaces_reflects_probe_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pid"), "").unwrap();
        std::fs::write(dir.path().join("ipc"), "").unwrap();
        let supported = supported_namespaces(dir.path());
        assert!(supported.contains(&NsFlag::Pid));
        assert!(supported.contains(&NsFlag::Ipc));
        assert!(!supported.contains(&NsFlag::Net));
    }

    #[test]
    fn user_namespace_attaches_before_others() {
        let process = TestProcess::default();
        // Fake three FDs by pre-creating files whose inode numbers don't
        // matter; open_ns_fd is exercised indirectly via attach_namespaces
        // against a synthetic /proc-like tree.
        let proc_root = tempfile::tempdir().unwrap();
        for (pid_dir, ns) in [("9999", "ipc"), ("9999", "mnt"), ("9999", "user")] {
            let dir = proc_root.path().join(pid_dir).join("ns");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(ns), "").unwrap();
        }
        attach_namespaces(
            &process,
            &[NsFlag::Ipc, NsFlag::Mnt, NsFlag::User],
            9999,
            proc_root.path(),
        )
        .unwrap();
        let calls = process.calls.borrow();
        let setns_calls: Vec<&String> = calls.iter().filter(|c| c.starts_with("setns")).collect();
        assert_eq!(setns_calls.len(), 3);
        assert!(setns_calls[0].contains("CLONE_NEWUSER"));
    }
}
