//! Logging fakes for the syscall facades. Each fake records every call it
//! receives (in invocation order) so higher-level algorithms — the pivot
//! root sequence, FD namespace-attach ordering, the RunSpec FD sweep — can
//! be asserted on without touching the real kernel.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::{Gid, Pid, Uid};

use super::{FsOps, NetOps, ProcessOps};
use crate::error::Result;

#[derive(Default)]
pub struct TestFs {
    pub calls: RefCell<Vec<String>>,
    pub existing_dirs: RefCell<Vec<PathBuf>>,
    /// Paths that must fail `open_exclusive_create` with `AlreadyExists`.
    pub existing_files: RefCell<Vec<PathBuf>>,
    /// Paths `fd_matches_path` should report as gone (simulating a concurrent unlink).
    pub unlinked_paths: RefCell<Vec<PathBuf>>,
    /// Paths `rmdir`/`unlink` should report as already gone (`NotFound`),
    /// exercising the "tolerate already-gone" cleanup paths.
    pub missing_paths: RefCell<Vec<PathBuf>>,
    /// Contents passed to `write_file`, in call order, keyed by path.
    pub written_files: RefCell<Vec<(PathBuf, Vec<u8>)>>,
    next_fd: RefCell<RawFd>,
}

impl FsOps for TestFs {
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("mkdir({}, {:o})", path.display(), mode));
        self.existing_dirs.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("rmdir({})", path.display()));
        if self.missing_paths.borrow().iter().any(|p| p == path) {
            return Err(crate::error::NsconError::not_found(format!(
                "{} does not exist",
                path.display()
            )));
        }
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("unlink({})", path.display()));
        if self.missing_paths.borrow().iter().any(|p| p == path) {
            return Err(crate::error::NsconError::not_found(format!(
                "{} does not exist",
                path.display()
            )));
        }
        self.existing_files.borrow_mut().retain(|p| p != path);
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.existing_dirs.borrow().iter().any(|p| p == path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.existing_files.borrow().iter().any(|p| p == path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_dir(path) || self.is_file(path)
    }

    fn chown(&self, path: &Path, uid: Option<Uid>, gid: Option<Gid>) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("chown({}, {:?}, {:?})", path.display(), uid, gid));
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("chmod({}, {:o})", path.display(), mode));
        Ok(())
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("chdir({})", path.display()));
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("write_file({}, {}B)", path.display(), contents.len()));
        self.written_files
            .borrow_mut()
            .push((path.to_path_buf(), contents.to_vec()));
        self.existing_files.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn mount(
        &self,
        source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.calls.borrow_mut().push(format!(
            "mount({:?}, {}, {:?}, {:?}, {:?})",
            source,
            target.display(),
            fstype,
            flags,
            data
        ));
        Ok(())
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("umount2({}, {:?})", target.display(), flags));
        Ok(())
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        self.calls.borrow_mut().push(format!(
            "pivot_root({}, {})",
            new_root.display(),
            put_old.display()
        ));
        Ok(())
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("chroot({})", path.display()));
        Ok(())
    }

    fn open_exclusive_create(&self, path: &Path, mode: u32) -> Result<RawFd> {
        self.calls
            .borrow_mut()
            .push(format!("open_exclusive_create({}, {:o})", path.display(), mode));
        if self.existing_files.borrow().iter().any(|p| p == path) {
            return Err(crate::error::NsconError::already_exists(format!(
                "{} already exists",
                path.display()
            )));
        }
        self.existing_files.borrow_mut().push(path.to_path_buf());
        let mut fd = self.next_fd.borrow_mut();
        *fd += 1;
        Ok(*fd)
    }

    fn open_read(&self, path: &Path) -> Result<RawFd> {
        self.calls
            .borrow_mut()
            .push(format!("open_read({})", path.display()));
        if !self.existing_files.borrow().iter().any(|p| p == path) {
            return Err(crate::error::NsconError::not_found(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let mut fd = self.next_fd.borrow_mut();
        *fd += 1;
        Ok(*fd)
    }

    fn flock_exclusive(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("flock_exclusive({fd})"));
        Ok(())
    }

    fn flock_shared(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("flock_shared({fd})"));
        Ok(())
    }

    fn flock_unlock(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("flock_unlock({fd})"));
        Ok(())
    }

    fn close_fd(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("close_fd({fd})"));
        Ok(())
    }

    fn fd_matches_path(&self, _fd: RawFd, path: &Path) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(format!("fd_matches_path({})", path.display()));
        Ok(!self.unlinked_paths.borrow().iter().any(|p| p == path))
    }
}

#[derive(Default)]
pub struct TestProcess {
    pub calls: RefCell<Vec<String>>,
}

impl ProcessOps for TestProcess {
    unsafe fn clone_process(
        &self,
        _flags: CloneFlags,
        _child_fn: Box<dyn FnMut() -> isize>,
    ) -> Result<Pid> {
        self.calls.borrow_mut().push("clone".to_string());
        Ok(Pid::from_raw(0))
    }

    fn fork(&self) -> Result<nix::unistd::ForkResult> {
        self.calls.borrow_mut().push("fork".to_string());
        Ok(nix::unistd::ForkResult::Child)
    }

    fn execve(&self, path: &Path, _argv: &[std::ffi::CString]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("execve({})", path.display()));
        Ok(())
    }

    fn setns(&self, fd: RawFd, nstype: CloneFlags) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("setns({fd}, {nstype:?})"));
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("unshare({flags:?})"));
        Ok(())
    }

    fn setsid(&self) -> Result<Pid> {
        self.calls.borrow_mut().push("setsid".to_string());
        Ok(Pid::from_raw(0))
    }

    fn setresuid(&self, uid: Uid) -> Result<()> {
        self.calls.borrow_mut().push(format!("setresuid({uid})"));
        Ok(())
    }

    fn setresgid(&self, gid: Gid) -> Result<()> {
        self.calls.borrow_mut().push(format!("setresgid({gid})"));
        Ok(())
    }

    fn setgroups(&self, groups: &[Gid]) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("setgroups({groups:?})"));
        Ok(())
    }

    fn sethostname(&self, name: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("sethostname({name})"));
        Ok(())
    }

    fn setdomainname(&self, name: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("setdomainname({name})"));
        Ok(())
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("kill({pid}, {signal:?})"));
        Ok(())
    }

    fn waitpid(&self, pid: Pid) -> Result<nix::sys::wait::WaitStatus> {
        self.calls.borrow_mut().push(format!("waitpid({pid})"));
        Ok(nix::sys::wait::WaitStatus::Exited(pid, 0))
    }

    fn set_cloexec(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("set_cloexec({fd})"));
        Ok(())
    }

    fn dup2(&self, oldfd: RawFd, newfd: RawFd) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("dup2({oldfd}, {newfd})"));
        Ok(())
    }
}

#[derive(Default)]
pub struct TestNet {
    pub calls: RefCell<Vec<String>>,
    /// Scripted responses for successive `read` calls, consumed in order;
    /// once exhausted, `read` falls back to returning an empty `Vec`
    /// (the "peer closed without writing" case).
    pub read_queue: RefCell<std::collections::VecDeque<Vec<u8>>>,
}

impl NetOps for TestNet {
    fn socket_stream_cloexec(&self) -> Result<RawFd> {
        self.calls.borrow_mut().push("socket".to_string());
        Ok(-1)
    }

    fn bind_unix(&self, fd: RawFd, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("bind({fd}, {})", path.display()));
        Ok(())
    }

    fn listen(&self, fd: RawFd, backlog: usize) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("listen({fd}, {backlog})"));
        Ok(())
    }

    fn accept(&self, fd: RawFd) -> Result<RawFd> {
        self.calls.borrow_mut().push(format!("accept({fd})"));
        Ok(-1)
    }

    fn connect_unix(&self, path: &Path) -> Result<RawFd> {
        self.calls
            .borrow_mut()
            .push(format!("connect({})", path.display()));
        Ok(-1)
    }

    fn send(&self, fd: RawFd, data: &[u8]) -> Result<usize> {
        self.calls
            .borrow_mut()
            .push(format!("send({fd}, {} bytes)", data.len()));
        Ok(data.len())
    }

    fn recv(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>> {
        self.calls
            .borrow_mut()
            .push(format!("recv({fd}, {max_len})"));
        Ok(Vec::new())
    }

    fn peer_pid(&self, fd: RawFd) -> Result<Pid> {
        self.calls.borrow_mut().push(format!("peer_pid({fd})"));
        Ok(Pid::from_raw(0))
    }

    fn pipe_cloexec(&self) -> Result<(RawFd, RawFd)> {
        self.calls.borrow_mut().push("pipe".to_string());
        Ok((-1, -1))
    }

    fn read(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>> {
        self.calls
            .borrow_mut()
            .push(format!("read({fd}, {max_len})"));
        Ok(self.read_queue.borrow_mut().pop_front().unwrap_or_default())
    }

    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize> {
        self.calls
            .borrow_mut()
            .push(format!("write({fd}, {} bytes)", data.len()));
        Ok(data.len())
    }

    fn close(&self, fd: RawFd) -> Result<()> {
        self.calls.borrow_mut().push(format!("close({fd})"));
        Ok(())
    }
}
