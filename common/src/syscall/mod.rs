//! Narrow named facades over `libc`/`nix`. These traits are the only call
//! sites in the workspace for `open`, `mount`, `clone`, `setns`, and their
//! kin — every other module receives a `Box<dyn FsOps>` / `Box<dyn
//! ProcessOps>` / `Box<dyn NetOps>` rather than reaching for `nix` directly.
//! Production code wires the `Linux*` implementations; tests substitute the
//! logging fakes in [`test`].

pub mod linux;
pub mod test;

use std::os::fd::RawFd;
use std::path::Path;

use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::{Gid, Pid, Uid};

use crate::error::Result;

/// Filesystem-facing syscalls: directory/file lifecycle and mount table
/// mutation.
pub trait FsOps: Send + Sync {
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;
    fn rmdir(&self, path: &Path) -> Result<()>;
    fn unlink(&self, path: &Path) -> Result<()>;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn exists(&self, path: &Path) -> bool;
    fn chown(&self, path: &Path, uid: Option<Uid>, gid: Option<Gid>) -> Result<()>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;
    fn chdir(&self, path: &Path) -> Result<()>;
    /// `open(O_WRONLY|O_CREAT|O_TRUNC)` + `write_all` — the one generic
    /// "put these bytes in a file" primitive, used by configurators that
    /// write a single control/mapping file outright rather than through a
    /// long-lived fd (`uid_map`/`gid_map`/`setgroups`, the machine-spec
    /// dump).
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn mount(
        &self,
        source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    fn umount2(&self, target: &Path, flags: nix::mount::MntFlags) -> Result<()>;
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()>;
    fn chroot(&self, path: &Path) -> Result<()>;

    /// `open(O_RDONLY|O_CREAT|O_EXCL|O_CLOEXEC, mode)` — the exclusive-create
    /// half of [`crate::error`]'s `AlreadyExists` for lock files.
    fn open_exclusive_create(&self, path: &Path, mode: u32) -> Result<RawFd>;
    /// `open(O_RDONLY|O_CLOEXEC)`.
    fn open_read(&self, path: &Path) -> Result<RawFd>;
    fn flock_exclusive(&self, fd: RawFd) -> Result<()>;
    fn flock_shared(&self, fd: RawFd) -> Result<()>;
    fn flock_unlock(&self, fd: RawFd) -> Result<()>;
    fn close_fd(&self, fd: RawFd) -> Result<()>;
    /// True iff `fd` and `path` currently name the same inode — used to
    /// detect a lock file unlinked out from under an open descriptor.
    fn fd_matches_path(&self, fd: RawFd, path: &Path) -> Result<bool>;
}

/// Process- and namespace-facing syscalls.
pub trait ProcessOps: Send + Sync {
    /// Runs `child_fn` on a fresh stack via `clone(2)` with `flags`.
    /// Returns the child's pid in the parent.
    unsafe fn clone_process(
        &self,
        flags: CloneFlags,
        child_fn: Box<dyn FnMut() -> isize>,
    ) -> Result<Pid>;
    fn fork(&self) -> Result<nix::unistd::ForkResult>;
    fn execve(&self, path: &Path, argv: &[std::ffi::CString]) -> Result<()>;
    fn setns(&self, fd: RawFd, nstype: CloneFlags) -> Result<()>;
    fn unshare(&self, flags: CloneFlags) -> Result<()>;
    fn setsid(&self) -> Result<Pid>;
    fn setresuid(&self, uid: Uid) -> Result<()>;
    fn setresgid(&self, gid: Gid) -> Result<()>;
    fn setgroups(&self, groups: &[Gid]) -> Result<()>;
    fn sethostname(&self, name: &str) -> Result<()>;
    fn setdomainname(&self, name: &str) -> Result<()>;
    fn kill(&self, pid: Pid, signal: Signal) -> Result<()>;
    fn waitpid(&self, pid: Pid) -> Result<nix::sys::wait::WaitStatus>;
    fn set_cloexec(&self, fd: RawFd) -> Result<()>;
    fn dup2(&self, oldfd: RawFd, newfd: RawFd) -> Result<()>;
}

/// Socket/pipe-facing syscalls used by the IPC barrier.
pub trait NetOps: Send + Sync {
    fn socket_stream_cloexec(&self) -> Result<RawFd>;
    fn bind_unix(&self, fd: RawFd, path: &Path) -> Result<()>;
    fn listen(&self, fd: RawFd, backlog: usize) -> Result<()>;
    fn accept(&self, fd: RawFd) -> Result<RawFd>;
    fn connect_unix(&self, path: &Path) -> Result<RawFd>;
    fn send(&self, fd: RawFd, data: &[u8]) -> Result<usize>;
    fn recv(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>>;
    fn peer_pid(&self, fd: RawFd) -> Result<Pid>;
    fn pipe_cloexec(&self) -> Result<(RawFd, RawFd)>;
    fn read(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>>;
    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize>;
    fn close(&self, fd: RawFd) -> Result<()>;
}

pub fn create_fs_ops() -> Box<dyn FsOps> {
    if cfg!(test) {
        Box::<test::TestFs>::default()
    } else {
        Box::new(linux::LinuxFs)
    }
}

pub fn create_process_ops() -> Box<dyn ProcessOps> {
    if cfg!(test) {
        Box::<test::TestProcess>::default()
    } else {
        Box::new(linux::LinuxProcess)
    }
}

pub fn create_net_ops() -> Box<dyn NetOps> {
    if cfg!(test) {
        Box::<test::TestNet>::default()
    } else {
        Box::new(linux::LinuxNet)
    }
}
