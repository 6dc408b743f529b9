//! Production implementations of the syscall facades, wiring straight onto
//! `nix`/`libc`.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::fcntl::{self, FlockArg, OFlag};
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::sys::socket::{self, UnixAddr};
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Pid, Uid};

use super::{FsOps, NetOps, ProcessOps};
use crate::error::{NsconError, Result};

pub struct LinuxFs;

impl FsOps for LinuxFs {
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        nix::unistd::mkdir(path, Mode::from_bits_truncate(mode))
            .map_err(|e| NsconError::from_errno(&format!("mkdir({})", path.display()), e))
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        nix::unistd::rmdir(path)
            .map_err(|e| NsconError::from_errno(&format!("rmdir({})", path.display()), e))
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        nix::unistd::unlink(path)
            .map_err(|e| NsconError::from_errno(&format!("unlink({})", path.display()), e))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn chown(&self, path: &Path, uid: Option<Uid>, gid: Option<Gid>) -> Result<()> {
        nix::unistd::chown(path, uid, gid)
            .map_err(|e| NsconError::from_errno(&format!("chown({})", path.display()), e))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        nix::sys::stat::fchmodat(
            None,
            path,
            Mode::from_bits_truncate(mode),
            nix::sys::stat::FchmodatFlags::FollowSymlink,
        )
        .map_err(|e| NsconError::from_errno(&format!("chmod({})", path.display()), e))
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        nix::unistd::chdir(path)
            .map_err(|e| NsconError::from_errno(&format!("chdir({})", path.display()), e))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        std::fs::write(path, contents)?;
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
        nix::mount::mount(source, target, fstype, flags, data)
            .map_err(|e| NsconError::from_errno(&format!("mount({})", target.display()), e))
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        nix::mount::umount2(target, flags)
            .map_err(|e| NsconError::from_errno(&format!("umount2({})", target.display()), e))
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        nix::unistd::pivot_root(new_root, put_old).map_err(|e| {
            NsconError::from_errno(
                &format!(
                    "pivot_root({}, {})",
                    new_root.display(),
                    put_old.display()
                ),
                e,
            )
        })
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        nix::unistd::chroot(path)
            .map_err(|e| NsconError::from_errno(&format!("chroot({})", path.display()), e))
    }

    fn open_exclusive_create(&self, path: &Path, mode: u32) -> Result<RawFd> {
        fcntl::open(
            path,
            OFlag::O_RDONLY | OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(mode),
        )
        .map_err(|e| NsconError::from_errno(&format!("open({})", path.display()), e))
    }

    fn open_read(&self, path: &Path) -> Result<RawFd> {
        fcntl::open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
            .map_err(|e| NsconError::from_errno(&format!("open({})", path.display()), e))
    }

    fn flock_exclusive(&self, fd: RawFd) -> Result<()> {
        fcntl::flock(fd, FlockArg::LockExclusive)
            .map_err(|e| NsconError::from_errno("flock(LOCK_EX)", e))
    }

    fn flock_shared(&self, fd: RawFd) -> Result<()> {
        fcntl::flock(fd, FlockArg::LockShared)
            .map_err(|e| NsconError::from_errno("flock(LOCK_SH)", e))
    }

    fn flock_unlock(&self, fd: RawFd) -> Result<()> {
        fcntl::flock(fd, FlockArg::Unlock)
            .map_err(|e| NsconError::from_errno("flock(LOCK_UN)", e))
    }

    fn close_fd(&self, fd: RawFd) -> Result<()> {
        nix::unistd::close(fd).map_err(|e| NsconError::from_errno("close", e))
    }

    fn fd_matches_path(&self, fd: RawFd, path: &Path) -> Result<bool> {
        let by_fd = nix::sys::stat::fstat(fd).map_err(|e| NsconError::from_errno("fstat", e))?;
        let by_path = match nix::sys::stat::stat(path) {
            Ok(st) => st,
            Err(nix::Error::ENOENT) => return Ok(false),
            Err(e) => return Err(NsconError::from_errno("stat", e)),
        };
        Ok(by_fd.st_dev == by_path.st_dev && by_fd.st_ino == by_path.st_ino)
    }
}

pub struct LinuxProcess;

impl ProcessOps for LinuxProcess {
    unsafe fn clone_process(
        &self,
        flags: CloneFlags,
        mut child_fn: Box<dyn FnMut() -> isize>,
    ) -> Result<Pid> {
        const STACK_SIZE: usize = 1024 * 1024;
        let mut stack = vec![0u8; STACK_SIZE];
        nix::sched::clone(
            Box::new(move || child_fn()),
            &mut stack,
            flags,
            Some(Signal::SIGCHLD as i32),
        )
        .map_err(|e| NsconError::from_errno("clone", e))
    }

    fn fork(&self) -> Result<nix::unistd::ForkResult> {
        unsafe { nix::unistd::fork() }.map_err(|e| NsconError::from_errno("fork", e))
    }

    fn execve(&self, path: &Path, argv: &[CString]) -> Result<()> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| NsconError::invalid_argument(e.to_string()))?;
        let env: Vec<CString> = std::env::vars()
            .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
            .collect();
        nix::unistd::execve(&path, argv, &env)
            .map_err(|e| NsconError::from_errno("execve", e))?;
        unreachable!("execve only returns on error")
    }

    fn setns(&self, fd: RawFd, nstype: CloneFlags) -> Result<()> {
        nix::sched::setns(fd, nstype).map_err(|e| NsconError::from_errno("setns", e))
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        nix::sched::unshare(flags).map_err(|e| NsconError::from_errno("unshare", e))
    }

    fn setsid(&self) -> Result<Pid> {
        nix::unistd::setsid().map_err(|e| NsconError::from_errno("setsid", e))
    }

    fn setresuid(&self, uid: Uid) -> Result<()> {
        nix::unistd::setresuid(uid, uid, uid).map_err(|e| NsconError::from_errno("setresuid", e))
    }

    fn setresgid(&self, gid: Gid) -> Result<()> {
        nix::unistd::setresgid(gid, gid, gid).map_err(|e| NsconError::from_errno("setresgid", e))
    }

    fn setgroups(&self, groups: &[Gid]) -> Result<()> {
        nix::unistd::setgroups(groups).map_err(|e| NsconError::from_errno("setgroups", e))
    }

    fn sethostname(&self, name: &str) -> Result<()> {
        nix::unistd::sethostname(name).map_err(|e| NsconError::from_errno("sethostname", e))
    }

    fn setdomainname(&self, name: &str) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            let res = unsafe { libc::setdomainname(name.as_ptr() as *const _, name.len()) };
            if res != 0 {
                return Err(NsconError::internal(format!(
                    "setdomainname: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(())
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = name;
            Ok(())
        }
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        nix::sys::signal::kill(pid, signal).map_err(|e| NsconError::from_errno("kill", e))
    }

    fn waitpid(&self, pid: Pid) -> Result<nix::sys::wait::WaitStatus> {
        nix::sys::wait::waitpid(pid, None).map_err(|e| NsconError::from_errno("waitpid", e))
    }

    fn set_cloexec(&self, fd: RawFd) -> Result<()> {
        nix::fcntl::fcntl(
            fd,
            nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC),
        )
        .map_err(|e| NsconError::from_errno("fcntl(F_SETFD)", e))?;
        Ok(())
    }

    fn dup2(&self, oldfd: RawFd, newfd: RawFd) -> Result<()> {
        nix::unistd::dup2(oldfd, newfd).map_err(|e| NsconError::from_errno("dup2", e))?;
        Ok(())
    }
}

pub struct LinuxNet;

impl NetOps for LinuxNet {
    fn socket_stream_cloexec(&self) -> Result<RawFd> {
        socket::socket(
            socket::AddressFamily::Unix,
            socket::SockType::Stream,
            socket::SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| NsconError::from_errno("socket", e))
    }

    fn bind_unix(&self, fd: RawFd, path: &Path) -> Result<()> {
        let addr = UnixAddr::new(path).map_err(|e| NsconError::from_errno("bind path", e))?;
        socket::bind(fd, &addr).map_err(|e| NsconError::from_errno("bind", e))
    }

    fn listen(&self, fd: RawFd, backlog: usize) -> Result<()> {
        socket::listen(fd, backlog).map_err(|e| NsconError::from_errno("listen", e))
    }

    fn accept(&self, fd: RawFd) -> Result<RawFd> {
        loop {
            match socket::accept4(fd, socket::SockFlag::SOCK_CLOEXEC) {
                Ok(client) => return Ok(client),
                Err(nix::Error::EINTR) => continue,
                Err(e) => return Err(NsconError::from_errno("accept", e)),
            }
        }
    }

    fn connect_unix(&self, path: &Path) -> Result<RawFd> {
        let fd = socket::socket(
            socket::AddressFamily::Unix,
            socket::SockType::Stream,
            socket::SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| NsconError::from_errno("socket", e))?;
        let addr = UnixAddr::new(path).map_err(|e| NsconError::from_errno("connect path", e))?;
        socket::connect(fd, &addr).map_err(|e| NsconError::from_errno("connect", e))?;
        Ok(fd)
    }

    fn send(&self, fd: RawFd, data: &[u8]) -> Result<usize> {
        socket::send(fd, data, socket::MsgFlags::empty())
            .map_err(|e| NsconError::from_errno("send", e))
    }

    fn recv(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = socket::recv(fd, &mut buf, socket::MsgFlags::empty())
            .map_err(|e| NsconError::from_errno("recv", e))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn peer_pid(&self, fd: RawFd) -> Result<Pid> {
        let cred: nix::sys::socket::UnixCredentials =
            socket::getsockopt(fd, socket::sockopt::PeerCredentials)
                .map_err(|e| NsconError::from_errno("getsockopt(SO_PEERCRED)", e))?;
        Ok(Pid::from_raw(cred.pid()))
    }

    fn pipe_cloexec(&self) -> Result<(RawFd, RawFd)> {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
            .map_err(|e| NsconError::from_errno("pipe2", e))
    }

    fn read(&self, fd: RawFd, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = nix::unistd::read(fd, &mut buf).map_err(|e| NsconError::from_errno("read", e))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize> {
        nix::unistd::write(fd, data).map_err(|e| NsconError::from_errno("write", e))
    }

    fn close(&self, fd: RawFd) -> Result<()> {
        nix::unistd::close(fd).map_err(|e| NsconError::from_errno("close", e))
    }
}
