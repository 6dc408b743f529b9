//! The cross-namespace synchronization barrier: a Unix-domain socket for
//! carrying data (a child's error message, or its pid) plus an anonymous
//! pipe for the simple "proceed"/"done" signal around a `clone(2)` call.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use common::error::Result;
use common::syscall::{create_fs_ops, create_net_ops, FsOps, NetOps};
use common::timeutil::epoch_us;
use nix::unistd::Pid;

/// One rendezvous point between a launcher and the process it just cloned.
/// Constructed in the parent before the clone; the child connects to the
/// socket and writes its own end of the pipe.
pub struct IpcAgent {
    net: Box<dyn NetOps>,
    fs: Box<dyn FsOps>,
    path: PathBuf,
    listen_fd: RawFd,
    pipe_read: RawFd,
    pipe_write: RawFd,
}

impl IpcAgent {
    /// Binds a fresh UDS under `dir` (normally `/tmp`) named after the
    /// caller's pid and the current time, then opens the barrier pipe.
    pub fn new(dir: &Path) -> Result<IpcAgent> {
        let net = create_net_ops();
        let fs = create_fs_ops();
        let path = dir.join(format!(
            "nscon.uds_{}_{}",
            nix::unistd::getpid(),
            epoch_us()
        ));
        let listen_fd = net.socket_stream_cloexec()?;
        net.bind_unix(listen_fd, &path)?;
        fs.chmod(&path, 0o777)?;
        net.listen(listen_fd, 1)?;
        let (pipe_read, pipe_write) = net.pipe_cloexec()?;
        Ok(IpcAgent {
            net,
            fs,
            path,
            listen_fd,
            pipe_read,
            pipe_write,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// The barrier pipe's raw (read, write) fds. A process on the other
    /// side of a `clone`/`fork` shares these fd numbers (fds survive both
    /// syscalls) but cannot share this wrapper object itself, since its
    /// own methods each permanently close one end — a grandchild instead
    /// operates on the raw numbers directly via its own `NetOps` handle.
    pub fn barrier_fds(&self) -> (RawFd, RawFd) {
        (self.pipe_read, self.pipe_write)
    }

    /// Connects to this agent's own socket and sends `bytes`; callable from
    /// either side of a `fork`, any time between `fork` and `exec`.
    pub fn write_data(&self, bytes: &[u8]) -> Result<()> {
        send_to(&self.path, bytes)
    }

    /// Blocks for one connection, returning its payload and the connecting
    /// process's pid via `SO_PEERCRED`.
    pub fn read_data(&self) -> Result<(Vec<u8>, Pid)> {
        let conn = loop {
            match self.net.accept(self.listen_fd) {
                Ok(fd) => break fd,
                Err(e) if is_eintr(&e) => continue,
                Err(e) => return Err(e),
            }
        };
        let sender = self.net.peer_pid(conn)?;
        let bytes = self.net.recv(conn, 4096)?;
        let _ = self.net.close(conn);
        Ok((bytes, sender))
    }

    /// Releases the child side of the barrier: close the read end (this
    /// side does not use it) and write one byte on the write end.
    pub fn signal_parent(&self) -> Result<()> {
        self.net.close(self.pipe_read)?;
        self.net.write(self.pipe_write, &[0u8])?;
        Ok(())
    }

    /// Blocks until the child signals or exits: close the write end (this
    /// side does not use it) and read one byte on the read end. A
    /// zero-length read means the peer closed its write end without
    /// writing, which this barrier treats as successful `exec`.
    pub fn wait_for_child(&self) -> Result<()> {
        self.net.close(self.pipe_write)?;
        let buf = self.net.read(self.pipe_read, 1)?;
        if buf.is_empty() {
            return Err(common::error::NsconError::cancelled(
                "peer closed barrier pipe without writing",
            ));
        }
        Ok(())
    }

    /// Unlinks the socket path and closes every FD this agent still owns.
    pub fn destroy(self) -> Result<()> {
        let _ = self.fs.unlink(&self.path);
        let _ = self.net.close(self.listen_fd);
        let _ = self.net.close(self.pipe_read);
        let _ = self.net.close(self.pipe_write);
        Ok(())
    }
}

fn is_eintr(e: &common::error::NsconError) -> bool {
    e.message.contains("EINTR")
}

/// Connects to the rendezvous socket at `path` and sends `bytes`, then
/// closes the connection. Used both by `IpcAgent::write_data` and by a
/// grandchild process that only knows the path, not the `IpcAgent` that
/// created it.
pub fn send_to(path: &Path, bytes: &[u8]) -> Result<()> {
    let net = create_net_ops();
    let fd = net.connect_unix(path)?;
    let result = net.send(fd, bytes);
    let _ = net.close(fd);
    result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_binds_listens_and_opens_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let agent = IpcAgent::new(dir.path()).unwrap();
        assert!(agent
            .socket_path()
            .to_string_lossy()
            .starts_with(&*dir.path().join("nscon.uds_").to_string_lossy()));
    }

    #[test]
    fn signal_parent_closes_read_end_first() {
        let dir = tempfile::tempdir().unwrap();
        let agent = IpcAgent::new(dir.path()).unwrap();
        agent.signal_parent().unwrap();
    }

    #[test]
    fn wait_for_child_closes_write_end_first() {
        let dir = tempfile::tempdir().unwrap();
        let agent = IpcAgent::new(dir.path()).unwrap();
        // The TestNet fake's read() always returns an empty Vec, exercising
        // the "peer closed cleanly" / exec-succeeded path.
        let err = agent.wait_for_child().unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::Cancelled);
    }

    #[test]
    fn destroy_unlinks_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let agent = IpcAgent::new(dir.path()).unwrap();
        agent.destroy().unwrap();
    }
}
