//! A cross-process container-name lock: a kernel `flock(2)` over a
//! per-container lock file, composed with an intra-process reader/writer
//! lock so threads of this process serialize the same way separate
//! processes do via the kernel lock.
//!
//! Layout for container `name`, under a configured `locks_dir`: a file
//! `<name>.lock` plus a sibling directory `<name>/` that hosts nested
//! containers' own lock files.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use common::error::{ErrorKind, NsconError, Result};
use common::fsutil::ensure_dir_all;
use common::syscall::{create_fs_ops, FsOps};

const ROOT_NAME: &str = "/";

fn is_enoent(e: &NsconError) -> bool {
    e.kind == ErrorKind::NotFound || e.message.contains("ENOENT")
}

fn lock_basename(name: &str) -> &str {
    if name == ROOT_NAME {
        "root"
    } else {
        name.trim_start_matches('/')
    }
}

/// Creates and opens per-container lock files under one directory.
pub struct LockFactory {
    locks_dir: PathBuf,
    fs: Box<dyn FsOps>,
}

impl LockFactory {
    pub fn new(locks_dir: impl Into<PathBuf>) -> Self {
        LockFactory {
            locks_dir: locks_dir.into(),
            fs: create_fs_ops(),
        }
    }

    fn lock_file_path(&self, name: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", lock_basename(name)))
    }

    fn lock_dir_path(&self, name: &str) -> PathBuf {
        self.locks_dir.join(lock_basename(name))
    }

    /// Exclusively creates `<name>.lock` then its sibling directory. Any
    /// failure after the file is created unlinks it, so a half-created
    /// container name never blocks a later retry.
    pub fn create(&self, name: &str) -> Result<FileLockHandler> {
        let lock_path = self.lock_file_path(name);
        let dir_path = self.lock_dir_path(name);
        let fd = self.fs.open_exclusive_create(&lock_path, 0o664)?;
        if let Err(e) = self.fs.mkdir(&dir_path, 0o755) {
            let _ = self.fs.close_fd(fd);
            let _ = self.fs.unlink(&lock_path);
            return Err(e);
        }
        Ok(FileLockHandler::new(
            name.to_string(),
            lock_path,
            dir_path,
            fd,
            name == ROOT_NAME,
        ))
    }

    /// Opens the lock file for an already-created container.
    pub fn get(&self, name: &str) -> Result<FileLockHandler> {
        let lock_path = self.lock_file_path(name);
        let dir_path = self.lock_dir_path(name);
        let fd = self.fs.open_read(&lock_path).map_err(|e| {
            if is_enoent(&e) {
                NsconError::not_found(format!("no lock file for container {name:?}"))
            } else {
                e
            }
        })?;
        Ok(FileLockHandler::new(
            name.to_string(),
            lock_path,
            dir_path,
            fd,
            name == ROOT_NAME,
        ))
    }

    /// Ensures the locks directory and the root container's lock file
    /// exist, tolerating a root lock created by an earlier run.
    pub fn init_machine(&self) -> Result<()> {
        ensure_dir_all(self.fs.as_ref(), &self.locks_dir, 0o755)?;
        match self.create(ROOT_NAME) {
            Ok(handler) => {
                // Drop the fd this call opened; init_machine only ensures
                // presence, callers re-`get` the root handle when they need it.
                let _ = handler.close();
                Ok(())
            }
            Err(e) if e.kind == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Shared,
    Exclusive,
}

/// A simple counting reader/writer lock whose acquire/release calls do not
/// need to be lexically scoped to one function — `FileLockHandler`'s state
/// machine crosses its `ExclusiveLock`/`SharedLock`/`Unlock` API one call at
/// a time, so a guard-typed lock (e.g. `std::sync::RwLock`) does not fit.
#[derive(Default)]
struct IntraProcessLock {
    mutex: Mutex<IntraState>,
    condvar: Condvar,
}

#[derive(Default)]
enum IntraState {
    #[default]
    Unlocked,
    Shared(usize),
    Exclusive,
}

impl IntraProcessLock {
    fn lock_exclusive(&self) {
        let mut state = self.mutex.lock().unwrap();
        while !matches!(*state, IntraState::Unlocked) {
            state = self.condvar.wait(state).unwrap();
        }
        *state = IntraState::Exclusive;
    }

    fn unlock_exclusive(&self) {
        let mut state = self.mutex.lock().unwrap();
        *state = IntraState::Unlocked;
        self.condvar.notify_all();
    }

    /// Re-entrant: a thread already holding the shared lock just bumps the
    /// count rather than blocking on itself.
    fn lock_shared(&self) {
        let mut state = self.mutex.lock().unwrap();
        loop {
            match *state {
                IntraState::Unlocked => {
                    *state = IntraState::Shared(1);
                    return;
                }
                IntraState::Shared(n) => {
                    *state = IntraState::Shared(n + 1);
                    return;
                }
                IntraState::Exclusive => {
                    state = self.condvar.wait(state).unwrap();
                }
            }
        }
    }

    fn unlock_shared(&self) {
        let mut state = self.mutex.lock().unwrap();
        match *state {
            IntraState::Shared(n) if n > 1 => *state = IntraState::Shared(n - 1),
            _ => *state = IntraState::Unlocked,
        }
        self.condvar.notify_all();
    }
}

/// One container's lock: the kernel `flock` plus the intra-process
/// reader/writer lock that mirrors it. `state_` (the `Mutex<LockState>`
/// below) protects the enum the same way the source's
/// `state_lock_`/`log_silencer_count_mutex_` protect small flags — a short
/// critical section around a few words, not the lock's hold duration.
pub struct FileLockHandler {
    name: String,
    lock_path: PathBuf,
    dir_path: PathBuf,
    is_root: bool,
    fd: RawFd,
    state: Mutex<LockState>,
    intraprocess: IntraProcessLock,
    fs: Box<dyn FsOps>,
}

impl FileLockHandler {
    fn new(name: String, lock_path: PathBuf, dir_path: PathBuf, fd: RawFd, is_root: bool) -> Self {
        FileLockHandler {
            name,
            lock_path,
            dir_path,
            is_root,
            fd,
            state: Mutex::new(LockState::Unlocked),
            intraprocess: IntraProcessLock::default(),
            fs: create_fs_ops(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LockState {
        *self.state.lock().unwrap()
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Verifies the fd still names the lock file on disk — a concurrent
    /// `Destroy` may have unlinked it between this handler's `open` and the
    /// `flock` that just succeeded.
    fn check_not_deleted(&self) -> Result<()> {
        match self.fs.fd_matches_path(self.fd, &self.lock_path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(NsconError::not_found(format!(
                "lock file for {:?} was removed",
                self.name
            ))),
            Err(e) => Err(e),
        }
    }

    pub fn exclusive_lock(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.intraprocess.lock_exclusive();
        if let Err(e) = self.fs.flock_exclusive(self.fd) {
            self.intraprocess.unlock_exclusive();
            return Err(NsconError::unavailable(e.to_string()));
        }
        if let Err(e) = self.check_not_deleted() {
            let _ = self.fs.flock_unlock(self.fd);
            self.intraprocess.unlock_exclusive();
            return Err(e);
        }
        *state = LockState::Exclusive;
        Ok(())
    }

    /// Re-entrant at the shared level: a caller already holding the shared
    /// lock does not re-acquire the kernel lock.
    pub fn shared_lock(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == LockState::Shared {
            return Ok(());
        }
        self.intraprocess.lock_shared();
        if let Err(e) = self.fs.flock_shared(self.fd) {
            self.intraprocess.unlock_shared();
            return Err(NsconError::unavailable(e.to_string()));
        }
        if let Err(e) = self.check_not_deleted() {
            let _ = self.fs.flock_unlock(self.fd);
            self.intraprocess.unlock_shared();
            return Err(e);
        }
        *state = LockState::Shared;
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            LockState::Unlocked => return Ok(()),
            LockState::Shared => {
                self.fs.flock_unlock(self.fd)?;
                self.intraprocess.unlock_shared();
            }
            LockState::Exclusive => {
                self.fs.flock_unlock(self.fd)?;
                self.intraprocess.unlock_exclusive();
            }
        }
        *state = LockState::Unlocked;
        Ok(())
    }

    /// Exclusively locks, then removes this container's directory and lock
    /// file. Forbidden on the root container. Tolerates either already
    /// being gone (a concurrent `Destroy` that raced and won).
    pub fn destroy(&self) -> Result<()> {
        if self.is_root {
            return Err(NsconError::permission_denied(
                "cannot destroy the root container lock",
            ));
        }
        self.exclusive_lock()?;
        match self.fs.rmdir(&self.dir_path) {
            Ok(()) => {}
            Err(e) if is_enoent(&e) => {}
            Err(e) => return Err(e),
        }
        match self.fs.unlink(&self.lock_path) {
            Ok(()) => {}
            Err(e) if is_enoent(&e) => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Drops this handler's own fd without touching lock state; used by
    /// `LockFactory::init_machine`, which only needs presence, not a held
    /// lock.
    fn close(self) -> Result<()> {
        self.fs.close_fd(self.fd)
    }
}

impl Drop for FileLockHandler {
    fn drop(&mut self) {
        let _ = self.unlock();
        let _ = self.fs.close_fd(self.fd);
    }
}
