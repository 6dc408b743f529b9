//! A `NsHandle` names a namespace's init process the way a caller can hold
//! onto it past that process's lifetime: a `(cookie, pid)` pair where the
//! cookie is derived from the process's start time, so a later PID reuse by
//! an unrelated process is detected rather than silently followed.

use std::fmt;
use std::path::Path;

use common::error::{NsconError, Result};
use common::fileline::parse_stat_starttime;

/// Generates and validates the start-time cookie for a pid, reading
/// `<proc_root>/<pid>/stat`.
pub struct CookieGenerator<'a> {
    proc_root: &'a Path,
}

impl<'a> CookieGenerator<'a> {
    pub fn new(proc_root: &'a Path) -> Self {
        CookieGenerator { proc_root }
    }

    fn starttime(&self, pid: i32) -> Result<u64> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| NsconError::not_found(format!("no such process {pid}")))?;
        parse_stat_starttime(&contents)
            .ok_or_else(|| NsconError::internal(format!("malformed stat for pid {pid}")))
    }

    /// Builds the handle for the process currently running as `pid`.
    pub fn handle_for(&self, pid: i32) -> Result<NsHandle> {
        Ok(NsHandle {
            cookie: self.starttime(pid)?,
            pid,
        })
    }

    /// A handle is valid only if `pid` is still running and its current
    /// start time still matches the cookie recorded at creation; anything
    /// else means the pid was reused by a different process, or exited.
    pub fn is_valid(&self, handle: &NsHandle) -> bool {
        matches!(self.starttime(handle.pid), Ok(start) if start == handle.cookie)
    }
}

/// Opaque identity of a namespace's init process, safe to hold across
/// process restarts and compare for staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsHandle {
    cookie: u64,
    pid: i32,
}

impl NsHandle {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Parses the `c<starttime>-<pid>` wire form produced by [`Display`].
    pub fn parse(s: &str) -> Result<NsHandle> {
        let rest = s
            .strip_prefix('c')
            .ok_or_else(|| NsconError::invalid_argument(format!("malformed handle {s:?}")))?;
        let (cookie, pid) = rest
            .split_once('-')
            .ok_or_else(|| NsconError::invalid_argument(format!("malformed handle {s:?}")))?;
        Ok(NsHandle {
            cookie: cookie
                .parse()
                .map_err(|_| NsconError::invalid_argument(format!("malformed handle {s:?}")))?,
            pid: pid
                .parse()
                .map_err(|_| NsconError::invalid_argument(format!("malformed handle {s:?}")))?,
        })
    }
}

impl fmt::Display for NsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}-{}", self.cookie, self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stat(dir: &Path, pid: i32, starttime: &str) {
        let pid_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&pid_dir).unwrap();
        let stat = format!(
            "{pid} (init) S 0 {pid} {pid} 0 -1 4194304 0 0 0 0 0 0 0 0 20 0 1 0 {starttime} 0 0 0"
        );
        std::fs::write(pid_dir.join("stat"), stat).unwrap();
    }

    #[test]
    fn handle_round_trips_through_display_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, "1000");
        let gen = CookieGenerator::new(dir.path());
        let handle = gen.handle_for(42).unwrap();
        let wire = handle.to_string();
        let parsed = NsHandle::parse(&wire).unwrap();
        assert_eq!(parsed, handle);
        assert_eq!(parsed.pid(), 42);
    }

    #[test]
    fn handle_is_valid_while_process_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, "1000");
        let gen = CookieGenerator::new(dir.path());
        let handle = gen.handle_for(42).unwrap();
        assert!(gen.is_valid(&handle));
    }

    #[test]
    fn handle_is_stale_after_pid_reuse() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, "1000");
        let gen = CookieGenerator::new(dir.path());
        let handle = gen.handle_for(42).unwrap();
        // Simulate the original process exiting and an unrelated process
        // reusing the same pid with a different start time.
        write_stat(dir.path(), 42, "5000");
        assert!(!gen.is_valid(&handle));
    }

    #[test]
    fn handle_is_stale_when_process_gone() {
        let dir = tempfile::tempdir().unwrap();
        write_stat(dir.path(), 42, "1000");
        let gen = CookieGenerator::new(dir.path());
        let handle = gen.handle_for(42).unwrap();
        std::fs::remove_dir_all(dir.path().join("42")).unwrap();
        assert!(!gen.is_valid(&handle));
    }
}
