//! Idempotent directory creation built on [`FsOps::mkdir`]. The single
//! `mkdir -p`-style entry point every cgroup/rootfs call site in this
//! workspace goes through, rather than each caller re-deriving the
//! walk-the-ancestors loop.

use std::path::Path;

use crate::error::Result;
use crate::syscall::FsOps;

/// Creates `path` and any missing ancestors with `mode`, tolerating a
/// directory that already exists (including one that raced into existence
/// between the `is_dir` check and the `mkdir` call).
pub fn ensure_dir_all(fs: &dyn FsOps, path: &Path, mode: u32) -> Result<()> {
    if fs.is_dir(path) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if parent != path && !parent.as_os_str().is_empty() {
            ensure_dir_all(fs, parent, mode)?;
        }
    }
    match fs.mkdir(path, mode) {
        Ok(()) => Ok(()),
        Err(_) if fs.is_dir(path) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestFs;

    #[test]
    fn creates_missing_ancestors_in_order() {
        let fs = TestFs::default();
        ensure_dir_all(&fs, Path::new("/a/b/c"), 0o755).unwrap();
        let calls = fs.calls.borrow();
        assert_eq!(
            calls.as_slice(),
            &[
                "mkdir(/a, 755)".to_string(),
                "mkdir(/a/b, 755)".to_string(),
                "mkdir(/a/b/c, 755)".to_string(),
            ]
        );
    }

    #[test]
    fn no_op_when_already_a_directory() {
        let fs = TestFs::default();
        fs.existing_dirs.borrow_mut().push(Path::new("/a").into());
        ensure_dir_all(&fs, Path::new("/a"), 0o755).unwrap();
        assert!(fs.calls.borrow().is_empty());
    }
}
