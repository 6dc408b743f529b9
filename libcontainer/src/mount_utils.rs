//! Mount-table primitives shared by the filesystem configurator: bind
//! mounts, tmpfs mounts, device mounts, and recursive unmount.

use std::path::Path;

use common::error::{NsconError, Result};
use common::fileline::mounts_at;
use common::syscall::FsOps;
use nix::mount::{MntFlags, MsFlags};

/// Bind-mount option flags, folded independently of the raw `MsFlags` the
/// underlying `mount(2)` call needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindOpts {
    pub recursive: bool,
    pub read_only: bool,
    pub private: bool,
    pub slave: bool,
}

pub fn bind_mount(fs: &dyn FsOps, source: &Path, target: &Path, opts: BindOpts) -> Result<()> {
    if opts.private && opts.slave {
        return Err(NsconError::invalid_argument(
            "bind mount cannot be both private and slave",
        ));
    }
    let mut flags = MsFlags::MS_NODEV | MsFlags::MS_NOSUID | MsFlags::MS_BIND;
    if opts.recursive {
        flags |= MsFlags::MS_REC;
    }
    let source_str = source.to_string_lossy();
    fs.mount(Some(source_str.as_ref()), target, None, flags, None)?;

    if opts.read_only {
        fs.mount(
            None,
            target,
            None,
            flags | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )?;
    }
    if opts.private {
        let mut priv_flags = MsFlags::MS_PRIVATE;
        if opts.recursive {
            priv_flags |= MsFlags::MS_REC;
        }
        fs.mount(None, target, None, priv_flags, None)?;
    }
    if opts.slave {
        let mut slave_flags = MsFlags::MS_SLAVE;
        if opts.recursive {
            slave_flags |= MsFlags::MS_REC;
        }
        fs.mount(None, target, None, slave_flags, None)?;
    }
    Ok(())
}

/// Mounts (or remounts) `size_bytes` of tmpfs at `path`. `opts` is an
/// arbitrary comma-separated mount option string; any `size=` component the
/// caller supplied is discarded and replaced.
pub fn mount_tmpfs(
    fs: &dyn FsOps,
    proc_mounts: &Path,
    path: &Path,
    size_bytes: i64,
    opts: &str,
) -> Result<()> {
    if size_bytes <= 0 {
        return Err(NsconError::invalid_argument(format!(
            "tmpfs size must be positive, got {size_bytes}"
        )));
    }
    let filtered: Vec<&str> = opts
        .split(',')
        .filter(|o| !o.is_empty() && !o.starts_with("size="))
        .collect();
    let mut data = filtered.join(",");
    if !data.is_empty() {
        data.push(',');
    }
    data.push_str(&format!("size={size_bytes}"));

    let existing = mounts_at(proc_mounts)
        .ok()
        .and_then(|mut lines| lines.find(|m| m.mountpoint == path.to_string_lossy()));
    let flags = match existing {
        Some(entry) if entry.fstype == "tmpfs" => MsFlags::MS_REMOUNT,
        Some(_) => {
            return Err(NsconError::failed_precondition(format!(
                "{} is mounted with a non-tmpfs filesystem",
                path.display()
            )))
        }
        None => MsFlags::empty(),
    };
    fs.mount(Some("tmpfs"), path, Some("tmpfs"), flags, Some(&data))
}

/// A thin, explicitly named wrapper around `mount(2)` for block/pseudo
/// devices — kept distinct from [`bind_mount`]/[`mount_tmpfs`] so call
/// sites read as intent.
pub fn mount_device(
    fs: &dyn FsOps,
    device: &str,
    target: &Path,
    fstype: &str,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    fs.mount(Some(device), target, Some(fstype), flags, data)
}

fn add_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Unmounts every mountpoint under `path` (deepest first) then `path`
/// itself. Already-gone mountpoints are treated as success.
pub fn unmount_recursive(fs: &dyn FsOps, proc_mounts: &Path, path: &Path) -> Result<()> {
    let prefix = add_slash(&path.to_string_lossy());
    let mut under: Vec<String> = mounts_at(proc_mounts)?
        .filter(|m| m.mountpoint.starts_with(&prefix))
        .map(|m| m.mountpoint)
        .collect();
    // /proc/mounts lists mounts in mount order (shallow to deep for a
    // subtree built by successive mounts); reversing gives deepest-first.
    under.reverse();

    let mut failures = Vec::new();
    for mp in &under {
        if let Err(e) = fs.umount2(Path::new(mp), MntFlags::empty()) {
            failures.push((mp.clone(), e));
        }
    }

    match fs.umount2(path, MntFlags::empty()) {
        Ok(()) => Ok(()),
        Err(e) if is_enoent_or_einval(&e) => {
            if failures.is_empty() {
                Ok(())
            } else {
                Err(NsconError::internal(format!(
                    "failed to unmount {} submounts: {:?}",
                    failures.len(),
                    failures.iter().map(|(p, _)| p).collect::<Vec<_>>()
                )))
            }
        }
        Err(e) => Err(NsconError::internal(format!(
            "umount2({}): {e} (plus {} prior sub-unmount failures)",
            path.display(),
            failures.len()
        ))),
    }
}

fn is_enoent_or_einval(e: &NsconError) -> bool {
    e.message.contains("ENOENT") || e.message.contains("EINVAL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::syscall::test::TestFs;

    #[test]
    fn bind_mount_rejects_private_and_slave() {
        let fs = TestFs::default();
        let err = bind_mount(
            &fs,
            Path::new("/src"),
            Path::new("/dst"),
            BindOpts {
                private: true,
                slave: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn bind_mount_readonly_issues_remount() {
        let fs = TestFs::default();
        bind_mount(
            &fs,
            Path::new("/src"),
            Path::new("/dst"),
            BindOpts {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        let calls = fs.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("MS_REMOUNT") || calls[1].contains("RDONLY"));
    }

    #[test]
    fn mount_tmpfs_strips_user_size_option() {
        let fs = TestFs::default();
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "").unwrap();
        mount_tmpfs(
            &fs,
            &mounts,
            Path::new("/tmp/x"),
            1024,
            "size=999,mode=1777",
        )
        .unwrap();
        let calls = fs.calls.borrow();
        assert!(calls[0].contains("size=1024"));
        assert!(!calls[0].contains("size=999"));
        assert!(calls[0].contains("mode=1777"));
    }

    #[test]
    fn mount_tmpfs_rejects_non_tmpfs_existing_mount() {
        let fs = TestFs::default();
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "none /tmp/x ext4 rw 0 0\n").unwrap();
        let err = mount_tmpfs(&fs, &mounts, Path::new("/tmp/x"), 1024, "").unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::FailedPrecondition);
    }

    #[test]
    fn mount_tmpfs_rejects_non_positive_size() {
        let fs = TestFs::default();
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "").unwrap();
        let err = mount_tmpfs(&fs, &mounts, Path::new("/tmp/x"), 0, "").unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::InvalidArgument);
        let err = mount_tmpfs(&fs, &mounts, Path::new("/tmp/x"), -5, "").unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn unmount_recursive_goes_deepest_first() {
        let fs = TestFs::default();
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        std::fs::write(
            &mounts,
            "none /a proc rw 0 0\nnone /a/b tmpfs rw 0 0\nnone /a/b/c tmpfs rw 0 0\n",
        )
        .unwrap();
        unmount_recursive(&fs, &mounts, Path::new("/a")).unwrap();
        let calls = fs.calls.borrow();
        assert!(calls[0].contains("/a/b/c"));
        assert!(calls[1].contains("/a/b"));
        assert!(calls[2].contains("/a)") || calls[2].contains("/a,"));
    }
}
