//! The filesystem configurator: the hardest single algorithm in the
//! controller. Runs entirely inside the new mount namespace — everything
//! here mutates a mount table nobody outside this namespace can see.

use std::path::{Path, PathBuf};

use common::error::{NsconError, Result};
use common::fileline::{mounts_at, MountEntry};
use common::fsutil::ensure_dir_all;
use common::timeutil::epoch_us;
use nix::mount::{MntFlags, MsFlags};

use super::{Configurator, InsideContext, OutsideContext};
use crate::mount_utils::{bind_mount, BindOpts};

const PIVOT_DIR_MODE: u32 = 0o700;

fn dev_mount_flags() -> MsFlags {
    MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID
}

pub struct FilesystemConfigurator {
    /// `/proc/mounts`, overridable in tests.
    pub proc_mounts: PathBuf,
}

impl Default for FilesystemConfigurator {
    fn default() -> Self {
        FilesystemConfigurator {
            proc_mounts: PathBuf::from("/proc/mounts"),
        }
    }
}

fn is_under(mountpoint: &str, root: &str) -> bool {
    mountpoint == root || mountpoint.starts_with(&format!("{}/", root.trim_end_matches('/')))
}

/// The mountpoints step 3 of the algorithm must unmount: everything except
/// `/`, the chain of ancestors/descendants of `rootfs_path` needed to keep
/// the pending `pivot_root` alive, and anything the caller explicitly
/// whitelisted (e.g. a freshly bind-mounted external mount target).
fn compute_unmount_set(
    entries: &[MountEntry],
    rootfs_path: &str,
    whitelist: &[String],
) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.mountpoint.clone())
        .filter(|mp| mp != "/")
        .filter(|mp| {
            if whitelist.iter().any(|w| is_under(mp, w) || is_under(w, mp)) {
                return false;
            }
            if rootfs_path == "/" {
                true
            } else {
                !(is_under(mp, rootfs_path) || is_under(rootfs_path, mp))
            }
        })
        .collect()
}

impl FilesystemConfigurator {
    fn prepare_mounts(&self, ctx: &InsideContext, rootfs_path: &Path) -> Result<()> {
        ctx.fs.chdir(rootfs_path)?;

        let fs_spec = ctx.spec.fs.as_ref();
        let mut whitelist = Vec::new();
        if let Some(fs_spec) = fs_spec {
            for mount in &fs_spec.external_mounts {
                let target = rootfs_path.join(
                    mount
                        .target
                        .strip_prefix("/")
                        .unwrap_or(&mount.target),
                );
                if !ctx.fs.exists(&mount.source) || !ctx.fs.exists(rootfs_path) {
                    return Err(NsconError::not_found(format!(
                        "external mount {} -> {}: source or rootfs missing",
                        mount.source.display(),
                        target.display()
                    )));
                }
                bind_mount(
                    ctx.fs,
                    &mount.source,
                    &target,
                    BindOpts {
                        recursive: true,
                        read_only: mount.read_only,
                        private: mount.private,
                        slave: false,
                    },
                )?;
                whitelist.push(target.to_string_lossy().into_owned());
            }
        }

        let entries: Vec<MountEntry> = mounts_at(&self.proc_mounts)?.collect();
        let rootfs_str = rootfs_path.to_string_lossy().into_owned();
        let mut to_unmount = compute_unmount_set(&entries, &rootfs_str, &whitelist);
        to_unmount.reverse();
        for mp in &to_unmount {
            match ctx.fs.umount2(Path::new(mp), MntFlags::MNT_DETACH) {
                Ok(()) => {}
                Err(e) if e.message.contains("EINVAL") => {}
                Err(e) => return Err(e),
            }
        }

        let chroot_to_rootfs = fs_spec.map(|f| f.chroot_to_rootfs).unwrap_or(false);
        if chroot_to_rootfs {
            ctx.fs.chroot(rootfs_path)?;
        } else if rootfs_str != "/" {
            self.pivot(ctx, rootfs_path)?;
        }

        ctx.fs.mount(
            Some("proc"),
            Path::new("/proc"),
            Some("proc"),
            dev_mount_flags() | MsFlags::MS_RELATIME,
            None,
        )?;
        ctx.fs.mount(
            Some("sysfs"),
            Path::new("/sys"),
            Some("sysfs"),
            dev_mount_flags() | MsFlags::MS_RELATIME,
            None,
        )?;

        self.setup_devpts(ctx)?;
        Ok(())
    }

    /// Timestamped-scratch-directory pivot: distinct from a same-path
    /// pivot trick, per the exact syscall sequence this configurator must
    /// reproduce.
    fn pivot(&self, ctx: &InsideContext, rootfs_path: &Path) -> Result<()> {
        let old_root = rootfs_path.join(format!("nscon.old_root.{}", epoch_us()));
        ensure_dir_all(ctx.fs, &old_root, PIVOT_DIR_MODE)?;
        let result = (|| {
            ctx.fs.pivot_root(Path::new("."), &old_root)?;
            ctx.fs.chdir(Path::new("/"))?;
            ctx.fs.umount2(&old_root, MntFlags::MNT_DETACH)?;
            ctx.fs.rmdir(&old_root)
        })();
        if result.is_err() {
            let _ = ctx.fs.umount2(&old_root, MntFlags::MNT_DETACH);
            let _ = ctx.fs.rmdir(&old_root);
        }
        result
    }

    fn setup_devpts(&self, ctx: &InsideContext) -> Result<()> {
        let pts = Path::new("/dev/pts");
        let ptmx = Path::new("/dev/ptmx");
        let pts_ptmx = Path::new("/dev/pts/ptmx");
        if !(ctx.fs.exists(pts) && ctx.fs.exists(ptmx)) {
            return Ok(());
        }
        let wants_console = ctx
            .spec
            .run_spec
            .console
            .slave_pty
            .is_some();
        let result = (|| {
            ctx.fs.mount(
                Some("devpts"),
                pts,
                Some("devpts"),
                MsFlags::empty(),
                Some("newinstance,ptmxmode=0666,mode=620,gid=5"),
            )?;
            if ctx.fs.exists(pts_ptmx) {
                bind_mount(
                    ctx.fs,
                    pts_ptmx,
                    ptmx,
                    BindOpts {
                        recursive: false,
                        ..Default::default()
                    },
                )?;
            }
            Ok(())
        })();
        if wants_console {
            result
        } else {
            Ok(())
        }
    }
}

impl Configurator for FilesystemConfigurator {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn setup_outside_namespace(&self, _ctx: &OutsideContext) -> Result<()> {
        Ok(())
    }

    fn setup_inside_namespace(&self, ctx: &InsideContext) -> Result<()> {
        let Some(fs_spec) = &ctx.spec.fs else {
            return Ok(());
        };
        let rootfs_path = fs_spec
            .rootfs_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("/"));
        self.prepare_mounts(ctx, &rootfs_path)
    }
}
