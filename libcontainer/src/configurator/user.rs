//! User namespace configurator: writes the uid/gid maps for the child's
//! new user namespace. Must run from outside (the mapping file for a freshly
//! unshared user namespace may only be written by a process that existed
//! before the `unshare`, typically the immediate parent).

use std::path::PathBuf;

use common::error::Result;

use super::{Configurator, InsideContext, OutsideContext};
use crate::spec::IdMapEntry;

pub struct UserConfigurator {
    /// `/proc` root, overridable in tests.
    pub proc_root: PathBuf,
}

impl Default for UserConfigurator {
    fn default() -> Self {
        UserConfigurator {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

fn format_map(entries: &[IdMapEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{} {} {}\n", e.id_in, e.id_out, e.length))
        .collect()
}

impl Configurator for UserConfigurator {
    fn name(&self) -> &'static str {
        "user"
    }

    fn setup_outside_namespace(&self, ctx: &OutsideContext) -> Result<()> {
        let Some(user) = &ctx.spec.user else {
            return Ok(());
        };
        let pid_dir = self.proc_root.join(ctx.child_pid.to_string());

        if !user.gid_map.is_empty() {
            // The kernel refuses a gid_map write from an unprivileged
            // mapper unless setgroups has first been denied.
            ctx.fs.write_file(&pid_dir.join("setgroups"), b"deny")?;
        }
        if !user.uid_map.is_empty() {
            ctx.fs
                .write_file(&pid_dir.join("uid_map"), format_map(&user.uid_map).as_bytes())?;
        }
        if !user.gid_map.is_empty() {
            ctx.fs
                .write_file(&pid_dir.join("gid_map"), format_map(&user.gid_map).as_bytes())?;
        }
        Ok(())
    }

    fn setup_inside_namespace(&self, _ctx: &InsideContext) -> Result<()> {
        Ok(())
    }
}
