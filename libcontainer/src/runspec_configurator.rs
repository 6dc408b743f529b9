//! Applies a `RunSpec` inside the freshly created or attached process,
//! immediately before `execve`: supplementary groups, resgid/resuid, and
//! the FD_CLOEXEC sweep over whatever descriptors survived the clone.

use std::os::fd::RawFd;
use std::path::Path;

use common::error::Result;
use common::syscall::ProcessOps;
use nix::unistd::{Gid, Uid};

use crate::nsutil::open_fds;
use crate::spec::RunSpec;

pub struct RunSpecConfigurator;

impl RunSpecConfigurator {
    /// `extra_fds` are console/ipc descriptors the caller explicitly wants
    /// kept open across `exec`, beyond the default {0,1,2}.
    pub fn configure(
        &self,
        process: &dyn ProcessOps,
        run_spec: &RunSpec,
        proc_self_fd: &Path,
        extra_fds: &[RawFd],
    ) -> Result<()> {
        if !run_spec.groups.is_empty() {
            let groups: Vec<Gid> = run_spec.groups.iter().map(|g| Gid::from_raw(*g)).collect();
            process.setgroups(&groups)?;
        } else {
            process.setgroups(&[])?;
        }
        if let Some(gid) = run_spec.gid {
            process.setresgid(Gid::from_raw(gid))?;
        }
        if let Some(uid) = run_spec.uid {
            process.setresuid(Uid::from_raw(uid))?;
        }

        let mut whitelist: Vec<RawFd> = vec![0, 1, 2];
        whitelist.extend_from_slice(extra_fds);
        if run_spec.inherit_fds {
            return Ok(());
        }
        for fd in open_fds(proc_self_fd)? {
            if !whitelist.contains(&fd) {
                // A failing fcntl here means the FD is already gone or
                // already close-on-exec; neither is actionable.
                let _ = process.set_cloexec(fd);
            }
        }
        Ok(())
    }
}
