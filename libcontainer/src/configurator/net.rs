//! Network namespace configurator: moves a host veth interface into the
//! child's new network namespace. Interface renaming/addressing inside the
//! namespace is left to the caller's `init_argv` — this configurator only
//! performs the handoff that must happen from outside, before the barrier
//! releases.

use std::ffi::CString;

use common::error::Result;
use nix::sched::CloneFlags;

use super::{Configurator, InsideContext, OutsideContext};

pub struct NetConfigurator;

fn ip_netns_argv(veth_name: &str, pid: i32) -> Vec<CString> {
    ["ip", "link", "set", veth_name, "netns", &pid.to_string()]
        .into_iter()
        .map(|s| CString::new(s).expect("no interior NUL"))
        .collect()
}

/// Spawns `ip link set <veth_name> netns <pid>` and waits for it. Uses the
/// `clone_process` facade (rather than a bare `fork`) so the exec-or-die
/// child body is a closure the production implementation actually runs on
/// the cloned child — and the test fake never runs at all.
fn move_veth_into_namespace(ctx: &OutsideContext, veth_name: &str) -> Result<()> {
    let argv = ip_netns_argv(veth_name, ctx.child_pid);
    let path = CString::new("/sbin/ip").expect("no interior NUL");
    let pid = unsafe {
        ctx.process.clone_process(
            CloneFlags::empty(),
            Box::new(move || {
                let _ = nix::unistd::execv(&path, &argv);
                127
            }),
        )?
    };
    ctx.process.waitpid(pid)?;
    Ok(())
}

impl Configurator for NetConfigurator {
    fn name(&self) -> &'static str {
        "net"
    }

    fn setup_outside_namespace(&self, ctx: &OutsideContext) -> Result<()> {
        let Some(net) = &ctx.spec.net else {
            return Ok(());
        };
        match &net.veth_name {
            Some(veth) if !veth.is_empty() => move_veth_into_namespace(ctx, veth),
            _ => Ok(()),
        }
    }

    fn setup_inside_namespace(&self, _ctx: &InsideContext) -> Result<()> {
        Ok(())
    }
}
