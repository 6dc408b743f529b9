//! Per-namespace configurators: strategy objects that run in two phases
//! around the clone barrier. Registration order is preserved within each
//! phase — see [`crate::launcher::ProcessLauncher`].

pub mod filesystem;
pub mod machine;
pub mod net;
pub mod user;
pub mod uts;

use common::error::Result;
use common::syscall::{FsOps, ProcessOps};

use crate::spec::ContainerSpec;

/// Everything an outside-ns phase may need: the spec, the syscall facades,
/// and the child's pid (the clone has already happened by this point).
pub struct OutsideContext<'a> {
    pub spec: &'a ContainerSpec,
    pub child_pid: i32,
    pub process: &'a dyn ProcessOps,
    pub fs: &'a dyn FsOps,
}

/// Everything an inside-ns phase may need. Runs in the child, after the
/// barrier has released it.
pub struct InsideContext<'a> {
    pub spec: &'a ContainerSpec,
    pub process: &'a dyn ProcessOps,
    pub fs: &'a dyn FsOps,
}

/// A configurator may implement either phase, both, or neither (a
/// namespace flag that needs no extra setup beyond the `clone`/`unshare`
/// itself still gets a no-op configurator, so ordering and counting stay
/// uniform across namespace kinds).
pub trait Configurator: Send + Sync {
    fn name(&self) -> &'static str;

    fn setup_outside_namespace(&self, _ctx: &OutsideContext) -> Result<()> {
        Ok(())
    }

    fn setup_inside_namespace(&self, _ctx: &InsideContext) -> Result<()> {
        Ok(())
    }
}

/// A namespace flag present in the spec but requiring no configurator work
/// of its own beyond the clone flag (pid, ipc, mnt without an `fs` block).
pub struct DefaultConfigurator(pub &'static str);

impl Configurator for DefaultConfigurator {
    fn name(&self) -> &'static str {
        self.0
    }
}
