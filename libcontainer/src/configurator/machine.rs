//! Machine-spec configurator: the last configurator in registration order.
//! Drops a best-effort marker file other lmctfy tooling probes for to tell
//! a "machine container" (the outermost container on a host) apart from an
//! ordinary nested one.

use std::path::Path;

use common::error::Result;
use common::fsutil::ensure_dir_all;

use super::{Configurator, InsideContext, OutsideContext};

const MACHINE_SPEC_DIR: &str = "/run/lmctfy";
const MACHINE_SPEC_FILE: &str = ".machine.spec";

pub struct MachineConfigurator;

impl Configurator for MachineConfigurator {
    fn name(&self) -> &'static str {
        "machine"
    }

    fn setup_outside_namespace(&self, _ctx: &OutsideContext) -> Result<()> {
        Ok(())
    }

    fn setup_inside_namespace(&self, ctx: &InsideContext) -> Result<()> {
        let wants_marker = ctx
            .spec
            .fs
            .as_ref()
            .map(|f| f.machine)
            .unwrap_or(false);
        if !wants_marker {
            return Ok(());
        }
        let dir = Path::new(MACHINE_SPEC_DIR);
        ensure_dir_all(ctx.fs, dir, 0o755)?;
        ctx.fs.write_file(&dir.join(MACHINE_SPEC_FILE), b"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ContainerSpec, FsSpec};
    use common::syscall::test::{TestFs, TestProcess};

    #[test]
    fn no_op_without_machine_flag() {
        let fs = TestFs::default();
        let process = TestProcess::default();
        let spec = ContainerSpec::default();
        let ctx = InsideContext {
            spec: &spec,
            process: &process,
            fs: &fs,
        };
        MachineConfigurator.setup_inside_namespace(&ctx).unwrap();
        assert!(fs.calls.borrow().is_empty());
    }

    #[test]
    fn ensures_marker_directory_when_requested() {
        let fs = TestFs::default();
        let process = TestProcess::default();
        let mut spec = ContainerSpec::default();
        spec.fs = Some(FsSpec {
            machine: true,
            ..Default::default()
        });
        let ctx = InsideContext {
            spec: &spec,
            process: &process,
            fs: &fs,
        };
        MachineConfigurator.setup_inside_namespace(&ctx).unwrap();
        assert!(fs
            .calls
            .borrow()
            .iter()
            .any(|c| c.starts_with("mkdir(/run/lmctfy")));
        assert!(fs
            .written_files
            .borrow()
            .iter()
            .any(|(p, _)| p == Path::new("/run/lmctfy/.machine.spec")));
    }
}
