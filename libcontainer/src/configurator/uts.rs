//! UTS namespace configurator: sets the container's virtual hostname.
//! Runs entirely inside the namespace — `sethostname(2)` only affects the
//! caller's own UTS namespace.

use common::error::Result;

use super::{Configurator, InsideContext, OutsideContext};

pub struct UtsConfigurator;

impl Configurator for UtsConfigurator {
    fn name(&self) -> &'static str {
        "uts"
    }

    fn setup_outside_namespace(&self, _ctx: &OutsideContext) -> Result<()> {
        Ok(())
    }

    fn setup_inside_namespace(&self, ctx: &InsideContext) -> Result<()> {
        if let Some(uts) = &ctx.spec.uts {
            if let Some(hostname) = &uts.vhostname {
                ctx.process.sethostname(hostname)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ContainerSpec, UtsNamespaceSpec};
    use common::syscall::test::{TestFs, TestProcess};

    #[test]
    fn sets_hostname_when_requested() {
        let process = TestProcess::default();
        let fs = TestFs::default();
        let mut spec = ContainerSpec::default();
        spec.uts = Some(UtsNamespaceSpec {
            vhostname: Some("container-1".to_string()),
        });
        let ctx = InsideContext {
            spec: &spec,
            process: &process,
            fs: &fs,
        };
        UtsConfigurator.setup_inside_namespace(&ctx).unwrap();
        assert!(process
            .calls
            .borrow()
            .iter()
            .any(|c| c == "sethostname(container-1)"));
    }

    #[test]
    fn no_op_without_vhostname() {
        let process = TestProcess::default();
        let fs = TestFs::default();
        let spec = ContainerSpec::default();
        let ctx = InsideContext {
            spec: &spec,
            process: &process,
            fs: &fs,
        };
        UtsConfigurator.setup_inside_namespace(&ctx).unwrap();
        assert!(process.calls.borrow().is_empty());
    }
}
