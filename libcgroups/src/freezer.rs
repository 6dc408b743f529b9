//! The freezer cgroup's state machine: `THAWED <-> FREEZING -> FROZEN`,
//! gated on whether the kernel can propagate a freeze to subcontainers.

use common::error::{NsconError, Result};

use crate::controller::CgroupController;

pub const FREEZER_STATE: &str = "freezer.state";
pub const PARENT_FREEZING: &str = "freezer.parent_freezing";

const THAWED: &str = "THAWED";
const FREEZING: &str = "FREEZING";
const FROZEN: &str = "FROZEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezerState {
    Thawed,
    Freezing,
    Frozen,
}

impl FreezerState {
    fn parse(raw: &str) -> Option<FreezerState> {
        match raw.trim() {
            THAWED => Some(FreezerState::Thawed),
            FREEZING => Some(FreezerState::Freezing),
            FROZEN => Some(FreezerState::Frozen),
            _ => None,
        }
    }
}

/// Binds the freezer state machine to one cgroup directory.
pub struct FreezerController<'a> {
    controller: &'a CgroupController,
}

impl<'a> FreezerController<'a> {
    pub fn new(controller: &'a CgroupController) -> Self {
        FreezerController { controller }
    }

    /// On kernels without `freezer.parent_freezing`, a freeze of this
    /// cgroup does not propagate to its subcontainers — rejecting up front
    /// avoids silently freezing only part of the tree.
    fn check_safe_to_update(&self) -> Result<()> {
        if self.controller.has_control_file(PARENT_FREEZING) {
            return Ok(());
        }
        let subcontainers = self.controller.get_subcontainers()?;
        if !subcontainers.is_empty() {
            return Err(NsconError::failed_precondition(
                "kernel lacks hierarchical freezing and cgroup has subcontainers",
            ));
        }
        Ok(())
    }

    pub fn freeze(&self) -> Result<()> {
        self.check_safe_to_update()?;
        self.controller.set_param_string(FREEZER_STATE, FROZEN)
    }

    pub fn unfreeze(&self) -> Result<()> {
        self.check_safe_to_update()?;
        self.controller.set_param_string(FREEZER_STATE, THAWED)
    }

    pub fn state(&self) -> Result<FreezerState> {
        let raw = self.controller.get_param_string(FREEZER_STATE)?;
        FreezerState::parse(&raw)
            .ok_or_else(|| NsconError::internal(format!("unknown freezer state {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Hierarchy;
    use std::path::PathBuf;

    fn controller(path: PathBuf) -> CgroupController {
        CgroupController::new(Hierarchy::Freezer, path, true)
    }

    #[test]
    fn freeze_writes_frozen_when_no_subcontainers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FREEZER_STATE), "").unwrap();
        let c = controller(dir.path().to_path_buf());
        let freezer = FreezerController::new(&c);
        freezer.freeze().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(FREEZER_STATE)).unwrap(),
            FROZEN
        );
    }

    #[test]
    fn freeze_rejected_without_hierarchical_support_and_subcontainers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FREEZER_STATE), "").unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();
        let c = controller(dir.path().to_path_buf());
        let freezer = FreezerController::new(&c);
        let err = freezer.freeze().unwrap_err();
        assert_eq!(err.kind, common::error::ErrorKind::FailedPrecondition);
        // The state file must be untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join(FREEZER_STATE)).unwrap(),
            ""
        );
    }

    #[test]
    fn freeze_allowed_with_subcontainers_when_kernel_supports_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FREEZER_STATE), "").unwrap();
        std::fs::write(dir.path().join(PARENT_FREEZING), "0").unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();
        let c = controller(dir.path().to_path_buf());
        let freezer = FreezerController::new(&c);
        freezer.freeze().unwrap();
    }

    #[test]
    fn state_reports_current_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FREEZER_STATE), FREEZING).unwrap();
        let c = controller(dir.path().to_path_buf());
        let freezer = FreezerController::new(&c);
        assert_eq!(freezer.state().unwrap(), FreezerState::Freezing);
    }
}
