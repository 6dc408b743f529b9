//! The closed set of namespace flags this controller understands, and the
//! kernel-support probe that decides which of them are usable on the
//! running host.

use std::fmt;

use nix::sched::CloneFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NsFlag {
    User,
    Pid,
    Mnt,
    Ipc,
    Net,
    Uts,
}

impl NsFlag {
    pub const ALL: [NsFlag; 6] = [
        NsFlag::User,
        NsFlag::Pid,
        NsFlag::Mnt,
        NsFlag::Ipc,
        NsFlag::Net,
        NsFlag::Uts,
    ];

    /// Canonical short name, matching `/proc/self/ns/<name>`.
    pub fn name(&self) -> &'static str {
        match self {
            NsFlag::User => "user",
            NsFlag::Pid => "pid",
            NsFlag::Mnt => "mnt",
            NsFlag::Ipc => "ipc",
            NsFlag::Net => "net",
            NsFlag::Uts => "uts",
        }
    }

    pub fn clone_flag(&self) -> CloneFlags {
        match self {
            NsFlag::User => CloneFlags::CLONE_NEWUSER,
            NsFlag::Pid => CloneFlags::CLONE_NEWPID,
            NsFlag::Mnt => CloneFlags::CLONE_NEWNS,
            NsFlag::Ipc => CloneFlags::CLONE_NEWIPC,
            NsFlag::Net => CloneFlags::CLONE_NEWNET,
            NsFlag::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }

    pub fn from_clone_flag(flag: CloneFlags) -> Option<NsFlag> {
        Self::ALL.into_iter().find(|f| f.clone_flag() == flag)
    }
}

impl fmt::Display for NsFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Folds a set of namespace flags into the combined `clone(2)`/`unshare(2)`
/// flag word.
pub fn combined_flags(namespaces: &[NsFlag]) -> CloneFlags {
    namespaces
        .iter()
        .fold(CloneFlags::empty(), |acc, ns| acc | ns.clone_flag())
}
