//! The container specification types: what a caller hands to
//! [`crate::controller::NamespaceController`] to describe the namespaces,
//! filesystem, and process attributes a container should have.
//!
//! The wire encoding of these types (the distilled system's text-proto
//! format) is a thin collaborator out of scope here; `nscon` deserializes
//! them from TOML instead (see `nscon::cli`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One entry of a uid/gid mapping: `length` ids starting at `id_in` inside
/// the namespace map to `length` ids starting at `id_out` outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub id_in: u32,
    pub id_out: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNamespaceSpec {
    #[serde(default)]
    pub uid_map: Vec<IdMapEntry>,
    #[serde(default)]
    pub gid_map: Vec<IdMapEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtsNamespaceSpec {
    pub vhostname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetNamespaceSpec {
    /// Name of a host interface to move into the new network namespace.
    pub veth_name: Option<String>,
}

/// One bind-mount the filesystem configurator sets up after rootfs
/// preparation. `target` is resolved relative to `rootfs_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMount {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSpec {
    pub rootfs_path: Option<PathBuf>,
    #[serde(default)]
    pub chroot_to_rootfs: bool,
    #[serde(default)]
    pub external_mounts: Vec<ExternalMount>,
    /// Best-effort machine-spec marker; when set, the machine configurator
    /// dumps it to `/run/lmctfy/.machine.spec`.
    #[serde(default)]
    pub machine: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdPolicy {
    Detached,
    Inherit,
}

impl Default for FdPolicy {
    fn default() -> Self {
        FdPolicy::Detached
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSpec {
    /// The minor device number of an already-opened slave pty, e.g. `3` for
    /// `/dev/pts/3`.
    pub slave_pty: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    #[serde(default)]
    pub groups: Vec<u32>,
    pub apparmor_profile: Option<String>,
    #[serde(default)]
    pub fd_policy: FdPolicy,
    #[serde(default)]
    pub console: ConsoleSpec,
    #[serde(default)]
    pub inherit_fds: bool,
}

/// The full description of one container's namespace/filesystem/process
/// configuration. Namespace subspecs that are `None` mean "do not enter or
/// create this namespace".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub pid: Option<()>,
    pub mnt: Option<()>,
    pub ipc: Option<()>,
    pub uts: Option<UtsNamespaceSpec>,
    pub net: Option<NetNamespaceSpec>,
    pub user: Option<UserNamespaceSpec>,
    #[serde(default)]
    pub fs: Option<FsSpec>,
    #[serde(default)]
    pub run_spec: RunSpec,
    /// Executable and arguments for the container's init; defaults to the
    /// configured `nsinit_path` wrapper when empty.
    #[serde(default)]
    pub init_argv: Vec<String>,
}
