//! The on-disk TOML shape `create`/`update` read, and its conversion into
//! [`ContainerSpec`]. `ContainerSpec` marks "enter this namespace" with
//! `Option<()>` — convenient for code that builds a spec in Rust, but TOML
//! has no unit value to round-trip through an empty table reliably, so the
//! wire document uses plain booleans for the flag-only namespaces instead
//! and this module does the narrow conversion.

use serde::Deserialize;

use libcontainer::spec::{ContainerSpec, FsSpec, NetNamespaceSpec, RunSpec, UserNamespaceSpec, UtsNamespaceSpec};

#[derive(Debug, Default, Deserialize)]
pub struct SpecDoc {
    #[serde(default)]
    pid: bool,
    #[serde(default)]
    mnt: bool,
    #[serde(default)]
    ipc: bool,
    uts: Option<UtsNamespaceSpec>,
    net: Option<NetNamespaceSpec>,
    user: Option<UserNamespaceSpec>,
    fs: Option<FsSpec>,
    #[serde(default)]
    run_spec: RunSpec,
    #[serde(default)]
    init_argv: Vec<String>,
}

impl From<SpecDoc> for ContainerSpec {
    fn from(doc: SpecDoc) -> Self {
        ContainerSpec {
            pid: doc.pid.then_some(()),
            mnt: doc.mnt.then_some(()),
            ipc: doc.ipc.then_some(()),
            uts: doc.uts,
            net: doc.net,
            user: doc.user,
            fs: doc.fs,
            run_spec: doc.run_spec,
            init_argv: doc.init_argv,
        }
    }
}

pub fn parse(contents: &str) -> Result<ContainerSpec, toml::de::Error> {
    toml::from_str::<SpecDoc>(contents).map(ContainerSpec::from)
}
