//! The closed set of cgroup v1 subsystem names this controller recognizes.
//! `/proc/mounts` mount options are matched against these names to decide
//! which mountpoints are cgroup hierarchies worth tracking.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hierarchy {
    Cpu,
    Cpuacct,
    Cpuset,
    Memory,
    Blkio,
    Devices,
    Freezer,
    NetCls,
    NetPrio,
    PerfEvent,
    Hugetlb,
    Pids,
}

impl Hierarchy {
    pub const ALL: [Hierarchy; 12] = [
        Hierarchy::Cpu,
        Hierarchy::Cpuacct,
        Hierarchy::Cpuset,
        Hierarchy::Memory,
        Hierarchy::Blkio,
        Hierarchy::Devices,
        Hierarchy::Freezer,
        Hierarchy::NetCls,
        Hierarchy::NetPrio,
        Hierarchy::PerfEvent,
        Hierarchy::Hugetlb,
        Hierarchy::Pids,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Hierarchy::Cpu => "cpu",
            Hierarchy::Cpuacct => "cpuacct",
            Hierarchy::Cpuset => "cpuset",
            Hierarchy::Memory => "memory",
            Hierarchy::Blkio => "blkio",
            Hierarchy::Devices => "devices",
            Hierarchy::Freezer => "freezer",
            Hierarchy::NetCls => "net_cls",
            Hierarchy::NetPrio => "net_prio",
            Hierarchy::PerfEvent => "perf_event",
            Hierarchy::Hugetlb => "hugetlb",
            Hierarchy::Pids => "pids",
        }
    }

    pub fn from_name(name: &str) -> Option<Hierarchy> {
        Self::ALL.into_iter().find(|h| h.name() == name)
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
