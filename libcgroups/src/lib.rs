//! cgroup hierarchy discovery and typed control-file access.
//!
//! [`factory::CgroupFactory`] scans `/proc/mounts` once to learn which
//! cgroup hierarchies are mounted where and which of them this process owns
//! (may create/destroy directories in). [`controller::CgroupController`] is
//! a typed view bound to one hierarchy's directory; [`freezer`] layers the
//! freezer state machine on top of it.

pub mod controller;
pub mod factory;
pub mod freezer;
pub mod hierarchy;
pub mod mount;
