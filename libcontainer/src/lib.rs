//! Namespace-based container control: the launcher that clones or attaches
//! to a set of Linux namespaces, the configurators that set each one up,
//! and the controller that turns a [`spec::ContainerSpec`] into calls
//! against both.

pub mod configurator;
pub mod controller;
pub mod handle;
pub mod ipc;
pub mod launcher;
pub mod lock;
pub mod mount_utils;
pub mod nshandler;
pub mod nsflag;
pub mod nsutil;
pub mod runspec_configurator;
pub mod spec;
