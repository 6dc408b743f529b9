//! The core of the core: `new_ns_process` clones a child across a
//! `clone(2)` barrier (outside-ns configurators run in the parent, inside-ns
//! configurators in the child, with an error channel that lets the parent
//! turn the child's own `execve` failure into its own return value), and
//! `new_ns_process_in_target` attaches to an already-running container via
//! `setns(2)` instead.
//!
//! The barrier needs two independent one-shot pipes, not one: a
//! parent-to-child "outside-ns setup is done, proceed" release, and a
//! child-to-parent "here is my exec outcome" report whose success case is
//! the pipe's write end closing on its own (`O_CLOEXEC`) rather than any
//! explicit write. [`IpcAgent`]'s own pipe already models the first kind of
//! one-shot handoff; the second is a plain `O_CLOEXEC` pipe this module
//! manages directly, since `IpcAgent::wait_for_child` discards the payload
//! this channel needs to carry on failure.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::error::{NsconError, Result};
use common::syscall::{create_fs_ops, create_net_ops, create_process_ops, FsOps, NetOps, ProcessOps};
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::{ForkResult, Pid};

use crate::configurator::{Configurator, InsideContext, OutsideContext};
use crate::ipc::{send_to, IpcAgent};
use crate::nsflag::{combined_flags, NsFlag};
use crate::nsutil;
use crate::runspec_configurator::RunSpecConfigurator;
use crate::spec::{ContainerSpec, RunSpec};

const ERROR_CHANNEL_LIMIT: usize = 4096;

/// Drives both ways of starting a process attached to a set of namespaces.
pub struct ProcessLauncher {
    process: Box<dyn ProcessOps>,
    net: Box<dyn NetOps>,
    fs: Box<dyn FsOps>,
    proc_root: PathBuf,
    ipc_dir: PathBuf,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        ProcessLauncher {
            process: create_process_ops(),
            net: create_net_ops(),
            fs: create_fs_ops(),
            proc_root: PathBuf::from("/proc"),
            ipc_dir: PathBuf::from("/tmp"),
        }
    }
}

impl ProcessLauncher {
    pub fn with_roots(proc_root: PathBuf, ipc_dir: PathBuf) -> Self {
        ProcessLauncher {
            proc_root,
            ipc_dir,
            ..Self::default()
        }
    }

    /// `clone(2)`s a fresh process into `namespaces`, applying `configurators`
    /// on both sides of the barrier, then `execve`s `argv` inside it.
    /// Returns the child's pid once its `execve` has actually succeeded — a
    /// caller never observes a child that failed to start.
    pub fn new_ns_process(
        &self,
        argv: &[String],
        namespaces: &[NsFlag],
        configurators: &[Arc<dyn Configurator>],
        ns_spec: &ContainerSpec,
        run_spec: &RunSpec,
    ) -> Result<Pid> {
        if argv.is_empty() {
            return Err(NsconError::invalid_argument("argv must not be empty"));
        }

        let barrier = IpcAgent::new(&self.ipc_dir)?;
        let console_fd = match run_spec.console.slave_pty {
            Some(minor) => Some(nsutil::open_slave_pty(minor)?),
            None => None,
        };
        let (err_read, err_write) = self.net.pipe_cloexec().map_err(|e| {
            if let Some(fd) = console_fd {
                let _ = self.fs.close_fd(fd);
            }
            let _ = barrier.destroy();
            e
        })?;

        let argv0_path = PathBuf::from(&argv[0]);
        let argv_c = to_cstrings(argv)?;
        let flags = combined_flags(namespaces);
        let (pipe_read, pipe_write) = barrier.barrier_fds();

        let configurators_for_child: Vec<Arc<dyn Configurator>> = configurators.to_vec();
        let ns_spec_child = ns_spec.clone();
        let run_spec_child = run_spec.clone();
        let namespaces_owned = namespaces.to_vec();
        let proc_root_child = self.proc_root.clone();

        let child_fn: Box<dyn FnMut() -> isize> = Box::new(move || {
            match run_child(
                pipe_read,
                pipe_write,
                err_write,
                console_fd,
                &namespaces_owned,
                &ns_spec_child,
                &run_spec_child,
                &configurators_for_child,
                &proc_root_child,
                &argv0_path,
                &argv_c,
            ) {
                Ok(()) => 0,
                Err(()) => 1,
            }
        });

        let child_pid = match unsafe { self.process.clone_process(flags, child_fn) } {
            Ok(pid) => pid,
            Err(e) => {
                let _ = self.net.close(err_read);
                let _ = self.net.close(err_write);
                if let Some(fd) = console_fd {
                    let _ = self.fs.close_fd(fd);
                }
                let _ = barrier.destroy();
                return Err(NsconError::internal(format!("clone: {e}")));
            }
        };

        // Only the child needs its own copy of the write end; keeping ours
        // open would stop the parent from ever observing EOF on a
        // successful exec.
        let _ = self.net.close(err_write);
        if let Some(fd) = console_fd {
            let _ = self.fs.close_fd(fd);
        }

        for c in configurators {
            if let Err(e) = c.setup_outside_namespace(&OutsideContext {
                spec: ns_spec,
                child_pid: child_pid.as_raw(),
                process: self.process.as_ref(),
                fs: self.fs.as_ref(),
            }) {
                let _ = self.process.kill(child_pid, Signal::SIGKILL);
                let _ = self.net.close(err_read);
                let _ = barrier.destroy();
                return Err(NsconError::internal(format!(
                    "{}: outside-ns setup failed: {e}",
                    c.name()
                )));
            }
        }

        barrier.signal_parent()?;

        let outcome = self.net.read(err_read, ERROR_CHANNEL_LIMIT);
        let _ = self.net.close(err_read);
        let _ = barrier.destroy();

        match outcome {
            Ok(bytes) if bytes.is_empty() => Ok(child_pid),
            Ok(bytes) => Err(NsconError::internal(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Attaches to an already-running container's namespaces via `setns(2)`
    /// and runs `argv` there. A target with its own pid namespace needs an
    /// extra `fork` — entering a pid namespace only changes where *future*
    /// children land, not the caller itself — so an intermediate process
    /// forks once more and exits immediately, leaving the grandchild as the
    /// one that actually configures and `execve`s.
    pub fn new_ns_process_in_target(
        &self,
        argv: &[String],
        namespaces: &[NsFlag],
        target_pid: i32,
        run_spec: &RunSpec,
    ) -> Result<Pid> {
        if argv.is_empty() {
            return Err(NsconError::invalid_argument("argv must not be empty"));
        }
        nsutil::attach_namespaces(self.process.as_ref(), namespaces, target_pid, &self.proc_root)?;

        let pid_agent = IpcAgent::new(&self.ipc_dir)?;
        let (err_read, err_write) = self.net.pipe_cloexec()?;
        let needs_pid_fork = namespaces.contains(&NsFlag::Pid);
        let argv0_path = PathBuf::from(&argv[0]);
        let argv_c = to_cstrings(argv)?;
        let run_spec_child = run_spec.clone();
        let proc_root_child = self.proc_root.clone();
        let pid_socket_path = pid_agent.socket_path().to_path_buf();

        match self.process.fork()? {
            ForkResult::Parent { child } => {
                let _ = self.net.close(err_write);
                self.process.waitpid(child)?;
                let pid_result = pid_agent.read_data();
                let outcome = self.net.read(err_read, ERROR_CHANNEL_LIMIT);
                let _ = self.net.close(err_read);
                let _ = pid_agent.destroy();

                let (pid_bytes, _sender) = pid_result?;
                let grandchild_pid = parse_pid_bytes(&pid_bytes)?;
                match outcome {
                    Ok(bytes) if bytes.is_empty() => Ok(Pid::from_raw(grandchild_pid)),
                    Ok(bytes) => Err(NsconError::internal(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    )),
                    Err(e) => Err(e),
                }
            }
            ForkResult::Child => {
                let exit_code = run_intermediate(
                    needs_pid_fork,
                    self.process.as_ref(),
                    err_write,
                    &pid_socket_path,
                    &run_spec_child,
                    &proc_root_child,
                    &argv0_path,
                    &argv_c,
                );
                std::process::exit(exit_code);
            }
        }
    }
}

pub(crate) fn to_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|s| {
            CString::new(s.as_str())
                .map_err(|e| NsconError::invalid_argument(format!("argv entry: {e}")))
        })
        .collect()
}

fn parse_pid_bytes(bytes: &[u8]) -> Result<i32> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| NsconError::internal("malformed pid notification"))
}

/// Best-effort: drop the view of `/proc` and `/sys` inherited from before
/// the pid/mnt namespaces existed and remount fresh copies that reflect
/// them, so anything the child reads from procfs right after the barrier
/// is self-consistent. Failures here are not fatal — the filesystem
/// configurator gets another, authoritative chance at mounting `/proc`
/// and `/sys` once the rootfs itself is prepared.
fn remount_proc_and_sys_best_effort(fs: &dyn FsOps) {
    let _ = fs.umount2(Path::new("/proc"), MntFlags::MNT_DETACH);
    let _ = fs.umount2(Path::new("/sys"), MntFlags::MNT_DETACH);
    let _ = fs.mount(Some("proc"), Path::new("/proc"), Some("proc"), MsFlags::empty(), None);
    let _ = fs.mount(Some("sysfs"), Path::new("/sys"), Some("sysfs"), MsFlags::empty(), None);
}

fn fail_child(net: &dyn NetOps, err_write: RawFd, message: &str) -> std::result::Result<(), ()> {
    let bytes = message.as_bytes();
    let truncated = &bytes[..bytes.len().min(ERROR_CHANNEL_LIMIT)];
    let _ = net.write(err_write, truncated);
    Err(())
}

/// The clone child's whole lifetime, from the moment `clone(2)` returns in
/// this process up to `execve`. Reconstructs its own syscall facades rather
/// than sharing the parent's, since a cloned child is a genuinely separate
/// address space by the time this runs.
#[allow(clippy::too_many_arguments)]
fn run_child(
    pipe_read: RawFd,
    pipe_write: RawFd,
    err_write: RawFd,
    console_fd: Option<RawFd>,
    namespaces: &[NsFlag],
    spec: &ContainerSpec,
    run_spec: &RunSpec,
    configurators: &[Arc<dyn Configurator>],
    proc_root: &Path,
    argv0_path: &Path,
    argv: &[CString],
) -> std::result::Result<(), ()> {
    let process = create_process_ops();
    let fs = create_fs_ops();
    let net = create_net_ops();

    if namespaces.contains(&NsFlag::Pid) && namespaces.contains(&NsFlag::Mnt) {
        remount_proc_and_sys_best_effort(fs.as_ref());
    }

    // Block until the parent's outside-ns configurators have run. We never
    // write on this pipe ourselves, so drop our copy of the write end first.
    let _ = net.close(pipe_write);
    match net.read(pipe_read, 1) {
        Ok(buf) if !buf.is_empty() => {}
        Ok(_) => return fail_child(net.as_ref(), err_write, "barrier closed before release"),
        Err(e) => return fail_child(net.as_ref(), err_write, &format!("barrier read: {e}")),
    }

    if let Some(fd) = console_fd {
        if let Err(e) = nsutil::attach_to_console_fd(process.as_ref(), fd) {
            return fail_child(net.as_ref(), err_write, &format!("attach console: {e}"));
        }
    }

    if let Err(e) = process.setsid() {
        return fail_child(net.as_ref(), err_write, &format!("setsid: {e}"));
    }

    let proc_self_fd = proc_root.join("self/fd");
    if let Err(e) = RunSpecConfigurator.configure(process.as_ref(), run_spec, &proc_self_fd, &[]) {
        return fail_child(net.as_ref(), err_write, &format!("run_spec configure: {e}"));
    }

    let ctx = InsideContext {
        spec,
        process: process.as_ref(),
        fs: fs.as_ref(),
    };
    for c in configurators {
        if let Err(e) = c.setup_inside_namespace(&ctx) {
            return fail_child(net.as_ref(), err_write, &format!("{}: {e}", c.name()));
        }
    }

    if let Err(e) = process.execve(argv0_path, argv) {
        return fail_child(net.as_ref(), err_write, &format!("execve: {e}"));
    }
    // execve only returns on failure; reaching here is unreachable in
    // production but the test fake's execve is a no-op that returns Ok.
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_intermediate(
    needs_pid_fork: bool,
    process: &dyn ProcessOps,
    err_write: RawFd,
    pid_socket_path: &Path,
    run_spec: &RunSpec,
    proc_root: &Path,
    argv0_path: &Path,
    argv: &[CString],
) -> i32 {
    if needs_pid_fork {
        match process.fork() {
            Ok(ForkResult::Parent { .. }) => return 0,
            Ok(ForkResult::Child) => {}
            Err(_) => return 1,
        }
    }
    match run_grandchild(process, err_write, pid_socket_path, run_spec, proc_root, argv0_path, argv) {
        Ok(()) => 0,
        Err(()) => 1,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_grandchild(
    process: &dyn ProcessOps,
    err_write: RawFd,
    pid_socket_path: &Path,
    run_spec: &RunSpec,
    proc_root: &Path,
    argv0_path: &Path,
    argv: &[CString],
) -> std::result::Result<(), ()> {
    let net = create_net_ops();
    let proc_self_fd = proc_root.join("self/fd");

    if let Err(e) = RunSpecConfigurator.configure(process, run_spec, &proc_self_fd, &[]) {
        return fail_child(net.as_ref(), err_write, &format!("run_spec configure: {e}"));
    }

    let pid = nix::unistd::getpid().as_raw();
    if let Err(e) = send_to(pid_socket_path, pid.to_string().as_bytes()) {
        return fail_child(net.as_ref(), err_write, &format!("pid notify: {e}"));
    }

    if let Err(e) = process.execve(argv0_path, argv) {
        return fail_child(net.as_ref(), err_write, &format!("execve: {e}"));
    }
    Ok(())
}
