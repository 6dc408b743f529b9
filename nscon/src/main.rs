//! `nscon`: the command-line front end for [`libcontainer::controller::NamespaceController`].
//! Parses flags and a `ContainerSpec`/`RunSpec` TOML document, invokes the
//! controller, and prints its result (an `NsHandle` string for `create`, a
//! decimal pid for `run`).

mod cli;
mod config;
mod observability;
mod output;
mod spec_doc;

use std::io::Write;
use std::os::fd::FromRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use libcontainer::controller::NamespaceController;
use libcontainer::handle::NsHandle;
use libcontainer::spec::{ContainerSpec, RunSpec};

use cli::{Command, CreateArgs, ExecArgs, Opts, RunArgs, UpdateArgs};
use config::{CliOverrides, NsconConfig};
use output::OutputMap;

fn main() -> Result<()> {
    let opts = Opts::parse();

    let config = config::load(CliOverrides {
        nsinit_path: opts.global.nsinit_path.clone(),
        nsinit_uid: opts.global.nsinit_uid,
        nsinit_gid: opts.global.nsinit_gid,
        nscon_output_fd: opts.global.nscon_output_fd,
        config_path: opts.global.config.clone(),
        log_level: opts.global.log_level.clone(),
        log_format: opts.global.log_format.clone(),
    })
    .context("loading configuration")?;

    if let Err(e) = observability::init(observability::ObservabilityConfig {
        log_debug_flag: opts.global.debug,
        log_level: config.log_level.clone(),
        log_file: opts.global.log_file.clone(),
        log_format: config.log_format.clone(),
        journald: false,
    }) {
        eprintln!("log init failed: {e:?}");
    }

    tracing::debug!(?config, "starting nscon");

    let result = match opts.command {
        Command::Create(args) => create(args, &config),
        Command::Run(args) => run(args, &config),
        Command::Exec(args) => exec(args, &config),
        Command::Update(args) => update(args, &config),
        Command::Completion(args) => {
            clap_complete::generate(
                args.shell,
                &mut Opts::command(),
                "nscon",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
    };

    match result {
        Ok(output) => {
            write_output(&config, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn controller(config: &NsconConfig) -> NamespaceController {
    NamespaceController::new(config.nsinit_path.clone())
}

fn read_spec(path: &Path) -> Result<ContainerSpec> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading spec file {}", path.display()))?;
    spec_doc::parse(&contents).with_context(|| format!("parsing spec file {}", path.display()))
}

fn read_run_spec(path: &Path) -> Result<RunSpec> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading run-spec file {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing run-spec file {}", path.display()))
}

fn create(args: CreateArgs, config: &NsconConfig) -> Result<OutputMap> {
    let mut spec = read_spec(&args.spec)?;
    if !args.init_argv.is_empty() {
        spec.init_argv = args.init_argv;
    }
    let handle = controller(config)
        .create(&spec)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    Ok(OutputMap::raw(handle.to_string()))
}

fn run(args: RunArgs, config: &NsconConfig) -> Result<OutputMap> {
    let handle = NsHandle::parse(&args.handle)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    let run_spec = read_run_spec(&args.run_spec)?;
    let pid = controller(config)
        .run(&handle, &args.argv, &run_spec)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    Ok(OutputMap::raw(pid.as_raw().to_string()))
}

fn exec(args: ExecArgs, config: &NsconConfig) -> Result<OutputMap> {
    let handle = NsHandle::parse(&args.handle)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    // `exec` replaces this process on success; it only returns on failure.
    controller(config)
        .exec(&handle, &args.argv)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    unreachable!("execve does not return on success")
}

fn update(args: UpdateArgs, config: &NsconConfig) -> Result<OutputMap> {
    let handle = NsHandle::parse(&args.handle)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    let spec = read_spec(&args.spec)?;
    controller(config)
        .update(&handle, &spec)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind, e.message))?;
    Ok(OutputMap::new())
}

fn write_output(config: &NsconConfig, output: &OutputMap) -> Result<()> {
    match config.nscon_output_fd {
        Some(fd) => {
            // Safety: `--nscon-output-fd` names an fd the caller already
            // owns and keeps open for the duration of this process; nscon
            // only ever writes to it, never closes it.
            let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
            output.write_to(&mut file)?;
            std::mem::forget(file);
            Ok(())
        }
        None => {
            output.write_to(std::io::stdout().lock())?;
            std::io::stdout().flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reads_spec_and_overrides_init_argv() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("spec.toml");
        std::fs::write(&spec_path, "pid = true\nmnt = true\n").unwrap();
        let spec = read_spec(&spec_path).unwrap();
        assert!(spec.pid.is_some());
        assert!(spec.mnt.is_some());
        assert!(spec.init_argv.is_empty());
    }

    #[test]
    fn read_run_spec_parses_uid_and_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "uid = 1000\ngid = 1000\ngroups = [27, 100]\n").unwrap();
        let run_spec = read_run_spec(&path).unwrap();
        assert_eq!(run_spec.uid, Some(1000));
        assert_eq!(run_spec.groups, vec![27, 100]);
    }

    #[test]
    fn write_output_to_stdout_does_not_error() {
        let config = NsconConfig::default();
        let output = OutputMap::raw("c1-2");
        write_output(&config, &output).unwrap();
    }
}
