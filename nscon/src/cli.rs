//! `clap`-derive argument parsing for the subcommands this binary exposes:
//! `create`, `run`, `exec`, `update`, plus shell completion generation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "nscon", version, about = "Construct and control containers built from Linux namespaces and cgroups")]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Parser)]
pub struct GlobalArgs {
    /// Path to the nsinit binary used as the default container init.
    #[arg(long)]
    pub nsinit_path: Option<PathBuf>,
    /// Uid the default init argv is built with.
    #[arg(long)]
    pub nsinit_uid: Option<u32>,
    /// Gid the default init argv is built with.
    #[arg(long)]
    pub nsinit_gid: Option<u32>,
    /// Redirect structured stdout (NsHandle/pid) to this fd instead of 1.
    #[arg(long)]
    pub nscon_output_fd: Option<i32>,
    /// Path to a TOML config file overriding compiled-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Logging verbosity, one of error/warn/info/debug/trace.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Logging output format: text, json, or legacy (bracketed wire format).
    #[arg(long)]
    pub log_format: Option<String>,
    /// Shorthand for `--log-level debug`.
    #[arg(short, long)]
    pub debug: bool,
    /// Log to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates a new container from a TOML-encoded `ContainerSpec`.
    Create(CreateArgs),
    /// Runs a command inside an existing container's namespaces.
    Run(RunArgs),
    /// Execs a command inside an existing container's namespaces, replacing
    /// the calling process.
    Exec(ExecArgs),
    /// Migrates a running container's process into additional namespaces.
    Update(UpdateArgs),
    /// Emits a shell completion script.
    Completion(CompletionArgs),
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    /// Path to a TOML file describing the `ContainerSpec`.
    pub spec: PathBuf,
    /// Argv for the container's init; defaults to the configured nsinit
    /// wrapper when empty.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub init_argv: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// The `NsHandle` string returned by `create`.
    pub handle: String,
    /// Path to a TOML file describing the `RunSpec`.
    pub run_spec: PathBuf,
    /// Argv to run inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub argv: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ExecArgs {
    /// The `NsHandle` string returned by `create`.
    pub handle: String,
    /// Argv to exec inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub argv: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// The `NsHandle` string returned by `create`.
    pub handle: String,
    /// Path to a TOML file describing the namespace subspecs to migrate
    /// into.
    pub spec: PathBuf,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
