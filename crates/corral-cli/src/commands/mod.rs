//! CLI command definitions and dispatch.

pub mod create;
pub mod delete;
pub mod exec;
pub mod kill;
pub mod list;
pub mod pause;
pub mod ps;
pub mod run;
pub mod start;
pub mod state;
pub mod stats;

use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use corral_common::config::{ContainerConfig, RuntimeConfig};
use corral_common::constants::BUNDLE_CONFIG_FILENAME;
use corral_common::types::{ContainerId, NoNewPrivileges, User};
use corral_core::capability::Capability;
use corral_runtime::container::linux_backends;
use corral_runtime::{Container, Process};

/// Default `PATH` given to processes that do not set one.
const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Corral: lifecycle core of an OCI-style container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding container state.
    #[arg(long, global = true, env = "CORRAL_ROOT")]
    pub root: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line encoding on stderr.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container and park its init at the exec handshake.
    Create(create::CreateArgs),
    /// Run the command of a created container.
    Start(start::StartArgs),
    /// Create and start a container, then wait for it in the foreground.
    Run(run::RunArgs),
    /// Print the OCI state of a container.
    State(state::StateArgs),
    /// Send a signal to a container's init or to all of its processes.
    Kill(kill::KillArgs),
    /// Remove a stopped container.
    Delete(delete::DeleteArgs),
    /// Run an additional process inside a running container.
    Exec(exec::ExecArgs),
    /// List the processes of a container.
    Ps(ps::PsArgs),
    /// Freeze every process of a container.
    Pause(pause::PauseArgs),
    /// Thaw a paused container.
    Resume(pause::PauseArgs),
    /// Print resource usage of a container.
    Stats(stats::StatsArgs),
    /// List known containers.
    List(list::ListArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let runtime = runtime_config(cli.root.as_deref())?;
    match cli.command {
        Command::Create(args) => create::execute(args, &runtime),
        Command::Start(args) => start::execute(&args, &runtime),
        Command::Run(args) => run::execute(args, &runtime),
        Command::State(args) => state::execute(&args, &runtime),
        Command::Kill(args) => kill::execute(&args, &runtime),
        Command::Delete(args) => delete::execute(&args, &runtime),
        Command::Exec(args) => exec::execute(args, &runtime),
        Command::Ps(args) => ps::execute(&args, &runtime),
        Command::Pause(args) => pause::pause(&args, &runtime),
        Command::Resume(args) => pause::resume(&args, &runtime),
        Command::Stats(args) => stats::execute(&args, &runtime),
        Command::List(args) => list::execute(&args, &runtime),
    }
}

/// Options describing the process to launch, shared by `create`, `run` and
/// `exec`.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Environment variable as KEY=VALUE. Repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Identity to run as, `uid[:gid]`.
    #[arg(short, long)]
    pub user: Option<User>,

    /// Additional group ID. Repeatable.
    #[arg(short = 'g', long = "additional-gid")]
    pub additional_gids: Vec<u32>,

    /// Working directory inside the container.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Capability to keep in the bounding set. Repeatable; when absent the
    /// inherited set is kept.
    #[arg(long = "cap")]
    pub capabilities: Vec<Capability>,

    /// Set no_new_privileges: `auto`, `true` or `false`.
    #[arg(long, default_value = "auto")]
    pub no_new_privileges: NoNewPrivileges,

    /// `AppArmor` profile for the process.
    #[arg(long)]
    pub apparmor: Option<String>,

    /// `SELinux` label for the process.
    #[arg(long)]
    pub process_label: Option<String>,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

impl ProcessArgs {
    /// Builds a process descriptor that shares this CLI's stdio.
    pub fn into_process(self, init: bool) -> anyhow::Result<Process> {
        let mut env = self.env;
        if !env.iter().any(|e| e.starts_with("PATH=")) {
            env.push(DEFAULT_PATH.to_string());
        }
        let mut process = if init {
            Process::init(self.command)
        } else {
            Process::new(self.command)
        };
        process.env = env;
        process.user = self.user.unwrap_or_default();
        process.additional_groups = self.additional_gids;
        process.cwd = self.cwd;
        process.capabilities = (!self.capabilities.is_empty()).then_some(self.capabilities);
        process.no_new_privileges = self.no_new_privileges;
        process.apparmor_profile = self.apparmor;
        process.label = self.process_label;
        inherit_stdio(&mut process)?;
        Ok(process)
    }
}

/// Hands this process's own stdin, stdout and stderr to `process`.
fn inherit_stdio(process: &mut Process) -> anyhow::Result<()> {
    process.stdin = Some(
        std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .context("duplicating stdin")?,
    );
    process.stdout = Some(
        std::io::stdout()
            .as_fd()
            .try_clone_to_owned()
            .context("duplicating stdout")?,
    );
    process.stderr = Some(
        std::io::stderr()
            .as_fd()
            .try_clone_to_owned()
            .context("duplicating stderr")?,
    );
    Ok(())
}

/// Builds the runtime configuration, making a relative `--root` absolute.
fn runtime_config(root: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match root {
        Some(root) => Ok(RuntimeConfig::with_root(absolute(root)?)),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Resolves `path` against the current directory.
pub(crate) fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))
}

/// Opens an existing container.
pub(crate) fn open(id: &str, runtime: &RuntimeConfig) -> anyhow::Result<Container> {
    let (store, platform) = linux_backends(runtime);
    Ok(Container::load(
        ContainerId::new(id)?,
        runtime.clone(),
        store,
        platform,
    )?)
}

/// Prepares a container from the bundle at `bundle`.
pub(crate) fn new_container(
    id: Option<&str>,
    bundle: &Path,
    runtime: &RuntimeConfig,
) -> anyhow::Result<Container> {
    let id = container_id(id)?;
    let config = load_bundle(bundle)?;
    let (store, platform) = linux_backends(runtime);
    Ok(Container::new(
        id,
        config,
        runtime.clone(),
        store,
        platform,
    ))
}

/// Validates the requested ID, or generates one when none was given.
fn container_id(id: Option<&str>) -> anyhow::Result<ContainerId> {
    match id {
        Some(id) => Ok(ContainerId::new(id)?),
        None => Ok(ContainerId::generate()),
    }
}

/// Reads `<bundle>/corral.json`, falling back to defaults when absent.
fn load_bundle(bundle: &Path) -> anyhow::Result<ContainerConfig> {
    let bundle = absolute(bundle)?;
    let path = bundle.join(BUNDLE_CONFIG_FILENAME);
    let mut config: ContainerConfig = match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no bundle config, using defaults");
            ContainerConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    if let Some(rootfs) = config.rootfs.take() {
        config.rootfs = Some(bundle.join(rootfs));
    }
    config.bundle = bundle;
    Ok(config)
}

/// Writes `pid` to `path` if a pid file was requested.
pub(crate) fn write_pid_file(path: Option<&Path>, pid: i32) -> anyhow::Result<()> {
    if let Some(path) = path {
        std::fs::write(path, pid.to_string())
            .with_context(|| format!("writing pid file {}", path.display()))?;
    }
    Ok(())
}
