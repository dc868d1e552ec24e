//! CLI command definitions and dispatch.

pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod up;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cirrus_engine::Provider;
use cirrus_sdk::loader::StackLoader;
use cirrus_sdk::runner::StackRunner;
use clap::{Parser, Subcommand};

/// Cirrus: declarative resource graphs with deferred outputs.
#[derive(Parser, Debug)]
#[command(name = "cirrus", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Stack configuration file (project, stack, region, values).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding state files; defaults to `.cirrus/` next to the stack file.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Preview the resources a stack declares, in resolution order.
    Plan(plan::PlanArgs),
    /// Provision every resource of a stack.
    Up(up::UpArgs),
    /// Show the stack outputs recorded by the last `up`.
    Outputs(outputs::OutputsArgs),
    /// Show the dependency graph.
    Graph(graph::GraphArgs),
    /// Delete every provisioned resource.
    Destroy(destroy::DestroyArgs),
}

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct StackOptions {
    /// Stack configuration file.
    pub config: Option<PathBuf>,
    /// State directory override.
    pub state_dir: Option<PathBuf>,
}

impl StackOptions {
    /// Builds the loader for `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read.
    pub fn loader(&self, file: &str) -> anyhow::Result<StackLoader> {
        let loader = StackLoader::new(file);
        match &self.config {
            Some(path) => loader
                .with_config_file(path)
                .with_context(|| format!("loading configuration {}", path.display())),
            None => Ok(loader),
        }
    }

    /// Builds a runner for `file` backed by `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read.
    pub fn runner(&self, file: &str, provider: Arc<dyn Provider>) -> anyhow::Result<StackRunner> {
        let runner = StackRunner::new(self.loader(file)?, provider);
        Ok(match &self.state_dir {
            Some(dir) => runner.with_state_dir(dir),
            None => runner,
        })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let options = StackOptions {
        config: cli.config,
        state_dir: cli.state_dir,
    };
    match cli.command {
        Command::Plan(args) => plan::execute(args, &options),
        Command::Up(args) => up::execute(args, &options),
        Command::Outputs(args) => outputs::execute(args, &options),
        Command::Graph(args) => graph::execute(args, &options),
        Command::Destroy(args) => destroy::execute(args, &options),
    }
}

/// Builds the async runtime used by commands that talk to a provider.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
