//! `cirrus destroy`: Delete every provisioned resource of a stack.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use cirrus_common::constants::DEFAULT_STACK_FILE;
use cirrus_engine::LocalProvider;

use super::StackOptions;
use crate::output;

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Path to the stack file.
    #[arg(default_value = DEFAULT_STACK_FILE)]
    pub file: String,

    /// Delete protected resources too.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `destroy` command.
///
/// # Errors
///
/// Returns an error if a protected resource would be deleted without
/// `--force`, or if any deletion fails.
pub fn execute(args: DestroyArgs, options: &StackOptions) -> anyhow::Result<()> {
    let runner = options.runner(&args.file, Arc::new(LocalProvider::new()))?;
    tracing::info!(file = %args.file, force = args.force, "destroying stack");
    let report = super::runtime()?
        .block_on(runner.destroy(args.force))
        .with_context(|| format!("destroying {}", args.file))?;

    print!("{}", output::destroy_summary(&report));
    if !report.is_success() {
        anyhow::bail!("{} resource(s) could not be deleted", report.failed.len());
    }
    Ok(())
}
