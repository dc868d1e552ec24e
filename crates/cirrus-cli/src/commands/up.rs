//! `cirrus up`: Provision every resource of a stack.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use cirrus_common::constants::DEFAULT_STACK_FILE;
use cirrus_common::types::ResourceState;
use cirrus_engine::LocalProvider;
use tokio_util::sync::CancellationToken;

use super::StackOptions;
use crate::output;

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Path to the stack file.
    #[arg(default_value = DEFAULT_STACK_FILE)]
    pub file: String,

    /// Make provisioning of a resource fail, as `name` or `name=reason`.
    #[arg(long = "fail", value_name = "NAME[=REASON]")]
    pub failures: Vec<String>,
}

/// Executes the `up` command.
///
/// Applies the stack through the local provider and writes the state
/// file. Ctrl+C cancels resources that have not resolved yet; the state
/// of everything that did resolve is still saved.
///
/// # Errors
///
/// Returns an error if the stack cannot be built, the state cannot be
/// written, or any resource did not resolve.
pub fn execute(args: UpArgs, options: &StackOptions) -> anyhow::Result<()> {
    let mut provider = LocalProvider::new();
    for failure in &args.failures {
        let (name, reason) = failure
            .split_once('=')
            .unwrap_or((failure.as_str(), "injected failure"));
        provider = provider.with_failure(name, reason);
    }
    let runner = options.runner(&args.file, Arc::new(provider))?;
    tracing::info!(file = %args.file, injected = args.failures.len(), "applying stack");

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || token.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let report = super::runtime()?
        .block_on(runner.up(cancel))
        .with_context(|| format!("applying {}", args.file))?;

    print!("{}", output::apply_summary(&report));
    if report.cancelled {
        anyhow::bail!("apply was cancelled");
    }
    if !report.is_success() {
        let unresolved = report.resources.len() - report.count(ResourceState::Resolved);
        anyhow::bail!("{unresolved} resource(s) did not resolve");
    }
    Ok(())
}
