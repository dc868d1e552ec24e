//! `cirrus outputs`: Show the stack outputs recorded by the last `up`.

use std::sync::Arc;

use clap::Args;
use cirrus_common::constants::DEFAULT_STACK_FILE;
use cirrus_engine::LocalProvider;

use super::StackOptions;
use crate::output;

/// Arguments for the `outputs` command.
#[derive(Args, Debug)]
pub struct OutputsArgs {
    /// Path to the stack file.
    #[arg(default_value = DEFAULT_STACK_FILE)]
    pub file: String,

    /// Print the outputs as a JSON object.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `outputs` command.
///
/// # Errors
///
/// Returns an error if the stack was never applied or its state is invalid.
pub fn execute(args: OutputsArgs, options: &StackOptions) -> anyhow::Result<()> {
    let outputs = options
        .runner(&args.file, Arc::new(LocalProvider::new()))?
        .outputs()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else if outputs.is_empty() {
        println!("No outputs recorded.");
    } else {
        print!("{}", output::key_values(&outputs));
    }
    Ok(())
}
