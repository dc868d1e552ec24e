//! `cirrus plan`: Preview the resources a stack declares.

use clap::Args;
use cirrus_common::constants::DEFAULT_STACK_FILE;

use super::StackOptions;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the stack file.
    #[arg(default_value = DEFAULT_STACK_FILE)]
    pub file: String,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Loads the stack, validates the graph and prints every resource in
/// resolution order. Inputs that depend on other resources show as
/// computed.
///
/// # Errors
///
/// Returns an error if loading, validation or graph construction fails.
pub fn execute(args: PlanArgs, options: &StackOptions) -> anyhow::Result<()> {
    tracing::info!(file = %args.file, "planning stack");
    let stack = options.loader(&args.file)?.load()?;
    let plan = stack.plan();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print!("{plan}");
    println!();
    println!(
        "  {} resource(s) to create, {} lookup(s), {} input(s) known after apply, {} dependency edge(s).",
        plan.creates(),
        plan.steps.len() - plan.creates(),
        plan.computed_inputs(),
        stack.edge_count()
    );
    Ok(())
}
