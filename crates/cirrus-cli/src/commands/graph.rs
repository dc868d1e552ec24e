//! `cirrus graph`: Show the dependency graph of a stack.

use clap::Args;
use cirrus_common::constants::DEFAULT_STACK_FILE;

use super::StackOptions;

/// Arguments for the `graph` command.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Path to the stack file.
    #[arg(default_value = DEFAULT_STACK_FILE)]
    pub file: String,

    /// Print Graphviz DOT instead of a dependency listing.
    #[arg(long)]
    pub dot: bool,
}

/// Executes the `graph` command.
///
/// # Errors
///
/// Returns an error if the stack cannot be built, including when its
/// references form a cycle.
pub fn execute(args: GraphArgs, options: &StackOptions) -> anyhow::Result<()> {
    let stack = options.loader(&args.file)?.load()?;
    tracing::debug!(resources = stack.len(), edges = stack.edge_count(), "graph built");

    if args.dot {
        print!("{}", stack.to_dot());
        return Ok(());
    }

    for name in stack.order() {
        let dependencies = stack.dependencies(name.as_str());
        if dependencies.is_empty() {
            println!("{name}");
        } else {
            println!("{name} <- {}", dependencies.join(", "));
        }
    }
    Ok(())
}
