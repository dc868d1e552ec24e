//! Formatted output helpers for CLI commands.
//!
//! Provides consistent summaries of apply and destroy runs, state markers
//! and human-readable duration formatting.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use cirrus_common::types::ResourceState;
use cirrus_engine::{ApplyReport, DestroyReport};
use cirrus_graph::output::value_to_string;
use serde_json::Value;

/// Formats a duration for progress lines (e.g., "350ms", "1.2s").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// One-character marker for a resource state.
#[must_use]
pub const fn state_marker(state: ResourceState) -> char {
    match state {
        ResourceState::Resolved => '+',
        ResourceState::Failed => '!',
        ResourceState::Cancelled => '~',
        ResourceState::Pending => '?',
    }
}

/// Renders `name = value` lines, strings without quotes.
#[must_use]
pub fn key_values(values: &BTreeMap<String, Value>) -> String {
    let width = values.keys().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in values {
        let _ = writeln!(out, "  {key:<width$} = {}", value_to_string(value));
    }
    out
}

/// Summarizes an apply run.
#[must_use]
pub fn apply_summary(report: &ApplyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Applying stack: {} (run {})", report.stack, report.run_id);
    for resource in &report.resources {
        let _ = write!(
            out,
            "  {} {} ({}) {}",
            state_marker(resource.state),
            resource.name,
            resource.resource_type,
            resource.state
        );
        if !resource.elapsed.is_zero() {
            let _ = write!(out, " in {}", format_duration(resource.elapsed));
        }
        let _ = writeln!(out);
        if let Some(error) = &resource.error {
            let _ = writeln!(out, "      {error}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {} resolved, {} failed, {} cancelled.",
        report.count(ResourceState::Resolved),
        report.count(ResourceState::Failed),
        report.count(ResourceState::Cancelled)
    );
    if !report.outputs.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Outputs:");
        out.push_str(&key_values(&report.outputs));
    }
    for (name, error) in &report.output_errors {
        let _ = writeln!(out, "  {name} unavailable: {error}");
    }
    out
}

/// Summarizes a destroy run.
#[must_use]
pub fn destroy_summary(report: &DestroyReport) -> String {
    let mut out = String::new();
    for name in &report.deleted {
        let _ = writeln!(out, "  - {name} deleted");
    }
    for (name, reason) in &report.failed {
        let _ = writeln!(out, "  ! {name}: {reason}");
    }
    let _ = writeln!(
        out,
        "  {} deleted, {} failed, {} not provisioned.",
        report.deleted.len(),
        report.failed.len(),
        report.skipped.len()
    );
    out
}
