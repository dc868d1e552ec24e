//! Static analysis of a parsed stack document.
//!
//! Catches duplicate names, reserved names, unknown `dependsOn` targets,
//! undeclared configuration keys and malformed `${...}` expressions before
//! any resource is declared. Lookups share the resource namespace.

use std::collections::HashSet;

use cirrus_common::error::{CirrusError, Result};
use serde_json::Value;

use super::ast::StackDocument;
use crate::template::{CONFIG_NAMESPACE, Template};

/// Configuration keys every stack provides without declaring them.
const BUILTIN_CONFIG_KEYS: [&str; 3] = ["region", "project", "stack"];

/// Validates a parsed stack document for semantic correctness.
///
/// # Checks performed
///
/// 1. No duplicate resource or lookup names.
/// 2. No resource or lookup is named `config`.
/// 3. Every `dependsOn` entry names a declared resource or lookup.
/// 4. Every `${config.key}` names a declared or built-in key.
/// 5. Every `${...}` expression parses.
///
/// # Errors
///
/// Returns an error if any semantic check fails.
pub fn validate(doc: &StackDocument) -> Result<()> {
    tracing::info!(
        stack = %doc.name,
        resources = doc.resources.len(),
        lookups = doc.lookups.len(),
        "validating stack document"
    );
    check_duplicate_resources(doc)?;
    check_reserved_names(doc)?;
    check_depends_on(doc)?;
    check_config_references(doc)?;
    Ok(())
}

/// Every declared name, lookups first.
fn declared_names(doc: &StackDocument) -> impl Iterator<Item = &str> {
    doc.lookups
        .iter()
        .map(|l| l.name.as_str())
        .chain(doc.resources.iter().map(|r| r.name.as_str()))
}

fn check_duplicate_resources(doc: &StackDocument) -> Result<()> {
    let mut seen = HashSet::new();
    match declared_names(doc).find(|name| !seen.insert(*name)) {
        Some(name) => Err(CirrusError::DuplicateResource {
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_reserved_names(doc: &StackDocument) -> Result<()> {
    match declared_names(doc).find(|name| *name == CONFIG_NAMESPACE) {
        Some(name) => Err(CirrusError::Config {
            message: format!("resource name `{name}` is reserved"),
        }),
        None => Ok(()),
    }
}

fn check_depends_on(doc: &StackDocument) -> Result<()> {
    let names: HashSet<&str> = declared_names(doc).collect();
    for resource in &doc.resources {
        if let Some(missing) = resource
            .options
            .depends_on
            .iter()
            .find(|d| !names.contains(d.as_str()))
        {
            return Err(CirrusError::UndeclaredResource {
                name: missing.clone(),
                referenced_by: resource.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_config_references(doc: &StackDocument) -> Result<()> {
    let mut templates: Vec<&str> = Vec::new();
    for lookup in &doc.lookups {
        templates.push(&lookup.name);
        for value in lookup.arguments.values() {
            collect_strings(value, &mut templates);
        }
    }
    for resource in &doc.resources {
        templates.push(&resource.name);
        templates.extend(resource.options.depends_on.iter().map(String::as_str));
        for value in resource.properties.values() {
            collect_strings(value, &mut templates);
        }
    }
    for value in doc.outputs.values() {
        collect_strings(value, &mut templates);
    }

    for raw in templates {
        let template = Template::parse(raw)?;
        for path in template.references() {
            if path.first().map(String::as_str) != Some(CONFIG_NAMESPACE) {
                continue;
            }
            let [_, key] = path else {
                return Err(CirrusError::MalformedReference {
                    input: raw.to_string(),
                    reason: "config references take the form `${config.key}`".into(),
                });
            };
            if !doc.config.contains_key(key) && !BUILTIN_CONFIG_KEYS.contains(&key.as_str()) {
                return Err(CirrusError::Config {
                    message: format!("`{raw}` reads undeclared configuration key `{key}`"),
                });
            }
        }
    }
    Ok(())
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(fields) => fields.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
