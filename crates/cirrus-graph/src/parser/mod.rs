//! YAML stack file front-end.
//!
//! Turns a stack file into a validated [`Stack`] in three phases: YAML
//! deserialization into a [`StackDocument`], static validation, and
//! compilation through a [`StackBuilder`]. Entries of `lookups:` compile to
//! [`ResourceSpec::lookup`] declarations whose arguments follow the same
//! rules as resource properties.
//!
//! Inside property values:
//! - a string that is exactly `${resource.attr...}` becomes the raw
//!   attribute value (further segments navigate into it);
//! - a string mixing text and references becomes an interpolated string;
//! - `${config.key}` is replaced by the configured value, or the declared
//!   default, at construction time.

pub mod ast;
pub mod validator;

use std::path::Path;

use cirrus_common::config::StackConfig;
use cirrus_common::error::{CirrusError, Result};
use serde_json::Value;

use self::ast::StackDocument;
use crate::builder::StackBuilder;
use crate::output::{Output, concat, value_to_string};
use crate::resource::{Input, ResourceSpec};
use crate::stack::Stack;
use crate::template::{CONFIG_NAMESPACE, Segment, Template};

/// Parses and validates a stack document from YAML text.
///
/// # Errors
///
/// Returns an error if the YAML is malformed or validation fails.
pub fn parse_stack(input: &str) -> Result<StackDocument> {
    tracing::info!("parsing stack document");
    let doc: StackDocument = serde_yaml::from_str(input)?;
    validator::validate(&doc)?;
    tracing::debug!(stack = %doc.name, resources = doc.resources.len(), "stack document parsed");
    Ok(doc)
}

/// Reads, parses and validates a stack file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid stack.
pub fn load_stack_file(path: &Path) -> Result<StackDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| CirrusError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_stack(&content)
}

/// Compiles a validated document into a stack.
///
/// # Errors
///
/// Returns any construction error: missing configuration, malformed
/// references, undeclared resources or cycles.
pub fn compile(doc: &StackDocument, config: &StackConfig) -> Result<Stack> {
    let compiler = Compiler { doc, config };
    let mut builder = StackBuilder::new(config.clone());

    for decl in &doc.lookups {
        let mut spec = ResourceSpec::lookup(compiler.render_name(&decl.name)?, decl.function.as_str());
        for (key, value) in &decl.arguments {
            spec = spec.input(key.as_str(), compiler.compile_value(&mut builder, value)?);
        }
        let _ = builder.declare(spec)?;
    }

    for decl in &doc.resources {
        let name = compiler.render_name(&decl.name)?;
        let mut spec = ResourceSpec::new(name, decl.resource_type.as_str())
            .protect(decl.options.protect);
        for dependency in &decl.options.depends_on {
            spec = spec.depends_on_name(compiler.render_name(dependency)?);
        }
        for (key, value) in &decl.properties {
            spec = spec.input(key.as_str(), compiler.compile_value(&mut builder, value)?);
        }
        let _ = builder.declare(spec)?;
    }

    for (name, value) in &doc.outputs {
        let input = compiler.compile_value(&mut builder, value)?;
        builder.export(name, input)?;
    }

    builder.build()
}

/// Parses, validates and compiles YAML text in one step.
///
/// # Errors
///
/// Returns the first parse, validation or construction error.
pub fn compile_str(input: &str, config: &StackConfig) -> Result<Stack> {
    compile(&parse_stack(input)?, config)
}

struct Compiler<'a> {
    doc: &'a StackDocument,
    config: &'a StackConfig,
}

impl Compiler<'_> {
    fn config_value(&self, key: &str) -> Result<Value> {
        self.config
            .get(key)
            .or_else(|| self.doc.config.get(key).and_then(|d| d.default.clone()))
            .ok_or_else(|| CirrusError::MissingConfig {
                key: key.to_string(),
            })
    }

    fn config_key<'p>(raw: &str, path: &'p [String]) -> Result<Option<&'p str>> {
        match path {
            [namespace, key] if namespace == CONFIG_NAMESPACE => Ok(Some(key.as_str())),
            [namespace, ..] if namespace == CONFIG_NAMESPACE => Err(CirrusError::MalformedReference {
                input: raw.to_string(),
                reason: "config references take the form `${config.key}`".into(),
            }),
            _ => Ok(None),
        }
    }

    fn render_name(&self, raw: &str) -> Result<String> {
        let template = Template::parse(raw)?;
        let mut rendered = String::new();
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Reference(path) => {
                    let Some(key) = Self::config_key(raw, path)? else {
                        return Err(CirrusError::MalformedReference {
                            input: raw.to_string(),
                            reason: "resource names may only interpolate config values".into(),
                        });
                    };
                    rendered.push_str(&value_to_string(&self.config_value(key)?));
                }
            }
        }
        Ok(rendered)
    }

    fn compile_value(&self, builder: &mut StackBuilder, value: &Value) -> Result<Input> {
        match value {
            Value::String(raw) => self.compile_string(builder, raw),
            Value::Array(items) => Ok(Input::List(
                items
                    .iter()
                    .map(|item| self.compile_value(builder, item))
                    .collect::<Result<_>>()?,
            )),
            Value::Object(fields) => Ok(Input::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.compile_value(builder, v)?)))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(Input::Literal(other.clone())),
        }
    }

    fn compile_string(&self, builder: &mut StackBuilder, raw: &str) -> Result<Input> {
        let template = Template::parse(raw)?;
        if let Some(path) = template.as_single_reference() {
            return match Self::config_key(raw, path)? {
                Some(key) => Ok(Input::Literal(self.config_value(key)?)),
                None => Ok(Input::Deferred(Self::resource_reference(builder, raw, path)?)),
            };
        }

        let mut parts: Vec<Output<String>> = Vec::new();
        let mut deferred = false;
        let mut literal = String::new();
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => {
                    literal.push_str(text);
                    parts.push(Output::known(text.clone()));
                }
                Segment::Reference(path) => {
                    if let Some(key) = Self::config_key(raw, path)? {
                        let value = value_to_string(&self.config_value(key)?);
                        literal.push_str(&value);
                        parts.push(Output::known(value));
                    } else {
                        deferred = true;
                        parts.push(Self::resource_reference(builder, raw, path)?.as_string());
                    }
                }
            }
        }

        if deferred {
            Ok(Input::from(concat(parts)))
        } else {
            Ok(Input::Literal(Value::String(literal)))
        }
    }

    fn resource_reference(
        builder: &mut StackBuilder,
        raw: &str,
        path: &[String],
    ) -> Result<Output<Value>> {
        let [resource, attribute, rest @ ..] = path else {
            return Err(CirrusError::MalformedReference {
                input: raw.to_string(),
                reason: "expected `${resource.attribute}`".into(),
            });
        };
        let output = builder.reference(resource, attribute);
        Ok(if rest.is_empty() {
            output
        } else {
            output.lookup(rest)
        })
    }
}
