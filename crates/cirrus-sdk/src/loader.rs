//! Loads YAML stack files into validated stacks.
//!
//! Wraps `cirrus-graph`'s parser with configuration handling: a stack file
//! names the program, a config file names the stack instance and supplies
//! the values the program reads.

use std::path::{Path, PathBuf};

use cirrus_common::config::StackConfig;
use cirrus_common::error::Result;
use cirrus_graph::Stack;
use cirrus_graph::parser::ast::StackDocument;

/// Reads a stack file and compiles it against a configuration.
#[derive(Debug, Clone)]
pub struct StackLoader {
    path: PathBuf,
    config: Option<StackConfig>,
}

impl StackLoader {
    /// Creates a loader for the stack file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Uses `config` instead of the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: StackConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Reads the configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn with_config_file(self, path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading stack configuration");
        Ok(self.with_config(StackConfig::load(path)?))
    }

    /// Returns the stack file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses and statically validates the stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn document(&self) -> Result<StackDocument> {
        cirrus_graph::parser::load_stack_file(&self.path)
    }

    /// Configuration the stack is compiled with.
    ///
    /// Without an explicit configuration the project is named after the
    /// program and every other setting takes its default.
    pub fn config_for(&self, doc: &StackDocument) -> StackConfig {
        self.config.clone().unwrap_or_else(|| StackConfig {
            project: doc.name.clone(),
            ..StackConfig::default()
        })
    }

    /// Builds a fresh stack.
    ///
    /// Each call returns new, unapplied slots, so the same loader can be
    /// applied any number of times.
    ///
    /// # Errors
    ///
    /// Returns any parse, validation, configuration or construction error.
    pub fn load(&self) -> Result<Stack> {
        let doc = self.document()?;
        let config = self.config_for(&doc);
        tracing::debug!(
            program = %doc.name,
            stack = %config.stack,
            resources = doc.resources.len(),
            "compiling stack"
        );
        cirrus_graph::parser::compile(&doc, &config)
    }
}
