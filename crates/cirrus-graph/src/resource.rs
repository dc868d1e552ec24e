//! Resource declarations and handles.
//!
//! A [`ResourceSpec`] describes what the caller wants: a name, a type tag,
//! input values and options. Declaring it on a
//! [`StackBuilder`](crate::StackBuilder) yields a [`ResourceHandle`] whose
//! outputs can be wired into later declarations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cirrus_common::types::{AttributeName, Attributes, ResourceName, ResourceState, ResourceType};
use serde_json::Value;

use crate::output::{Output, Reference};
use crate::slot::ResourceSlot;

/// An input value: a literal, a deferred output, or a structure of inputs.
#[derive(Debug, Clone)]
pub enum Input {
    /// Known at declaration time.
    Literal(Value),
    /// Produced by another resource.
    Deferred(Output<Value>),
    /// A list whose elements may be deferred.
    List(Vec<Input>),
    /// An object whose fields may be deferred.
    Object(BTreeMap<String, Input>),
}

impl Input {
    /// Builds a list input.
    pub fn list<I: Into<Self>>(items: impl IntoIterator<Item = I>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds an object input.
    pub fn object<K: Into<String>, V: Into<Self>>(fields: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Adds every reference contained in this input to `out`.
    pub fn collect_references(&self, out: &mut BTreeSet<Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Deferred(output) => out.extend(output.references().cloned()),
            Self::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            Self::Object(fields) => fields.values().for_each(|i| i.collect_references(out)),
        }
    }

    /// Returns every reference contained in this input.
    pub fn references(&self) -> BTreeSet<Reference> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    /// Returns the value if no part of the input is deferred.
    pub fn as_literal(&self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Deferred(_) => None,
            Self::List(items) => items
                .iter()
                .map(Self::as_literal)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Object(fields) => fields
                .iter()
                .map(|(k, v)| v.as_literal().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }

    /// Converts the input into a single deferred value.
    pub fn to_output(&self) -> Output<Value> {
        if let Some(value) = self.as_literal() {
            return Output::known(value);
        }
        match self {
            Self::Literal(value) => Output::known(value.clone()),
            Self::Deferred(output) => output.clone(),
            Self::List(items) => {
                Output::all(items.iter().map(Self::to_output)).map(Value::Array)
            }
            Self::Object(fields) => {
                let keys: Vec<String> = fields.keys().cloned().collect();
                Output::all(fields.values().map(Self::to_output)).map(move |values| {
                    Value::Object(keys.into_iter().zip(values).collect())
                })
            }
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<u16> for Input {
    fn from(value: u16) -> Self {
        Self::Literal(value.into())
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Self::Literal(value.into())
    }
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Self::Literal(value.into())
    }
}

impl From<Output<Value>> for Input {
    fn from(value: Output<Value>) -> Self {
        Self::Deferred(value)
    }
}

impl From<&Output<Value>> for Input {
    fn from(value: &Output<Value>) -> Self {
        Self::Deferred(value.clone())
    }
}

impl From<Output<String>> for Input {
    fn from(value: Output<String>) -> Self {
        Self::Deferred(value.map(Value::String))
    }
}

impl From<&Output<String>> for Input {
    fn from(value: &Output<String>) -> Self {
        Self::Deferred(value.map(Value::String))
    }
}

impl<T: Into<Self>> From<Vec<T>> for Input {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

/// Options that change how a resource is managed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Refuse to destroy the resource unless forced.
    pub protect: bool,
    /// Resources that must resolve first even though no input references them.
    pub depends_on: Vec<String>,
}

/// What the provider does for a declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeclarationKind {
    /// Creates a resource the stack owns.
    #[default]
    Resource,
    /// Reads data through a provider function; nothing is created.
    Lookup,
}

/// Request to declare a resource.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub(crate) name: String,
    pub(crate) resource_type: String,
    pub(crate) kind: DeclarationKind,
    pub(crate) inputs: BTreeMap<String, Input>,
    pub(crate) options: ResourceOptions,
}

impl ResourceSpec {
    /// Starts a specification for a resource of the given type.
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            kind: DeclarationKind::Resource,
            inputs: BTreeMap::new(),
            options: ResourceOptions::default(),
        }
    }

    /// Starts a lookup that calls the provider function `function`, such as
    /// `aws:ec2:getAmi`. Its inputs are the function arguments and its
    /// outputs are read like resource outputs.
    pub fn lookup(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            kind: DeclarationKind::Lookup,
            ..Self::new(name, function)
        }
    }

    /// Sets an input; a later value for the same key replaces the earlier one.
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Input>) -> Self {
        let _ = self.inputs.insert(key.into(), value.into());
        self
    }

    /// Marks the resource as protected from destruction.
    #[must_use]
    pub const fn protect(mut self, protect: bool) -> Self {
        self.options.protect = protect;
        self
    }

    /// Orders this resource after `resource`.
    #[must_use]
    pub fn depends_on(self, resource: &ResourceHandle) -> Self {
        self.depends_on_name(resource.name().as_str())
    }

    /// Orders this resource after the resource named `name`.
    #[must_use]
    pub fn depends_on_name(mut self, name: impl Into<String>) -> Self {
        self.options.depends_on.push(name.into());
        self
    }

    /// Returns the requested resource name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A validated resource declaration inside a stack.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Logical name.
    pub name: ResourceName,
    /// Type tag, or the function a lookup calls.
    pub resource_type: ResourceType,
    /// Whether the provider creates or only reads this.
    pub kind: DeclarationKind,
    /// Inputs by attribute name.
    pub inputs: BTreeMap<AttributeName, Input>,
    /// Management options.
    pub options: ResourceOptions,
    pub(crate) references: BTreeSet<Reference>,
}

impl Declaration {
    /// Returns `true` for a provider lookup.
    pub fn is_lookup(&self) -> bool {
        self.kind == DeclarationKind::Lookup
    }

    /// Returns the output attributes referenced by this resource's inputs.
    pub const fn references(&self) -> &BTreeSet<Reference> {
        &self.references
    }

    /// Returns the names of every resource this one waits for.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references
            .iter()
            .map(|r| r.resource.clone())
            .chain(self.options.depends_on.iter().cloned())
            .collect()
    }

    /// Output attributes other resources read from this one.
    pub(crate) fn referenced_attributes<'a>(
        &'a self,
        all: &'a [Self],
    ) -> impl Iterator<Item = &'a str> + 'a {
        all.iter()
            .flat_map(|d| d.references.iter())
            .filter(|r| r.resource == self.name.as_str())
            .map(|r| r.attribute.as_str())
    }

    /// Resolves every input into one attribute map.
    pub fn resolved_inputs(&self) -> Output<Attributes> {
        let keys: Vec<String> = self.inputs.keys().map(ToString::to_string).collect();
        Output::all(self.inputs.values().map(Input::to_output))
            .map(move |values| keys.into_iter().zip(values).collect())
    }
}

/// Handle to a declared resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    name: ResourceName,
    resource_type: ResourceType,
    slot: Arc<ResourceSlot>,
}

impl ResourceHandle {
    pub(crate) const fn new(
        name: ResourceName,
        resource_type: ResourceType,
        slot: Arc<ResourceSlot>,
    ) -> Self {
        Self {
            name,
            resource_type,
            slot,
        }
    }

    /// Returns the logical name.
    pub const fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Returns the type tag.
    pub const fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Deferred value of output attribute `attribute`.
    ///
    /// The attribute name is validated when the stack is built.
    pub fn output(&self, attribute: &str) -> Output<Value> {
        Output::from_slot(Arc::clone(&self.slot), attribute.to_string())
    }

    /// Shorthand for `output("id")`.
    pub fn id(&self) -> Output<Value> {
        self.output("id")
    }

    /// Shorthand for `output("arn")`.
    pub fn arn(&self) -> Output<Value> {
        self.output("arn")
    }

    /// Returns the current resolution state.
    pub fn state(&self) -> ResourceState {
        self.slot.state()
    }
}
