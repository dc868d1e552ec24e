//! Deterministic preview of a stack.
//!
//! A plan lists every resource in dependency order with its inputs. Values
//! that are only known after provisioning are shown as computed, together
//! with the references they are derived from.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::resource::Input;
use crate::stack::Stack;

/// An input value as seen before provisioning.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PlanValue {
    /// Known literal.
    Known(Value),
    /// Known only after the listed `resource.attribute` references resolve.
    Computed(Vec<String>),
    /// List with at least one computed element.
    List(Vec<PlanValue>),
    /// Object with at least one computed field.
    Object(BTreeMap<String, PlanValue>),
}

impl PlanValue {
    /// Describes an input.
    pub fn from_input(input: &Input) -> Self {
        if let Some(value) = input.as_literal() {
            return Self::Known(value);
        }
        match input {
            Input::Literal(value) => Self::Known(value.clone()),
            Input::Deferred(output) => {
                if output.is_independent() {
                    if let Some(Ok(value)) = output.peek() {
                        return Self::Known(value);
                    }
                }
                Self::Computed(output.references().map(ToString::to_string).collect())
            }
            Input::List(items) => Self::List(items.iter().map(Self::from_input).collect()),
            Input::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_input(v)))
                    .collect(),
            ),
        }
    }

    /// Returns `true` if any part of the value is computed.
    pub fn is_computed(&self) -> bool {
        match self {
            Self::Known(_) => false,
            Self::Computed(_) => true,
            Self::List(items) => items.iter().any(Self::is_computed),
            Self::Object(fields) => fields.values().any(Self::is_computed),
        }
    }
}

impl fmt::Display for PlanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Computed(from) if from.is_empty() => f.write_str("<computed>"),
            Self::Computed(from) => write!(f, "<computed from {}>", from.join(", ")),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// One resource in a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Resource name.
    pub name: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Inputs by attribute name.
    pub inputs: BTreeMap<String, PlanValue>,
    /// Direct dependencies, from references and `depends_on`.
    pub depends_on: Vec<String>,
    /// Whether the resource is protected from destruction.
    pub protect: bool,
    /// Whether this only reads data through a provider function.
    pub lookup: bool,
}

/// Preview of a whole stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Stack name.
    pub stack: String,
    /// Resources in dependency order.
    pub steps: Vec<PlanStep>,
    /// Stack outputs.
    pub outputs: BTreeMap<String, PlanValue>,
}

impl Plan {
    /// Builds the plan of `stack`.
    pub fn from_stack(stack: &Stack) -> Self {
        let steps = stack
            .order()
            .iter()
            .filter_map(|name| stack.declaration(name.as_str()))
            .map(|declaration| PlanStep {
                name: declaration.name.to_string(),
                resource_type: declaration.resource_type.to_string(),
                inputs: declaration
                    .inputs
                    .iter()
                    .map(|(k, v)| (k.to_string(), PlanValue::from_input(v)))
                    .collect(),
                depends_on: stack
                    .dependencies(declaration.name.as_str())
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                protect: declaration.options.protect,
                lookup: declaration.is_lookup(),
            })
            .collect();
        let outputs = stack
            .outputs()
            .iter()
            .map(|o| (o.name().to_string(), PlanValue::from_input(o.input())))
            .collect();
        Self {
            stack: stack.name().to_string(),
            steps,
            outputs,
        }
    }

    /// Looks up the step for a resource.
    pub fn step(&self, name: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Number of steps that create a resource.
    pub fn creates(&self) -> usize {
        self.steps.iter().filter(|s| !s.lookup).count()
    }

    /// Number of inputs whose value is only known after provisioning.
    pub fn computed_inputs(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|s| s.inputs.values())
            .filter(|v| v.is_computed())
            .count()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stack {} ({} resources)", self.stack, self.steps.len())?;
        for step in &self.steps {
            let protect = if step.protect { " [protected]" } else { "" };
            let marker = if step.lookup { "<=" } else { "+" };
            writeln!(f, "  {marker} {} ({}){protect}", step.name, step.resource_type)?;
            for (key, value) in &step.inputs {
                writeln!(f, "      {key} = {value}")?;
            }
        }
        if !self.outputs.is_empty() {
            writeln!(f, "outputs:")?;
            for (name, value) in &self.outputs {
                writeln!(f, "  {name} = {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cirrus_common::config::StackConfig;
    use serde_json::json;

    use super::*;
    use crate::builder::StackBuilder;
    use crate::interpolate;
    use crate::resource::ResourceSpec;

    fn stack() -> Stack {
        let mut b = StackBuilder::new(StackConfig::new("web", "dev"));
        let vpc = b
            .declare(ResourceSpec::new("vpc", "aws:ec2:Vpc").input("cidrBlock", "10.0.0.0/16"))
            .expect("vpc");
        let server = b
            .declare(
                ResourceSpec::new("server", "aws:ec2:Instance")
                    .input("vpcSecurityGroupIds", Input::list([vpc.output("defaultSecurityGroupId")]))
                    .input("instanceType", "t3.micro")
                    .protect(true),
            )
            .expect("server");
        b.export("serverUrl", interpolate!["http://", server.output("publicDns")])
            .expect("export");
        b.build().expect("build")
    }

    #[test]
    fn steps_follow_dependency_order() {
        let plan = stack().plan();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["vpc", "server"]);
        assert_eq!(plan.step("server").expect("server").depends_on, vec!["vpc"]);
        assert!(plan.step("server").expect("server").protect);
    }

    #[test]
    fn deferred_inputs_are_computed() {
        let plan = stack().plan();
        let server = plan.step("server").expect("server");
        assert_eq!(server.inputs["instanceType"], PlanValue::Known(json!("t3.micro")));
        assert_eq!(
            server.inputs["vpcSecurityGroupIds"],
            PlanValue::List(vec![PlanValue::Computed(vec!["vpc.defaultSecurityGroupId".into()])])
        );
        assert_eq!(plan.computed_inputs(), 1);
        assert_eq!(
            plan.outputs["serverUrl"].to_string(),
            "<computed from server.publicDns>"
        );
    }

    #[test]
    fn plan_is_deterministic() {
        let first = serde_json::to_string(&stack().plan()).expect("json");
        let second = serde_json::to_string(&stack().plan()).expect("json");
        assert_eq!(first, second);
    }

    #[test]
    fn display_lists_resources() {
        let text = stack().plan().to_string();
        assert!(text.starts_with("stack dev (2 resources)"));
        assert!(text.contains("+ server (aws:ec2:Instance) [protected]"));
        assert!(text.contains("cidrBlock = \"10.0.0.0/16\""));
    }
}
