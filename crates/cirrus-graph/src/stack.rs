//! The validated resource graph.

use std::collections::HashMap;
use std::sync::Arc;

use cirrus_common::config::StackConfig;
use cirrus_common::types::{AttributeName, Attributes, ResourceName, ResourceState};
use serde_json::Value;

use crate::graph::DependencyGraph;
use crate::output::Output;
use crate::plan::Plan;
use crate::resource::{Declaration, Input};
use crate::slot::ResourceSlot;

/// A named value exported by the stack.
#[derive(Debug, Clone)]
pub struct StackOutput {
    name: AttributeName,
    input: Input,
    value: Output<Value>,
}

impl StackOutput {
    pub(crate) fn new(name: AttributeName, input: Input) -> Self {
        let value = input.to_output();
        Self { name, input, value }
    }

    /// Returns the output name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the declared value.
    pub const fn input(&self) -> &Input {
        &self.input
    }

    /// Returns the memoized deferred value.
    pub const fn value(&self) -> &Output<Value> {
        &self.value
    }
}

/// An acyclic, fully validated resource graph ready to be applied.
///
/// A stack's slots are single-use: once applied, each resource keeps its
/// outcome. Build the stack again to apply it a second time.
#[derive(Debug)]
pub struct Stack {
    config: StackConfig,
    declarations: Vec<Declaration>,
    index: HashMap<String, usize>,
    slots: HashMap<String, Arc<ResourceSlot>>,
    graph: DependencyGraph,
    order: Vec<ResourceName>,
    outputs: Vec<StackOutput>,
}

impl Stack {
    pub(crate) fn new(
        config: StackConfig,
        declarations: Vec<Declaration>,
        index: HashMap<String, usize>,
        slots: HashMap<String, Arc<ResourceSlot>>,
        graph: DependencyGraph,
        order: Vec<String>,
        outputs: Vec<StackOutput>,
    ) -> Self {
        let order = order
            .into_iter()
            .filter_map(|name| index.get(&name).map(|&i| declarations[i].name.clone()))
            .collect();
        Self {
            config,
            declarations,
            index,
            slots,
            graph,
            order,
            outputs,
        }
    }

    /// Returns the stack instance name.
    pub fn name(&self) -> &str {
        &self.config.stack
    }

    /// Returns the stack configuration.
    pub const fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns `true` if the stack has no resources.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declarations in declaration order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Looks up a declaration by name.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.index.get(name).map(|&i| &self.declarations[i])
    }

    /// Resources in dependency order, ties broken by declaration order.
    pub fn order(&self) -> &[ResourceName] {
        &self.order
    }

    /// Order in which resources are torn down.
    pub fn destroy_order(&self) -> Vec<ResourceName> {
        self.order.iter().rev().cloned().collect()
    }

    /// Number of distinct dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.graph.dependencies(name)
    }

    /// Direct dependents of `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.graph.dependents(name)
    }

    /// Everything that directly or transitively depends on `name`.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        self.graph.transitive_dependents(name)
    }

    /// Publication slot of a resource.
    pub fn slot(&self, name: &str) -> Option<&Arc<ResourceSlot>> {
        self.slots.get(name)
    }

    /// Every slot, including ones only reachable through references.
    pub fn slots(&self) -> impl Iterator<Item = &Arc<ResourceSlot>> {
        self.slots.values()
    }

    /// Current resolution state of a resource.
    pub fn state(&self, name: &str) -> Option<ResourceState> {
        self.slot(name).map(|slot| slot.state())
    }

    /// Returns `true` while no declared resource has been published.
    pub fn is_pristine(&self) -> bool {
        self.declarations
            .iter()
            .filter_map(|d| self.slots.get(d.name.as_str()))
            .all(|slot| !slot.is_settled())
    }

    /// Output attributes that other resources or stack outputs read from `name`.
    pub fn referenced_attributes(&self, name: &str) -> Vec<String> {
        let Some(declaration) = self.declaration(name) else {
            return Vec::new();
        };
        let mut attributes: Vec<String> = declaration
            .referenced_attributes(&self.declarations)
            .map(str::to_string)
            .chain(self.outputs.iter().flat_map(|o| {
                o.input
                    .references()
                    .into_iter()
                    .filter(|r| r.resource == name)
                    .map(|r| r.attribute)
            }))
            .collect();
        attributes.sort();
        attributes.dedup();
        attributes
    }

    /// Completes with the resolved inputs of `name` once every input and
    /// every `depends_on` resource has resolved.
    pub fn readiness(&self, name: &str) -> Option<Output<Attributes>> {
        let declaration = self.declaration(name)?;
        let ordering: Vec<Output<Value>> = declaration
            .options
            .depends_on
            .iter()
            .filter_map(|dependency| self.slots.get(dependency))
            .map(|slot| Output::after(Arc::clone(slot)))
            .collect();
        let inputs = declaration.resolved_inputs();
        Some(Output::all(ordering).zip(&inputs).map(|(_, inputs)| inputs))
    }

    /// Stack outputs in declaration order.
    pub fn outputs(&self) -> &[StackOutput] {
        &self.outputs
    }

    /// Deterministic preview of what applying the stack would do.
    pub fn plan(&self) -> Plan {
        Plan::from_stack(self)
    }

    /// Renders the dependency graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        self.graph.to_dot()
    }
}

#[cfg(test)]
mod tests {
    use cirrus_common::config::StackConfig;
    use serde_json::json;

    use super::*;
    use crate::builder::StackBuilder;
    use crate::resource::ResourceSpec;

    fn web_stack() -> Stack {
        let mut b = StackBuilder::new(StackConfig::new("web", "dev"));
        let vpc = b
            .declare(ResourceSpec::new("vpc", "aws:ec2:Vpc").input("cidrBlock", "10.0.0.0/16"))
            .expect("vpc");
        let subnet = b
            .declare(ResourceSpec::new("subnet", "aws:ec2:Subnet").input("vpcId", vpc.id()))
            .expect("subnet");
        let server = b
            .declare(
                ResourceSpec::new("server", "aws:ec2:Instance")
                    .input("subnetId", subnet.id())
                    .depends_on(&vpc),
            )
            .expect("server");
        b.export("hostname", server.output("publicDns")).expect("export");
        b.build().expect("build")
    }

    #[test]
    fn order_and_edges() {
        let stack = web_stack();
        let order: Vec<&str> = stack.order().iter().map(ResourceName::as_str).collect();
        assert_eq!(order, vec!["vpc", "subnet", "server"]);
        assert_eq!(stack.edge_count(), 3);
        assert_eq!(stack.dependents("vpc"), vec!["subnet", "server"]);
        assert_eq!(stack.transitive_dependents("subnet"), vec!["server"]);
        let destroy: Vec<String> = stack.destroy_order().iter().map(ToString::to_string).collect();
        assert_eq!(destroy, vec!["server", "subnet", "vpc"]);
    }

    #[test]
    fn fresh_stack_is_pristine() {
        let stack = web_stack();
        assert!(stack.is_pristine());
        assert_eq!(stack.state("server"), Some(ResourceState::Pending));
        assert_eq!(stack.state("nope"), None);
    }

    #[test]
    fn referenced_attributes_include_exports() {
        let stack = web_stack();
        assert_eq!(stack.referenced_attributes("vpc"), vec!["id"]);
        assert_eq!(stack.referenced_attributes("server"), vec!["publicDns"]);
        assert!(stack.referenced_attributes("missing").is_empty());
    }

    #[tokio::test]
    async fn readiness_waits_for_inputs_and_depends_on() {
        let stack = web_stack();
        let ready = stack.readiness("server").expect("declared");
        assert_eq!(ready.peek(), None);

        let publish = |name: &str, attrs: Value| {
            let Value::Object(map) = attrs else {
                panic!("object expected")
            };
            stack
                .slot(name)
                .expect("slot")
                .resolve(map.into_iter().collect())
                .expect("publish");
        };
        publish("subnet", json!({ "id": "subnet-1" }));
        assert_eq!(ready.peek(), None, "vpc is still pending");
        publish("vpc", json!({ "id": "vpc-1" }));

        let inputs = ready.resolve().await.expect("ready");
        assert_eq!(inputs.get("subnetId"), Some(&json!("subnet-1")));
        assert!(!stack.is_pristine());
    }

    #[test]
    fn dot_contains_every_resource() {
        let dot = web_stack().to_dot();
        for name in ["vpc", "subnet", "server"] {
            assert!(dot.contains(name), "{name} missing");
        }
    }
}
