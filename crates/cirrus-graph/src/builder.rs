//! Resource graph construction.
//!
//! [`StackBuilder`] accepts declarations in any order. Inputs may refer to
//! resources that are declared later through [`StackBuilder::reference`];
//! every reference is checked when [`StackBuilder::build`] turns the
//! declarations into a validated [`Stack`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cirrus_common::config::StackConfig;
use cirrus_common::error::{CirrusError, Result};
use cirrus_common::types::{AttributeName, ResourceName, ResourceType};
use serde_json::Value;

use crate::graph::DependencyGraph;
use crate::output::{Output, Reference, ResolutionError};
use crate::resource::{Declaration, DeclarationKind, Input, ResourceHandle, ResourceSpec};
use crate::slot::ResourceSlot;
use crate::stack::{Stack, StackOutput};

/// Collects resource declarations for one stack.
#[derive(Debug)]
pub struct StackBuilder {
    config: StackConfig,
    declarations: Vec<Declaration>,
    index: HashMap<String, usize>,
    slots: HashMap<String, Arc<ResourceSlot>>,
    exports: Vec<(AttributeName, Input)>,
}

impl StackBuilder {
    /// Starts an empty stack with the given configuration.
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            declarations: Vec::new(),
            index: HashMap::new(),
            slots: HashMap::new(),
            exports: Vec::new(),
        }
    }

    /// Returns the stack configuration.
    pub const fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Number of declared resources.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns `true` if nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declares a resource and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MalformedName`] for an invalid name, type or
    /// input key, and [`CirrusError::DuplicateResource`] if the name is
    /// already taken.
    pub fn declare(&mut self, spec: ResourceSpec) -> Result<ResourceHandle> {
        let name = ResourceName::parse(spec.name)?;
        let resource_type = ResourceType::parse(spec.resource_type)?;
        if self.index.contains_key(name.as_str()) {
            return Err(CirrusError::DuplicateResource {
                name: name.to_string(),
            });
        }
        if spec.kind == DeclarationKind::Lookup && spec.options.protect {
            return Err(CirrusError::Config {
                message: format!("lookup `{name}` creates nothing and cannot be protected"),
            });
        }

        let mut inputs = std::collections::BTreeMap::new();
        let mut references = BTreeSet::new();
        for (key, input) in spec.inputs {
            let key = AttributeName::parse(key)?;
            input.collect_references(&mut references);
            let _ = inputs.insert(key, input);
        }

        let slot = self.slot_for(name.as_str());
        tracing::debug!(
            resource = %name,
            r#type = %resource_type,
            kind = ?spec.kind,
            references = references.len(),
            "resource declared"
        );

        let _ = self.index.insert(name.to_string(), self.declarations.len());
        self.declarations.push(Declaration {
            name: name.clone(),
            resource_type: resource_type.clone(),
            kind: spec.kind,
            inputs,
            options: spec.options,
            references,
        });
        Ok(ResourceHandle::new(name, resource_type, slot))
    }

    /// Deferred value of `attribute` on the resource named `resource`.
    ///
    /// The resource may be declared later; an undeclared name is reported
    /// by [`build`](Self::build).
    pub fn reference(&mut self, resource: &str, attribute: &str) -> Output<Value> {
        Output::from_slot(self.slot_for(resource), attribute.to_string())
    }

    /// Publishes a named stack output.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already exported.
    pub fn export(&mut self, name: &str, value: impl Into<Input>) -> Result<()> {
        let name = AttributeName::parse(name)?;
        if self.exports.iter().any(|(existing, _)| *existing == name) {
            return Err(CirrusError::Config {
                message: format!("stack output `{name}` is exported twice"),
            });
        }
        self.exports.push((name, value.into()));
        Ok(())
    }

    fn slot_for(&mut self, name: &str) -> Arc<ResourceSlot> {
        Arc::clone(
            self.slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ResourceSlot::new(name))),
        )
    }

    /// A reference is valid only if it reads the slot this builder holds for
    /// a declared resource; a same-named resource from another builder is
    /// not declared here.
    fn check_reference(&self, reference: &Reference, referenced_by: &str) -> Result<()> {
        let own_slot = self
            .slots
            .get(&reference.resource)
            .is_some_and(|slot| slot.id() == reference.slot());
        if !self.index.contains_key(&reference.resource) || !own_slot {
            return Err(CirrusError::UndeclaredResource {
                name: reference.resource.clone(),
                referenced_by: referenced_by.to_string(),
            });
        }
        let _ = AttributeName::parse(reference.attribute.as_str())?;
        Ok(())
    }

    /// Validates every reference, reifies the dependency graph and checks
    /// it for cycles.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::UndeclaredResource`] for a reference or
    /// `depends_on` entry naming an undeclared resource,
    /// [`CirrusError::MalformedName`] for a malformed attribute reference,
    /// and [`CirrusError::Cycle`] if the dependencies are cyclic.
    pub fn build(self) -> Result<Stack> {
        let mut graph = DependencyGraph::new();
        for declaration in &self.declarations {
            let _ = graph.add_resource(declaration.name.as_str());
        }

        for declaration in &self.declarations {
            let dependent = declaration.name.as_str();
            for reference in &declaration.references {
                self.check_reference(reference, dependent)?;
                graph.add_dependency(dependent, &reference.resource);
            }
            for dependency in &declaration.options.depends_on {
                if !self.index.contains_key(dependency) {
                    return Err(CirrusError::UndeclaredResource {
                        name: dependency.clone(),
                        referenced_by: dependent.to_string(),
                    });
                }
                graph.add_dependency(dependent, dependency);
            }
        }

        for (name, value) in &self.exports {
            let referenced_by = format!("output {name}");
            for reference in value.references() {
                self.check_reference(&reference, &referenced_by)?;
            }
        }

        let order = graph.resolve_order()?;

        // Only values chained with `then` can still read these.
        for (name, slot) in &self.slots {
            if !self.index.contains_key(name) {
                tracing::debug!(resource = %name, "failing slot of undeclared resource");
                let _ = slot.fail(ResolutionError::Undeclared {
                    resource: name.clone(),
                });
            }
        }
        tracing::info!(
            stack = %self.config.stack,
            resources = graph.node_count(),
            edges = graph.edge_count(),
            "resource graph built"
        );

        let outputs = self
            .exports
            .into_iter()
            .map(|(name, value)| StackOutput::new(name, value))
            .collect();
        Ok(Stack::new(
            self.config,
            self.declarations,
            self.index,
            self.slots,
            graph,
            order,
            outputs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use cirrus_common::types::ResourceState;

    use super::*;

    fn builder() -> StackBuilder {
        StackBuilder::new(StackConfig::new("web", "dev"))
    }

    #[test]
    fn declare_returns_pending_handle() {
        let mut b = builder();
        let vpc = b
            .declare(ResourceSpec::new("vpc", "aws:ec2:Vpc").input("cidrBlock", "10.0.0.0/16"))
            .expect("declare");
        assert_eq!(vpc.name().as_str(), "vpc");
        assert_eq!(vpc.resource_type().kind(), "Vpc");
        assert_eq!(vpc.state(), ResourceState::Pending);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = builder();
        let _ = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("first");
        let err = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).unwrap_err();
        assert!(matches!(err, CirrusError::DuplicateResource { ref name } if name == "vpc"));
    }

    #[test]
    fn malformed_names_and_types_are_rejected() {
        let mut b = builder();
        assert!(b.declare(ResourceSpec::new("bad name", "aws:ec2:Vpc")).is_err());
        assert!(b.declare(ResourceSpec::new("vpc", "Vpc")).is_err());
        assert!(
            b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc").input("cidr-block", "x"))
                .is_err()
        );
        assert!(b.is_empty());
    }

    #[test]
    fn references_become_edges() {
        let mut b = builder();
        let vpc = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("vpc");
        let _ = b
            .declare(ResourceSpec::new("subnet", "aws:ec2:Subnet").input("vpcId", vpc.id()))
            .expect("subnet");
        let _ = b
            .declare(
                ResourceSpec::new("sg", "aws:ec2:SecurityGroup")
                    .input("vpcId", vpc.id())
                    .input("name", vpc.output("tags").lookup(&["Name"])),
            )
            .expect("sg");

        let stack = b.build().expect("build");
        assert_eq!(stack.edge_count(), 2);
        assert_eq!(stack.order()[0].as_str(), "vpc");
        assert_eq!(stack.dependencies("sg"), vec!["vpc"]);
    }

    #[test]
    fn forward_reference_resolves_at_build() {
        let mut b = builder();
        let zone_id = b.reference("zone", "zoneId");
        let _ = b
            .declare(ResourceSpec::new("record", "aws:route53:Record").input("zoneId", zone_id))
            .expect("record");
        let _ = b
            .declare(ResourceSpec::new("zone", "aws:route53:Zone").input("name", "example.com"))
            .expect("zone");

        let stack = b.build().expect("build");
        let order: Vec<&str> = stack.order().iter().map(ResourceName::as_str).collect();
        assert_eq!(order, vec!["zone", "record"]);
    }

    #[test]
    fn undeclared_reference_is_a_construction_error() {
        let mut b = builder();
        let ghost = b.reference("ghost", "id");
        let _ = b
            .declare(ResourceSpec::new("subnet", "aws:ec2:Subnet").input("vpcId", ghost))
            .expect("declare");

        let err = b.build().unwrap_err();
        assert!(err.is_construction_error());
        assert!(
            matches!(err, CirrusError::UndeclaredResource { ref name, ref referenced_by }
                if name == "ghost" && referenced_by == "subnet")
        );
    }

    #[test]
    fn undeclared_slot_reached_through_then_is_failed() {
        let mut b = builder();
        let _ = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("vpc");
        let ghost = b.reference("ghost", "id");
        let deferred = Output::known(Value::from(1)).then(move |_| ghost);
        let stack = b.build().expect("build");

        assert!(stack.is_pristine());
        let err = deferred.peek().expect("settled").unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Undeclared {
                resource: "ghost".into()
            }
        );
    }

    #[test]
    fn handle_from_another_builder_is_undeclared() {
        let mut other = builder();
        let foreign_vpc = other.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("vpc");

        let mut b = builder();
        let _ = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("vpc");
        let _ = b
            .declare(ResourceSpec::new("subnet", "aws:ec2:Subnet").input("vpcId", foreign_vpc.id()))
            .expect("subnet");

        let err = b.build().unwrap_err();
        assert!(
            matches!(err, CirrusError::UndeclaredResource { ref name, ref referenced_by }
                if name == "vpc" && referenced_by == "subnet")
        );
    }

    #[test]
    fn undeclared_depends_on_is_rejected() {
        let mut b = builder();
        let _ = b
            .declare(ResourceSpec::new("app", "aws:ecs:Service").depends_on_name("listener"))
            .expect("declare");
        assert!(matches!(b.build(), Err(CirrusError::UndeclaredResource { .. })));
    }

    #[test]
    fn malformed_attribute_reference_is_rejected() {
        let mut b = builder();
        let vpc = b.declare(ResourceSpec::new("vpc", "aws:ec2:Vpc")).expect("vpc");
        let _ = b
            .declare(ResourceSpec::new("subnet", "aws:ec2:Subnet").input("vpcId", vpc.output("")))
            .expect("subnet");
        assert!(matches!(b.build(), Err(CirrusError::MalformedName { .. })));
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let mut b = builder();
        let b_id = b.reference("b", "id");
        let a = b
            .declare(ResourceSpec::new("a", "test:res:Node").input("peer", b_id))
            .expect("a");
        let _ = b
            .declare(ResourceSpec::new("b", "test:res:Node").input("peer", a.id()))
            .expect("b");

        let err = b.build().unwrap_err();
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut b = builder();
        let me = b.reference("me", "id");
        let _ = b
            .declare(ResourceSpec::new("me", "test:res:Node").input("self", me))
            .expect("declare");
        assert!(matches!(b.build(), Err(CirrusError::Cycle { .. })));
    }

    #[test]
    fn exports_are_validated() {
        let mut b = builder();
        let ghost = b.reference("ghost", "ip");
        b.export("ip", ghost).expect("export");
        let err = b.build().unwrap_err();
        assert!(
            matches!(err, CirrusError::UndeclaredResource { ref referenced_by, .. }
                if referenced_by == "output ip")
        );
    }

    #[test]
    fn duplicate_exports_are_rejected() {
        let mut b = builder();
        b.export("url", "http://example.com").expect("first");
        assert!(b.export("url", "http://example.org").is_err());
    }
}
