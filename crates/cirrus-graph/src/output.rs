//! Deferred output values.
//!
//! An [`Output<T>`] is a value that only becomes known once some resource
//! has been provisioned. Outputs compose before they resolve: [`Output::map`],
//! [`Output::then`], [`Output::all`] and [`interpolate!`](crate::interpolate)
//! all return new outputs without polling anything. Resolution happens when
//! the engine publishes resource outputs into their slots; every derived
//! output is memoized, so it resolves at most once no matter how many
//! consumers await it.
//!
//! Each output also records the set of [`Reference`]s it was built from.
//! That set is what turns input wiring into dependency edges.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::slot::{ResourceSlot, SlotId};

/// Values that can flow through an [`Output`].
///
/// Any type that is `Clone + Send + Sync + 'static` qualifies.
pub trait OutputValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> OutputValue for T {}

/// Permanent failure of a deferred value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// The provider reported that the resource could not be provisioned.
    #[error("resource `{resource}` failed to provision: {reason}")]
    ProvisionFailed {
        /// Resource that failed.
        resource: String,
        /// Provider-supplied reason.
        reason: String,
    },

    /// A resource this value depends on failed.
    #[error(
        "resource `{resource}` depends on failed resource `{root}` ({}): {reason}",
        .chain.join(" -> ")
    )]
    DependencyFailed {
        /// Resource whose resolution was abandoned.
        resource: String,
        /// Resource where the failure originated.
        root: String,
        /// Dependency chain from the root to `resource`, inclusive.
        chain: Vec<String>,
        /// Reason reported for the root failure.
        reason: String,
    },

    /// The resource resolved but did not expose the requested attribute.
    #[error("resource `{resource}` has no output attribute `{attribute}`")]
    MissingAttribute {
        /// Resource that was read.
        resource: String,
        /// Attribute (or attribute path) that was requested.
        attribute: String,
    },

    /// Resolution was aborted before the resource settled.
    #[error("resolution of `{resource}` was cancelled")]
    Cancelled {
        /// Resource that never settled.
        resource: String,
    },

    /// A value chained with [`Output::then`] read a resource that is not
    /// declared in the stack.
    #[error("resource `{resource}` is not declared in this stack")]
    Undeclared {
        /// Name that was read.
        resource: String,
    },

    /// Every remaining resource waits on another one that can never resolve.
    #[error("resource `{resource}` can never resolve: {} wait on each other", .waiting.join(", "))]
    Stalled {
        /// Resource that was waiting.
        resource: String,
        /// Resources left waiting when the run stalled, in stack order.
        waiting: Vec<String>,
    },
}

impl ResolutionError {
    /// Returns the resource this error is reported for.
    pub fn resource(&self) -> &str {
        match self {
            Self::ProvisionFailed { resource, .. }
            | Self::DependencyFailed { resource, .. }
            | Self::MissingAttribute { resource, .. }
            | Self::Cancelled { resource }
            | Self::Undeclared { resource }
            | Self::Stalled { resource, .. } => resource,
        }
    }

    /// Returns the resource where the failure originated.
    pub fn root(&self) -> &str {
        match self {
            Self::DependencyFailed { root, .. } => root,
            other => other.resource(),
        }
    }

    /// Returns the dependency chain from the root to the reporting resource.
    pub fn chain(&self) -> Vec<String> {
        match self {
            Self::DependencyFailed { chain, .. } => chain.clone(),
            other => vec![other.resource().to_string()],
        }
    }

    /// Returns `true` if this error stems from cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Re-reports this error on behalf of `dependent`.
    ///
    /// Cancellation stays cancellation; every other failure becomes
    /// [`ResolutionError::DependencyFailed`] with `dependent` appended to
    /// the chain.
    #[must_use]
    pub fn propagate(&self, dependent: &str) -> Self {
        match self {
            Self::Cancelled { .. } => Self::Cancelled {
                resource: dependent.to_string(),
            },
            Self::DependencyFailed {
                resource,
                root,
                chain,
                reason,
            } => {
                if resource == dependent {
                    return self.clone();
                }
                let mut chain = chain.clone();
                chain.push(dependent.to_string());
                Self::DependencyFailed {
                    resource: dependent.to_string(),
                    root: root.clone(),
                    chain,
                    reason: reason.clone(),
                }
            }
            Self::ProvisionFailed { resource, reason } => Self::DependencyFailed {
                resource: dependent.to_string(),
                root: resource.clone(),
                chain: vec![resource.clone(), dependent.to_string()],
                reason: reason.clone(),
            },
            Self::MissingAttribute {
                resource,
                attribute,
            } => Self::DependencyFailed {
                resource: dependent.to_string(),
                root: resource.clone(),
                chain: vec![resource.clone(), dependent.to_string()],
                reason: format!("no output attribute `{attribute}`"),
            },
            Self::Undeclared { resource } | Self::Stalled { resource, .. } => {
                if resource == dependent {
                    return self.clone();
                }
                Self::DependencyFailed {
                    resource: dependent.to_string(),
                    root: resource.clone(),
                    chain: vec![resource.clone(), dependent.to_string()],
                    reason: self.to_string(),
                }
            }
        }
    }
}

/// Outcome of resolving a deferred value.
pub type Resolution<T> = Result<T, ResolutionError>;

/// A (resource, output attribute) pair a deferred value was derived from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced resource name.
    pub resource: String,
    /// Referenced output attribute.
    pub attribute: String,
    #[serde(skip)]
    slot: SlotId,
}

impl Reference {
    /// Identity of the slot the reference reads from.
    pub const fn slot(&self) -> SlotId {
        self.slot
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// A lazily resolved, memoized value.
///
/// Cloning an output is cheap and every clone observes the same result.
#[derive(Clone)]
pub struct Output<T: OutputValue> {
    references: Arc<BTreeSet<Reference>>,
    future: Shared<BoxFuture<'static, Resolution<T>>>,
}

impl<T: OutputValue> Output<T> {
    fn from_parts(
        references: BTreeSet<Reference>,
        future: impl Future<Output = Resolution<T>> + Send + 'static,
    ) -> Self {
        Self {
            references: Arc::new(references),
            future: future.boxed().shared(),
        }
    }

    /// Creates an output that is already known.
    pub fn known(value: T) -> Self {
        Self::from_parts(BTreeSet::new(), futures::future::ready(Ok(value)))
    }

    /// Creates an output that has already failed.
    pub fn failed(error: ResolutionError) -> Self {
        Self::from_parts(BTreeSet::new(), futures::future::ready(Err(error)))
    }

    /// Returns the references this output was derived from.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter()
    }

    /// Returns the names of the resources this output depends on.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references.iter().map(|r| r.resource.clone()).collect()
    }

    /// Returns `true` if the output depends on no resource.
    pub fn is_independent(&self) -> bool {
        self.references.is_empty()
    }

    /// Transforms the value once it is known.
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: OutputValue,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let upstream = self.future.clone();
        Output::from_parts(self.references.as_ref().clone(), async move {
            upstream.await.map(f)
        })
    }

    /// Transforms the value with a fallible function.
    pub fn try_map<U, F>(&self, f: F) -> Output<U>
    where
        U: OutputValue,
        F: FnOnce(T) -> Resolution<U> + Send + 'static,
    {
        let upstream = self.future.clone();
        Output::from_parts(self.references.as_ref().clone(), async move {
            upstream.await.and_then(f)
        })
    }

    /// Chains another deferred value computed from this one.
    ///
    /// References of the output returned by `f` are only discovered at
    /// resolution time; they do not add dependency edges.
    pub fn then<U, F>(&self, f: F) -> Output<U>
    where
        U: OutputValue,
        F: FnOnce(T) -> Output<U> + Send + 'static,
    {
        let upstream = self.future.clone();
        Output::from_parts(self.references.as_ref().clone(), async move {
            let value = upstream.await?;
            f(value).future.await
        })
    }

    /// Pairs this output with another.
    pub fn zip<U: OutputValue>(&self, other: &Output<U>) -> Output<(T, U)> {
        let left = self.future.clone();
        let right = other.future.clone();
        let mut references = self.references.as_ref().clone();
        references.extend(other.references.iter().cloned());
        Output::from_parts(references, async move {
            let (left, right) = futures::future::join(left, right).await;
            Ok((left?, right?))
        })
    }

    /// Combines many outputs into one output of all their values.
    ///
    /// If several inputs fail, the error of the first one in input order
    /// is reported, so the outcome does not depend on completion order.
    pub fn all(outputs: impl IntoIterator<Item = Self>) -> Output<Vec<T>> {
        let mut references = BTreeSet::new();
        let futures: Vec<_> = outputs
            .into_iter()
            .map(|output| {
                references.extend(output.references.iter().cloned());
                output.future
            })
            .collect();
        Output::from_parts(references, async move {
            futures::future::join_all(futures)
                .await
                .into_iter()
                .collect::<Resolution<Vec<T>>>()
        })
    }

    /// Waits for the value.
    ///
    /// # Errors
    ///
    /// Returns the permanent failure of this value or of anything it
    /// was derived from.
    pub async fn resolve(&self) -> Resolution<T> {
        self.future.clone().await
    }

    /// Returns the value if it can be produced without waiting.
    pub fn peek(&self) -> Option<Resolution<T>> {
        self.future.clone().now_or_never()
    }
}

impl Output<Value> {
    /// Output attribute `attribute` of the resource behind `slot`.
    pub(crate) fn from_slot(slot: Arc<ResourceSlot>, attribute: String) -> Self {
        let reference = Reference {
            resource: slot.name().to_string(),
            attribute: attribute.clone(),
            slot: slot.id(),
        };
        Self::from_parts(BTreeSet::from([reference]), async move {
            let attributes = slot.wait().await?;
            attributes
                .get(&attribute)
                .cloned()
                .ok_or_else(|| ResolutionError::MissingAttribute {
                    resource: slot.name().to_string(),
                    attribute,
                })
        })
    }

    /// Completes with `null` once the resource behind `slot` has resolved.
    ///
    /// Used for explicit `depends_on` ordering; records no reference.
    pub(crate) fn after(slot: Arc<ResourceSlot>) -> Self {
        Self::from_parts(BTreeSet::new(), async move {
            let _ = slot.wait().await?;
            Ok(Value::Null)
        })
    }

    /// Navigates into a structured value (`loadBalancer` then `arn`).
    ///
    /// Numeric segments index into arrays. A missing path is blamed on the
    /// referenced attribute when the value reads exactly one, and on
    /// `<value>` otherwise.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Self {
        let path: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();
        let origin = match self.references.len() {
            1 => self.references.iter().next().cloned(),
            _ => None,
        };
        self.try_map(move |value| {
            lookup_path(&value, &path).ok_or_else(|| {
                let (resource, attribute) = origin.map_or_else(
                    || (String::from("<value>"), path.join(".")),
                    |r| (r.resource, format!("{}.{}", r.attribute, path.join("."))),
                );
                ResolutionError::MissingAttribute {
                    resource,
                    attribute,
                }
            })
        })
    }

    /// Renders the value as a string for interpolation.
    pub fn as_string(&self) -> Output<String> {
        self.map(|value| value_to_string(&value))
    }
}

impl<T: OutputValue> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let references: Vec<String> = self.references.iter().map(ToString::to_string).collect();
        f.debug_struct("Output")
            .field("references", &references)
            .field("settled", &self.future.peek().is_some())
            .finish()
    }
}

fn lookup_path(value: &Value, path: &[String]) -> Option<Value> {
    path.iter()
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
}

/// Renders a JSON value the way string interpolation embeds it.
///
/// Strings are embedded without quotes and `null` renders as nothing.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Concatenates string outputs into one deferred string.
pub fn concat(parts: impl IntoIterator<Item = Output<String>>) -> Output<String> {
    Output::all(parts).map(|parts| parts.concat())
}

/// Conversion into a string output, used by [`interpolate!`](crate::interpolate).
pub trait IntoStringOutput {
    /// Converts `self` into an `Output<String>`.
    fn into_string_output(self) -> Output<String>;
}

impl IntoStringOutput for &str {
    fn into_string_output(self) -> Output<String> {
        Output::known(self.to_string())
    }
}

impl IntoStringOutput for String {
    fn into_string_output(self) -> Output<String> {
        Output::known(self)
    }
}

impl IntoStringOutput for Output<String> {
    fn into_string_output(self) -> Output<String> {
        self
    }
}

impl IntoStringOutput for &Output<String> {
    fn into_string_output(self) -> Output<String> {
        self.clone()
    }
}

impl IntoStringOutput for Output<Value> {
    fn into_string_output(self) -> Output<String> {
        self.as_string()
    }
}

impl IntoStringOutput for &Output<Value> {
    fn into_string_output(self) -> Output<String> {
        self.as_string()
    }
}

/// Builds a deferred string from literal and deferred parts.
///
/// ```
/// use cirrus_graph::{interpolate, Output};
///
/// let host = Output::known(serde_json::json!("host.example.com"));
/// let url = interpolate!["http://", &host, "/health"];
/// assert_eq!(url.peek(), Some(Ok("http://host.example.com/health".to_string())));
/// ```
#[macro_export]
macro_rules! interpolate {
    ($($part:expr),* $(,)?) => {
        $crate::output::concat([
            $($crate::output::IntoStringOutput::into_string_output($part)),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::slot::ResourceSlot;

    fn slot(name: &str) -> Arc<ResourceSlot> {
        Arc::new(ResourceSlot::new(name))
    }

    fn resolved(name: &str, attrs: Value) -> Arc<ResourceSlot> {
        let slot = slot(name);
        let Value::Object(map) = attrs else {
            panic!("attributes must be an object");
        };
        slot.resolve(map.into_iter().collect()).expect("publish");
        slot
    }

    #[test]
    fn known_output_peeks_immediately() {
        let out = Output::known(41).map(|v| v + 1);
        assert_eq!(out.peek(), Some(Ok(42)));
        assert!(out.is_independent());
    }

    #[tokio::test]
    async fn interpolation_waits_for_pending_reference() {
        let server = slot("server");
        let dns = Output::from_slot(server.clone(), "publicDns".into());
        let url = interpolate!["http://", &dns];

        assert_eq!(url.peek(), None, "must stay unresolved while pending");
        assert_eq!(url.dependencies(), BTreeSet::from(["server".to_string()]));

        server
            .resolve([("publicDns".to_string(), json!("host.example.com"))].into())
            .expect("publish");
        assert_eq!(url.resolve().await, Ok("http://host.example.com".to_string()));
    }

    #[tokio::test]
    async fn composing_two_references_needs_both() {
        let a = slot("a");
        let b = slot("b");
        let joined = interpolate![
            Output::from_slot(a.clone(), "host".into()),
            ":",
            Output::from_slot(b.clone(), "port".into()),
        ];
        assert_eq!(joined.dependencies().len(), 2);

        a.resolve([("host".to_string(), json!("db.internal"))].into())
            .expect("publish a");
        assert_eq!(joined.peek(), None, "b is still pending");

        b.resolve([("port".to_string(), json!(5432))].into())
            .expect("publish b");
        assert_eq!(joined.resolve().await, Ok("db.internal:5432".to_string()));
    }

    #[tokio::test]
    async fn failure_flows_through_map_and_all() {
        let bad = slot("bad");
        let good = resolved("good", json!({ "id": "g-1" }));
        let combined = Output::all([
            Output::from_slot(good, "id".into()),
            Output::from_slot(bad.clone(), "id".into()).map(|v| v),
        ]);

        bad.fail(ResolutionError::ProvisionFailed {
            resource: "bad".into(),
            reason: "quota exceeded".into(),
        })
        .expect("publish");

        let err = combined.resolve().await.unwrap_err();
        assert_eq!(err.root(), "bad");
    }

    #[tokio::test]
    async fn missing_attribute_is_reported() {
        let vpc = resolved("vpc", json!({ "id": "vpc-1" }));
        let err = Output::from_slot(vpc, "arn".into())
            .resolve()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::MissingAttribute {
                resource: "vpc".into(),
                attribute: "arn".into(),
            }
        );
    }

    #[tokio::test]
    async fn lookup_navigates_objects_and_arrays() {
        let alb = resolved(
            "alb",
            json!({ "loadBalancer": { "arn": "arn:lb/1" }, "subnets": ["s-0", "s-1"] }),
        );
        let arn = Output::from_slot(alb.clone(), "loadBalancer".into()).lookup(&["arn"]);
        let second = Output::from_slot(alb.clone(), "subnets".into()).lookup(&["1"]);
        let missing = Output::from_slot(alb, "loadBalancer".into()).lookup(&["dnsName"]);

        assert_eq!(arn.resolve().await, Ok(json!("arn:lb/1")));
        assert_eq!(second.resolve().await, Ok(json!("s-1")));
        let err = missing.resolve().await.unwrap_err();
        assert!(err.to_string().contains("loadBalancer.dnsName"), "got: {err}");
    }

    #[tokio::test]
    async fn lookup_on_combined_value_blames_no_single_resource() {
        let a = resolved("a", json!({ "host": "db.internal" }));
        let b = resolved("b", json!({ "port": 5432 }));
        let combined = Output::all([
            Output::from_slot(a, "host".into()),
            Output::from_slot(b, "port".into()),
        ])
        .map(|values| json!({ "endpoint": values }));

        let err = combined.lookup(&["address"]).resolve().await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::MissingAttribute {
                resource: "<value>".into(),
                attribute: "address".into(),
            }
        );
    }

    #[tokio::test]
    async fn then_chains_deferred_values() {
        let zone = resolved("zone", json!({ "zoneId": "Z123" }));
        let chained = Output::known(json!("ignored"))
            .then(move |_| Output::from_slot(zone, "zoneId".into()));
        assert_eq!(chained.resolve().await, Ok(json!("Z123")));
    }

    #[test]
    fn zip_merges_references() {
        let a = Output::from_slot(slot("a"), "x".into());
        let b = Output::from_slot(slot("b"), "y".into());
        let zipped = a.zip(&b);
        let refs: Vec<String> = zipped.references().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["a.x", "b.y"]);
    }

    #[test]
    fn propagate_extends_chain() {
        let root = ResolutionError::ProvisionFailed {
            resource: "b".into(),
            reason: "boom".into(),
        };
        let at_c = root.propagate("c");
        let at_d = at_c.propagate("d");
        assert_eq!(at_d.root(), "b");
        assert_eq!(at_d.chain(), vec!["b", "c", "d"]);
        assert_eq!(at_d.resource(), "d");
        assert!(at_d.to_string().contains("b -> c -> d"), "got: {at_d}");
        assert_eq!(at_d.propagate("d"), at_d);
    }

    #[test]
    fn undeclared_root_propagates_as_dependency_failure() {
        let err = ResolutionError::Undeclared {
            resource: "ghost".into(),
        }
        .propagate("a");
        assert_eq!(err.root(), "ghost");
        assert_eq!(err.chain(), vec!["ghost", "a"]);
        assert!(err.to_string().contains("not declared"), "got: {err}");
    }

    #[test]
    fn cancellation_propagates_as_cancellation() {
        let err = ResolutionError::Cancelled {
            resource: "a".into(),
        }
        .propagate("b");
        assert!(err.is_cancelled());
        assert_eq!(err.resource(), "b");
    }

    #[test]
    fn value_to_string_unquotes_strings() {
        assert_eq!(value_to_string(&json!("x")), "x");
        assert_eq!(value_to_string(&json!(80)), "80");
        assert_eq!(value_to_string(&Value::Null), "");
    }
}
