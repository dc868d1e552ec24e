//! Integration tests for the apply engine.
//!
//! These tests drive whole stacks through a scripted provider:
//! 1. Partial failure (failed subtrees, independent branches)
//! 2. At-most-once publication under concurrency
//! 3. Cancellation
//! 4. Idempotence of resolved values
//! 5. Stack outputs and interpolation
//! 6. Values chained to resources outside the graph
//! 7. Provider lookups
//! 8. Destroy and persisted state

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cirrus_common::config::StackConfig;
use cirrus_common::types::{Attributes, ResourceState};
use cirrus_engine::provider::{DeleteRequest, ProvisionRequest};
use cirrus_engine::{Engine, LocalProvider, Provider, ProviderError, StackState};
use cirrus_graph::{Output, ResolutionError, ResourceSpec, Stack, StackBuilder, interpolate};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Provider whose behaviour is scripted per resource.
#[derive(Default)]
struct ScriptedProvider {
    outputs: HashMap<String, Attributes>,
    failures: HashSet<String>,
    blocking: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    blocked: Notify,
}

impl ScriptedProvider {
    fn with_outputs(mut self, resource: &str, outputs: Value) -> Self {
        let Value::Object(map) = outputs else {
            panic!("outputs must be an object");
        };
        let _ = self.outputs.insert(resource.to_string(), map.into_iter().collect());
        self
    }

    fn failing(mut self, resource: &str) -> Self {
        let _ = self.failures.insert(resource.to_string());
        self
    }

    fn blocking(mut self, resource: &str) -> Self {
        let _ = self.blocking.insert(resource.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self, resource: &str) -> usize {
        self.calls.lock().unwrap().get(resource).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<Attributes, ProviderError> {
        *self.calls.lock().unwrap().entry(request.name.clone()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak.fetch_max(now, Ordering::SeqCst);

        if self.blocking.contains(&request.name) {
            self.blocked.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures.contains(&request.name) {
            return Err(ProviderError::Rejected {
                resource: request.name.clone(),
                resource_type: request.resource_type.to_string(),
                reason: "scripted failure".into(),
            });
        }
        let mut outputs = request.inputs.clone();
        let _ = outputs.insert("id".into(), json!(format!("{}-id", request.name)));
        if let Some(extra) = self.outputs.get(&request.name) {
            outputs.extend(extra.clone());
        }
        Ok(outputs)
    }

    async fn delete(&self, _request: &DeleteRequest) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn config() -> StackConfig {
    StackConfig::new("web", "dev")
}

/// Two branches: `b -> c -> d` and `e -> f`.
fn branches() -> Stack {
    let mut builder = StackBuilder::new(config());
    let b = builder.declare(ResourceSpec::new("b", "test:res:Node")).expect("b");
    let c = builder
        .declare(ResourceSpec::new("c", "test:res:Node").input("parent", b.id()))
        .expect("c");
    let _ = builder
        .declare(ResourceSpec::new("d", "test:res:Node").input("parent", c.id()))
        .expect("d");
    let e = builder.declare(ResourceSpec::new("e", "test:res:Node")).expect("e");
    let _ = builder
        .declare(ResourceSpec::new("f", "test:res:Node").input("parent", e.id()))
        .expect("f");
    builder.build().expect("build")
}

// ── Partial failure ──────────────────────────────────────────────────

#[tokio::test]
async fn failure_reaches_only_its_subtree() {
    let stack = branches();
    let provider = Arc::new(ScriptedProvider::default().failing("b"));
    let report = Engine::new(provider.clone())
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");

    for name in ["b", "c", "d"] {
        assert_eq!(report.state(name), Some(ResourceState::Failed), "{name}");
        let error = report.resource(name).and_then(|r| r.error.as_ref()).expect("error");
        assert_eq!(error.root(), "b");
    }
    let d_error = report.resource("d").and_then(|r| r.error.clone()).expect("error");
    assert_eq!(d_error.chain(), vec!["b", "c", "d"]);
    assert!(d_error.to_string().contains("scripted failure"), "got: {d_error}");

    assert_eq!(report.state("e"), Some(ResourceState::Resolved));
    assert_eq!(report.state("f"), Some(ResourceState::Resolved));
    assert_eq!(report.resource("f").expect("f").outputs["parent"], json!("e-id"));

    assert_eq!(provider.calls("b"), 1);
    assert_eq!(provider.calls("c"), 0, "dependents of a failure are never provisioned");
    assert_eq!(provider.calls("d"), 0);
}

#[tokio::test]
async fn depends_on_failure_propagates() {
    let mut builder = StackBuilder::new(config());
    let gateway = builder.declare(ResourceSpec::new("gateway", "test:res:Node")).expect("gateway");
    let _ = builder
        .declare(ResourceSpec::new("server", "test:res:Node").depends_on(&gateway))
        .expect("server");
    let stack = builder.build().expect("build");

    let report = Engine::new(Arc::new(ScriptedProvider::default().failing("gateway")))
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");
    let error = report.resource("server").and_then(|r| r.error.clone()).expect("error");
    assert!(matches!(error, ResolutionError::DependencyFailed { ref root, .. } if root == "gateway"));
}

#[tokio::test]
async fn missing_attribute_fails_the_reader() {
    let mut builder = StackBuilder::new(config());
    let server = builder.declare(ResourceSpec::new("server", "test:res:Node")).expect("server");
    let _ = builder
        .declare(ResourceSpec::new("record", "test:res:Node").input("target", server.output("publicDns")))
        .expect("record");
    let stack = builder.build().expect("build");

    let report = Engine::new(Arc::new(ScriptedProvider::default()))
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");
    assert_eq!(report.state("server"), Some(ResourceState::Resolved));
    assert_eq!(report.state("record"), Some(ResourceState::Failed));
    let error = report.resource("record").and_then(|r| r.error.clone()).expect("error");
    assert!(error.to_string().contains("publicDns"), "got: {error}");
}

// ── At-most-once ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_resource_is_published_once() {
    let mut builder = StackBuilder::new(config());
    let root = builder.declare(ResourceSpec::new("root", "test:res:Node")).expect("root");
    let mut leaves = Vec::new();
    for i in 0..24 {
        let leaf = builder
            .declare(ResourceSpec::new(format!("leaf-{i}"), "test:res:Node").input("root", root.id()))
            .expect("leaf");
        leaves.push(leaf.id());
    }
    let _ = builder
        .declare(ResourceSpec::new("sink", "test:res:Node").input("leaves", leaves))
        .expect("sink");
    let stack = builder.build().expect("build");

    let provider = Arc::new(ScriptedProvider::default().with_delay(Duration::from_millis(5)));
    let report = Engine::new(provider.clone())
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");

    assert!(report.is_success());
    for declaration in stack.declarations() {
        let name = declaration.name.as_str();
        assert_eq!(stack.slot(name).expect("slot").publication_count(), 1, "{name}");
        assert_eq!(provider.calls(name), 1, "{name}");
    }
    assert_eq!(
        report.resource("sink").expect("sink").outputs["leaves"]
            .as_array()
            .expect("array")
            .len(),
        24
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_bounds_in_flight_provisioning() {
    let mut cfg = config();
    cfg.parallelism = 3;
    let mut builder = StackBuilder::new(cfg);
    for i in 0..12 {
        let _ = builder
            .declare(ResourceSpec::new(format!("node-{i}"), "test:res:Node"))
            .expect("node");
    }
    let stack = builder.build().expect("build");

    let provider = Arc::new(ScriptedProvider::default().with_delay(Duration::from_millis(10)));
    let report = Engine::new(provider.clone())
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");
    assert!(report.is_success());
    let peak = provider.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak in-flight was {peak}");
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_keeps_resolved_and_cancels_the_rest() {
    let mut builder = StackBuilder::new(config());
    let fast = builder.declare(ResourceSpec::new("fast", "test:res:Node")).expect("fast");
    let slow = builder
        .declare(ResourceSpec::new("slow", "test:res:Node").input("after", fast.id()))
        .expect("slow");
    let last = builder
        .declare(ResourceSpec::new("last", "test:res:Node").input("parent", slow.id()))
        .expect("last");
    builder.export("lastId", last.id()).expect("export");
    let stack = builder.build().expect("build");

    let provider = Arc::new(ScriptedProvider::default().blocking("slow"));
    let engine = Engine::new(provider.clone());
    let cancel = CancellationToken::new();

    let trigger = {
        let provider = Arc::clone(&provider);
        let cancel = cancel.clone();
        async move {
            provider.blocked.notified().await;
            cancel.cancel();
        }
    };
    let (report, ()) = tokio::join!(engine.apply(&stack, cancel.clone()), trigger);
    let report = report.expect("apply");

    assert!(report.cancelled);
    assert_eq!(report.state("fast"), Some(ResourceState::Resolved));
    assert_eq!(report.state("slow"), Some(ResourceState::Cancelled));
    assert_eq!(report.state("last"), Some(ResourceState::Cancelled));
    assert!(report.output_errors["lastId"].is_cancelled());
    assert!(stack.slots().all(|slot| slot.is_settled()), "no slot is left pending");
}

#[tokio::test]
async fn cancelled_before_start_provisions_nothing() {
    let stack = branches();
    let provider = Arc::new(ScriptedProvider::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Engine::new(provider.clone()).apply(&stack, cancel).await.expect("apply");
    assert_eq!(report.count(ResourceState::Cancelled), 5);
    assert_eq!(provider.calls("b") + provider.calls("e"), 0);
}

// ── Idempotence ──────────────────────────────────────────────────────

fn web(builder: &mut StackBuilder) {
    let vpc = builder
        .declare(ResourceSpec::new("vpc", "aws:ec2:Vpc").input("cidrBlock", "10.0.0.0/16"))
        .expect("vpc");
    let subnet = builder
        .declare(
            ResourceSpec::new("subnet", "aws:ec2:Subnet")
                .input("vpcId", vpc.id())
                .input("cidrBlock", "10.0.1.0/24"),
        )
        .expect("subnet");
    let server = builder
        .declare(ResourceSpec::new("server", "aws:ec2:Instance").input("subnetId", subnet.id()))
        .expect("server");
    builder.export("publicIp", server.output("publicIp")).expect("ip");
    builder
        .export("url", interpolate!["http://", server.output("publicDns")])
        .expect("url");
}

#[tokio::test]
async fn identical_declarations_resolve_identically() {
    let mut rendered = Vec::new();
    for _ in 0..2 {
        let mut builder = StackBuilder::new(config());
        web(&mut builder);
        let stack = builder.build().expect("build");
        let report = Engine::new(Arc::new(LocalProvider::new()))
            .apply(&stack, CancellationToken::new())
            .await
            .expect("apply");
        assert!(report.is_success());
        let resources: Vec<_> = report.resources.iter().map(|r| (&r.name, &r.outputs)).collect();
        rendered.push((
            serde_json::to_string(&report.outputs).expect("json"),
            serde_json::to_string(&resources).expect("json"),
        ));
    }
    assert_eq!(rendered[0], rendered[1]);
}

// ── Stack outputs ────────────────────────────────────────────────────

#[tokio::test]
async fn interpolated_output_resolves() {
    let mut builder = StackBuilder::new(config());
    let alb = builder.declare(ResourceSpec::new("alb", "aws:lb:LoadBalancer")).expect("alb");
    builder
        .export("url", interpolate!["http://", alb.output("dnsName")])
        .expect("export");
    builder.export("albId", alb.id()).expect("export");
    let stack = builder.build().expect("build");

    let provider = ScriptedProvider::default().with_outputs("alb", json!({ "dnsName": "host.example.com" }));
    let report = Engine::new(Arc::new(provider))
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");

    assert_eq!(report.outputs["url"], json!("http://host.example.com"));
    assert_eq!(report.outputs["albId"], json!("alb-id"));
    let keys: Vec<&String> = report.outputs.keys().collect();
    assert_eq!(keys, vec!["albId", "url"]);
}

// ── Chained values ───────────────────────────────────────────────────

async fn apply_within_deadline(stack: &Stack) -> cirrus_engine::ApplyReport {
    let engine = Engine::new(Arc::new(ScriptedProvider::default()));
    tokio::time::timeout(Duration::from_secs(5), engine.apply(stack, CancellationToken::new()))
        .await
        .expect("apply finishes")
        .expect("apply")
}

#[tokio::test]
async fn chained_read_of_undeclared_resource_fails() {
    let mut builder = StackBuilder::new(config());
    let ghost = builder.reference("ghost", "id");
    let deferred = Output::known(json!("seed")).then(move |_| ghost);
    let _ = builder
        .declare(ResourceSpec::new("a", "test:res:Node").input("x", deferred))
        .expect("a");
    let stack = builder.build().expect("build");

    let report = apply_within_deadline(&stack).await;
    assert_eq!(report.state("a"), Some(ResourceState::Failed));
    let error = report.resource("a").and_then(|r| r.error.clone()).expect("error");
    assert_eq!(error.root(), "ghost");
    assert!(error.to_string().contains("not declared"), "got: {error}");
}

#[tokio::test]
async fn chained_cycle_fails_both_sides() {
    let mut builder = StackBuilder::new(config());
    let b_id = builder.reference("b", "id");
    let deferred = Output::known(json!(1)).then(move |_| b_id);
    let a = builder
        .declare(ResourceSpec::new("a", "test:res:Node").input("x", deferred))
        .expect("a");
    let b = builder
        .declare(ResourceSpec::new("b", "test:res:Node").input("x", a.id()))
        .expect("b");
    builder.export("bId", b.id()).expect("export");
    let stack = builder.build().expect("build");

    let report = apply_within_deadline(&stack).await;
    for name in ["a", "b"] {
        assert_eq!(report.state(name), Some(ResourceState::Failed), "{name}");
        let error = report.resource(name).and_then(|r| r.error.clone()).expect("error");
        assert!(
            matches!(error, ResolutionError::Stalled { ref waiting, .. } if waiting == &["a", "b"]),
            "{name}: {error}"
        );
    }
    assert!(report.output_errors.contains_key("bId"));
    assert!(stack.slots().all(|slot| slot.is_settled()));
}

#[tokio::test]
async fn chained_read_of_foreign_resource_stalls_only_the_reader() {
    let mut other = StackBuilder::new(config());
    let foreign = other
        .declare(ResourceSpec::new("shared", "test:res:Node"))
        .expect("shared");
    let _unapplied = other.build().expect("build other");

    let mut builder = StackBuilder::new(config());
    let deferred = Output::known(json!(1)).then(move |_| foreign.id());
    let _ = builder
        .declare(ResourceSpec::new("reader", "test:res:Node").input("x", deferred))
        .expect("reader");
    let _ = builder.declare(ResourceSpec::new("solo", "test:res:Node")).expect("solo");
    let stack = builder.build().expect("build");

    let report = apply_within_deadline(&stack).await;
    assert_eq!(report.state("solo"), Some(ResourceState::Resolved));
    assert_eq!(report.state("reader"), Some(ResourceState::Failed));
    let error = report.resource("reader").and_then(|r| r.error.clone()).expect("error");
    assert!(
        matches!(error, ResolutionError::Stalled { ref waiting, .. } if waiting == &["reader"]),
        "got: {error}"
    );
}

// ── Lookups ──────────────────────────────────────────────────────────

fn with_ami_lookup() -> Stack {
    let mut builder = StackBuilder::new(config());
    let ami = builder
        .declare(ResourceSpec::lookup("ami", "aws:ec2:getAmi").input("owner", "amazon"))
        .expect("ami");
    let _ = builder
        .declare(ResourceSpec::new("server", "aws:ec2:Instance").input("imageId", ami.id()))
        .expect("server");
    builder.build().expect("build")
}

#[tokio::test]
async fn lookup_feeds_resource_and_is_never_destroyed() {
    let stack = with_ami_lookup();
    assert!(stack.plan().step("ami").expect("ami").lookup);

    let provider = Arc::new(LocalProvider::new());
    let engine = Engine::new(provider.clone());
    let report = engine.apply(&stack, CancellationToken::new()).await.expect("apply");
    assert!(report.is_success());
    let ami_id = report.resource("ami").expect("ami").outputs["id"].clone();
    assert!(ami_id.as_str().expect("id").starts_with("ami-"), "got: {ami_id}");
    assert_eq!(report.resource("server").expect("server").outputs["imageId"], ami_id);

    let mut state = StackState::from_report(&stack, &report);
    assert!(state.record("ami").is_none(), "lookups are not recorded");
    let destroyed = engine.destroy(&stack, &mut state, false).await.expect("destroy");
    assert_eq!(destroyed.deleted, vec!["server"]);
    assert!(destroyed.skipped.is_empty());
    assert_eq!(provider.deleted().await, vec!["server"]);
}

#[tokio::test]
async fn unsupported_lookup_fails_its_readers() {
    let stack = with_ami_lookup();
    let report = Engine::new(Arc::new(ScriptedProvider::default()))
        .apply(&stack, CancellationToken::new())
        .await
        .expect("apply");

    assert_eq!(report.state("ami"), Some(ResourceState::Failed));
    let error = report.resource("server").and_then(|r| r.error.clone()).expect("error");
    assert_eq!(error.root(), "ami");
    assert!(error.to_string().contains("aws:ec2:getAmi"), "got: {error}");
}

// ── Destroy and state ────────────────────────────────────────────────

#[tokio::test]
async fn state_roundtrip_then_destroy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = StackState::path(dir.path(), "dev");

    let mut builder = StackBuilder::new(config());
    web(&mut builder);
    let stack = builder.build().expect("build");
    let provider = Arc::new(LocalProvider::new());
    let engine = Engine::new(provider.clone());
    let report = engine.apply(&stack, CancellationToken::new()).await.expect("apply");

    StackState::from_report(&stack, &report).save(&path).expect("save");
    let mut state = StackState::load(&path).expect("load").expect("present");
    assert_eq!(state.run_id, report.run_id);
    assert_eq!(state.outputs, report.outputs);
    assert_eq!(state.provisioned().count(), 3);

    let destroyed = engine.destroy(&stack, &mut state, false).await.expect("destroy");
    assert!(destroyed.is_success());
    assert_eq!(provider.deleted().await, vec!["server", "subnet", "vpc"]);
    state.save(&path).expect("save");
    let reloaded = StackState::load(&path).expect("load").expect("present");
    assert!(reloaded.resources.is_empty());
}
