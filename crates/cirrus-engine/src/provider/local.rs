//! Deterministic in-process provider.
//!
//! [`LocalProvider`] provisions nothing real. It echoes inputs back as
//! outputs and synthesizes `id`, `arn`, `name`, `urn` plus every attribute
//! other resources reference. Every synthesized value is derived from a
//! SHA-256 digest of the stack, type, name and attribute, so two applies of
//! the same stack produce byte-identical outputs. Lookups are answered the
//! same way from the region, function and arguments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cirrus_common::types::Attributes;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{DeleteRequest, InvokeRequest, Provider, ProviderError, ProvisionRequest};

/// Simulated provider for previews, demos and tests.
#[derive(Debug, Default)]
pub struct LocalProvider {
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    deleted: Mutex<Vec<String>>,
}

impl LocalProvider {
    /// Creates a provider that accepts every resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes provisioning of `resource` fail with `reason`.
    #[must_use]
    pub fn with_failure(mut self, resource: impl Into<String>, reason: impl Into<String>) -> Self {
        let _ = self.failures.insert(resource.into(), reason.into());
        self
    }

    /// Sleeps for `delay` before answering each request.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Names of deleted resources, in deletion order.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    fn outputs(request: &ProvisionRequest) -> Attributes {
        let mut outputs = request.inputs.clone();
        let base = digest(&[
            request.stack.as_str(),
            request.resource_type.as_str(),
            request.name.as_str(),
        ]);
        let short = &base[..8];
        let kind = request.resource_type.kind().to_ascii_lowercase();
        let id = format!("{}-{}", id_prefix(&kind), &base[..17]);
        let arn = format!(
            "arn:{}:{}:{}:000000000000:{kind}/{id}",
            request.resource_type.provider(),
            service(request.resource_type.as_str()),
            request.region,
        );

        let _ = outputs
            .entry("name".to_string())
            .or_insert_with(|| Value::String(format!("{}-{short}", request.name)));
        let _ = outputs.insert(
            "urn".to_string(),
            Value::String(format!(
                "urn:cirrus:{}::{}::{}",
                request.stack, request.resource_type, request.name
            )),
        );
        let _ = outputs.insert("arn".to_string(), Value::String(arn));
        let _ = outputs.insert("id".to_string(), Value::String(id));

        let seed = [
            request.stack.as_str(),
            request.resource_type.as_str(),
            request.name.as_str(),
        ];
        for attribute in &request.referenced_attributes {
            if outputs.contains_key(attribute) {
                continue;
            }
            let value = synthesize(&seed, &request.name, &request.region, attribute);
            let _ = outputs.insert(attribute.clone(), value);
        }
        outputs
    }

    /// The result does not depend on the stack: the same call anywhere
    /// reads the same data.
    fn lookup(request: &InvokeRequest) -> Attributes {
        let arguments = serde_json::to_string(&request.arguments).unwrap_or_default();
        let seed = [
            request.region.as_str(),
            request.function.as_str(),
            arguments.as_str(),
        ];
        let base = digest(&seed);
        let kind = request.function.kind();
        let subject = kind.strip_prefix("get").unwrap_or(kind).to_ascii_lowercase();

        let mut outputs = request.arguments.clone();
        let _ = outputs.insert(
            "id".to_string(),
            Value::String(format!("{}-{}", id_prefix(&subject), &base[..17])),
        );
        for attribute in &request.referenced_attributes {
            if outputs.contains_key(attribute) {
                continue;
            }
            let value = synthesize(&seed, &request.name, &request.region, attribute);
            let _ = outputs.insert(attribute.clone(), value);
        }
        outputs
    }

    fn injected_failure(&self, name: &str, kind: &str) -> Result<(), ProviderError> {
        match self.failures.get(name) {
            Some(reason) => {
                tracing::debug!(resource = %name, %reason, "injected failure");
                Err(ProviderError::Rejected {
                    resource: name.to_string(),
                    resource_type: kind.to_string(),
                    reason: reason.clone(),
                })
            }
            None => Ok(()),
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0_u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn id_prefix(kind: &str) -> String {
    let prefix: String = kind.chars().filter(char::is_ascii_alphanumeric).take(4).collect();
    if prefix.is_empty() { "res".to_string() } else { prefix }
}

fn service(resource_type: &str) -> &str {
    let segments: Vec<&str> = resource_type.split(':').collect();
    match segments.as_slice() {
        [_, service, _, ..] => *service,
        [provider, _] => *provider,
        _ => "local",
    }
}

fn synthesize(seed: &[&str], name: &str, region: &str, attribute: &str) -> Value {
    let mut parts = seed.to_vec();
    parts.push(attribute);
    let hash = digest(&parts);
    let short = &hash[..8];
    let lower = attribute.to_ascii_lowercase();
    let host = format!("{name}-{short}.{region}.cirrus.internal");

    if lower.ends_with("ip") {
        let octet = u8::from_str_radix(&hash[..2], 16).unwrap_or(0) % 254 + 1;
        json!(format!("203.0.113.{octet}"))
    } else if lower.ends_with("ids") {
        let stem = attribute.trim_end_matches("Ids").trim_end_matches("ids");
        json!([format!("{stem}-{short}")])
    } else if lower.contains("dns") || lower.contains("hostname") || lower.ends_with("endpoint") {
        json!(host)
    } else if lower.ends_with("url") || lower.ends_with("uri") {
        json!(format!("{host}/{name}"))
    } else if lower.ends_with("arn") {
        json!(format!("arn:local:{region}:{name}:{attribute}/{short}"))
    } else if lower.ends_with("id") {
        json!(format!("{}-{}", id_prefix(&lower), &hash[..17]))
    } else {
        json!(format!("{name}-{attribute}-{short}"))
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<Attributes, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.injected_failure(&request.name, request.resource_type.as_str())?;
        let outputs = Self::outputs(request);
        tracing::debug!(
            resource = %request.name,
            r#type = %request.resource_type,
            outputs = outputs.len(),
            "resource provisioned"
        );
        Ok(outputs)
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<(), ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        tracing::debug!(resource = %request.name, "resource deleted");
        self.deleted.lock().await.push(request.name.clone());
        Ok(())
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<Attributes, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.injected_failure(&request.name, request.function.as_str())?;
        let outputs = Self::lookup(request);
        tracing::debug!(lookup = %request.name, function = %request.function, "lookup answered");
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use cirrus_common::types::ResourceType;

    use super::*;

    fn request(name: &str, referenced: &[&str]) -> ProvisionRequest {
        ProvisionRequest {
            stack: "dev".into(),
            region: "us-west-2".into(),
            name: name.into(),
            resource_type: ResourceType::parse("aws:ec2:Instance").expect("type"),
            inputs: Attributes::from([("instanceType".to_string(), json!("t3.micro"))]),
            referenced_attributes: referenced.iter().map(|s| (*s).to_string()).collect(),
            protect: false,
        }
    }

    #[tokio::test]
    async fn outputs_echo_inputs_and_add_identity() {
        let outputs = LocalProvider::new()
            .provision(&request("server", &[]))
            .await
            .expect("provision");
        assert_eq!(outputs["instanceType"], json!("t3.micro"));
        assert!(outputs["id"].as_str().expect("id").starts_with("inst-"));
        assert!(outputs["arn"].as_str().expect("arn").starts_with("arn:aws:ec2:us-west-2:"));
        assert_eq!(outputs["urn"], json!("urn:cirrus:dev::aws:ec2:Instance::server"));
        assert!(outputs["name"].as_str().expect("name").starts_with("server-"));
    }

    #[tokio::test]
    async fn referenced_attributes_are_synthesized() {
        let outputs = LocalProvider::new()
            .provision(&request("server", &["publicIp", "publicDns", "securityGroupIds", "repositoryUrl", "zoneId"]))
            .await
            .expect("provision");
        assert!(outputs["publicIp"].as_str().expect("ip").starts_with("203.0.113."));
        assert!(outputs["publicDns"].as_str().expect("dns").ends_with(".us-west-2.cirrus.internal"));
        assert_eq!(outputs["securityGroupIds"].as_array().expect("ids").len(), 1);
        assert!(outputs["repositoryUrl"].as_str().expect("url").ends_with("/server"));
        assert!(outputs["zoneId"].as_str().expect("zone").starts_with("zone-"));
    }

    #[tokio::test]
    async fn outputs_are_deterministic() {
        let provider = LocalProvider::new();
        let first = provider.provision(&request("db", &["endpoint"])).await.expect("first");
        let second = provider.provision(&request("db", &["endpoint"])).await.expect("second");
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
        let other = provider.provision(&request("cache", &["endpoint"])).await.expect("other");
        assert_ne!(first["id"], other["id"]);
    }

    #[tokio::test]
    async fn injected_failure_is_reported() {
        let provider = LocalProvider::new().with_failure("server", "capacity unavailable");
        let err = provider.provision(&request("server", &[])).await.unwrap_err();
        assert!(err.to_string().contains("capacity unavailable"), "got: {err}");
    }

    fn ami_lookup(name: &str, owner: &str) -> InvokeRequest {
        InvokeRequest {
            stack: "dev".into(),
            region: "us-west-2".into(),
            name: name.into(),
            function: ResourceType::parse("aws:ec2:getAmi").expect("function"),
            arguments: Attributes::from([("owner".to_string(), json!(owner))]),
            referenced_attributes: vec!["id".into(), "imageLocation".into()],
        }
    }

    #[tokio::test]
    async fn lookups_depend_on_arguments_only() {
        let provider = LocalProvider::new();
        let first = provider.invoke(&ami_lookup("ami", "amazon")).await.expect("invoke");
        let renamed = provider.invoke(&ami_lookup("image", "amazon")).await.expect("invoke");
        let other = provider.invoke(&ami_lookup("ami", "canonical")).await.expect("invoke");

        assert!(first["id"].as_str().expect("id").starts_with("ami-"), "got: {}", first["id"]);
        assert_eq!(first["owner"], json!("amazon"));
        assert!(first.contains_key("imageLocation"));
        assert_eq!(first["id"], renamed["id"]);
        assert_ne!(first["id"], other["id"]);
        assert!(provider.deleted().await.is_empty());
    }

    #[tokio::test]
    async fn deletes_are_recorded() {
        let provider = LocalProvider::new();
        let req = DeleteRequest {
            stack: "dev".into(),
            name: "server".into(),
            resource_type: ResourceType::parse("aws:ec2:Instance").expect("type"),
            outputs: Attributes::new(),
        };
        provider.delete(&req).await.expect("delete");
        assert_eq!(provider.deleted().await, vec!["server"]);
    }
}
