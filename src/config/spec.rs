//! Configuration specification types.
//!
//! This module defines the structs that map to the `landform.yaml` file.
//! Resource declarations are kept close to their YAML form here and turned
//! into the resource model by [`LandformConfig::to_resource_set`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::model::{LifecyclePolicy, Resource, ResourceId, ResourceSet, Value};
use crate::registry::{Registry, TypeDescriptor};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LandformConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Executor tuning.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Additional resource type descriptors.
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
    /// Resource declarations.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider implementation.
    #[serde(default)]
    pub kind: ProviderKind,
    /// File the sandbox provider persists its objects to.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Endpoint of the HTTP provider.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the HTTP bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-memory sandbox.
    #[default]
    Sandbox,
    /// REST provider endpoint.
    Http,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum number of concurrent provider calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum provider calls per step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound of a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// A resource declaration as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDecl {
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Name, unique within the type.
    pub name: String,
    /// Explicit dependencies (`type.name`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
    /// Declared attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            path: None,
            endpoint: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ProviderConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Upper bound of a single delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ResourceDecl {
    /// Identity of the declared resource.
    ///
    /// # Errors
    ///
    /// Returns an error message if the type or name is not a valid identifier.
    pub fn id(&self) -> std::result::Result<ResourceId, String> {
        ResourceId::try_new(&self.resource_type, &self.name)
    }
}

impl LandformConfig {
    /// Builds the registry: the built-in types plus the declared ones.
    #[must_use]
    pub fn registry(&self) -> Registry {
        let mut registry = Registry::builtin();
        for descriptor in &self.types {
            registry.register(descriptor.clone());
        }
        registry
    }

    /// Converts the declarations into the resource model.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed identities or duplicate declarations.
    pub fn to_resource_set(&self) -> Result<ResourceSet> {
        let mut set = ResourceSet::new();

        for decl in &self.resources {
            let id = decl.id().map_err(|message| ConfigError::invalid(message, "resources"))?;

            let mut resource = Resource::new(id.clone()).with_lifecycle(decl.lifecycle);
            for dep in &decl.depends_on {
                let target: ResourceId = dep
                    .parse()
                    .map_err(|message: String| ConfigError::invalid(message, format!("{id}.depends_on")))?;
                resource = resource.with_depends_on(target);
            }
            resource.attributes.clone_from(&decl.attributes);

            set.insert(resource)?;
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LandformError, ValidationError};

    #[test]
    fn test_defaults() {
        let config: LandformConfig = serde_yaml::from_str("project:\n  name: net\n").unwrap();

        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.kind, ProviderKind::Sandbox);
        assert_eq!(config.provider.timeout(), Duration::from_secs(30));
        assert_eq!(config.executor.concurrency, 4);
        assert_eq!(config.executor.retry.max_attempts, 5);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_to_resource_set_parses_references() {
        let yaml = r#"
project:
  name: net
resources:
  - type: aws_vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
  - type: aws_subnet
    name: public
    depends_on: [aws_vpc.main]
    lifecycle:
      create_before_destroy: true
    attributes:
      vpc_id: "${aws_vpc.main.id}"
      cidr_block: 10.0.1.0/24
"#;
        let config: LandformConfig = serde_yaml::from_str(yaml).unwrap();
        let set = config.to_resource_set().unwrap();

        let subnet = set.get(&"aws_subnet.public".parse().unwrap()).unwrap();
        assert!(subnet.lifecycle.create_before_destroy);
        assert_eq!(
            subnet.attributes["vpc_id"],
            Value::reference("aws_vpc.main".parse().unwrap(), "id")
        );
        assert_eq!(subnet.depends_on.len(), 1);
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let yaml = r"
project:
  name: net
resources:
  - type: aws_vpc
    name: main
  - type: aws_vpc
    name: main
";
        let config: LandformConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.to_resource_set(),
            Err(LandformError::Validation(ValidationError::DuplicateResource { .. }))
        ));
    }

    #[test]
    fn test_declared_types_extend_registry() {
        let yaml = r"
project:
  name: net
types:
  - name: acme_bucket
    id_prefix: bkt
    updatable: [tags]
    exports: [arn]
";
        let config: LandformConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = config.registry();

        let descriptor = registry.get("acme_bucket").unwrap();
        assert!(descriptor.exports("arn"));
        assert!(descriptor.exports("id"));
        assert!(registry.contains("aws_vpc"));
    }
}
