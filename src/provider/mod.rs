//! Provider boundary.
//!
//! The engine treats providers as opaque: it sends resolved attributes and
//! receives provider-assigned identifiers and exported attributes. Providers
//! never retry on their own; retry policy lives in the executor.

mod http;
mod sandbox;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ConfigError, ProviderError, Result};
use crate::model::Value;
use crate::registry::Registry;

pub use http::HttpProvider;
pub use sandbox::{Fault, SandboxCall, SandboxProvider};

/// Attribute map sent to and returned by providers.
pub type Attributes = BTreeMap<String, Value>;

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Exported attributes.
    pub exported: Attributes,
}

/// Operations the engine invokes per resource type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates an object from resolved attributes.
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Created, ProviderError>;

    /// Applies in-place changes; a `Null` value unsets the attribute.
    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changes: &Attributes,
    ) -> std::result::Result<Attributes, ProviderError>;

    /// Destroys an object.
    async fn destroy(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<(), ProviderError>;

    /// Reads the current attributes of an object.
    async fn read(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<Attributes, ProviderError>;

    /// Whether an in-flight call may be dropped without corrupting the object.
    fn supports_cancellation(&self) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Builds the provider named by the configuration.
///
/// # Errors
///
/// Returns an error if the HTTP endpoint or token is missing, or the sandbox
/// file cannot be loaded.
pub async fn from_config(config: &ProviderConfig, registry: &Registry) -> Result<Arc<dyn Provider>> {
    match config.kind {
        ProviderKind::Sandbox => {
            let provider = match &config.path {
                Some(path) => SandboxProvider::open(registry.clone(), path).await?,
                None => SandboxProvider::new(registry.clone()),
            };
            info!("Using sandbox provider");
            Ok(Arc::new(provider))
        }
        ProviderKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| ConfigError::invalid("provider.endpoint is required", "provider.endpoint"))?;
            let token = match &config.token_env {
                Some(name) => Some(std::env::var(name).map_err(|_| ConfigError::MissingEnvVar {
                    name: name.clone(),
                })?),
                None => None,
            };
            info!("Using HTTP provider at {endpoint}");
            Ok(Arc::new(HttpProvider::new(endpoint, token, config.timeout())?))
        }
    }
}
