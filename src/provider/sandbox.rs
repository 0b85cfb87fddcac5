//! Sandbox provider.
//!
//! An in-memory cloud used for local dry runs and tests. Objects get
//! `{id_prefix}-{hex}` identifiers and export every attribute their type
//! descriptor lists. The object table can be persisted to a JSON file so
//! consecutive CLI runs see the same objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{FatalKind, ProviderError, Result, StateError};
use crate::model::Value;
use crate::registry::{ID_ATTRIBUTE, Registry};

use super::{Attributes, Created, Provider};

/// Length of the hex suffix of generated ids.
const ID_SUFFIX_LEN: usize = 17;

/// A stored sandbox object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxObject {
    /// Resource type.
    pub resource_type: String,
    /// Input attributes.
    pub attributes: Attributes,
    /// Exported attributes.
    pub exported: Attributes,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCall {
    /// Operation name (`create`, `update`, `destroy`, `read`).
    pub operation: &'static str,
    /// Resource type.
    pub resource_type: String,
    /// Object id; for creates, the id that was assigned.
    pub provider_id: Option<String>,
}

/// An injected failure.
#[derive(Debug, Clone)]
pub struct Fault {
    resource_type: String,
    operation: &'static str,
    attribute: Option<(String, Value)>,
    error: ProviderError,
    remaining: Option<u32>,
}

impl Fault {
    /// Fails every `operation` on `resource_type` with `error`.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, operation: &'static str, error: ProviderError) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation,
            attribute: None,
            error,
            remaining: None,
        }
    }

    /// Only fails calls whose attributes contain `name = value`.
    #[must_use]
    pub fn when_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute = Some((name.into(), value.into()));
        self
    }

    /// Fails at most `times` calls.
    #[must_use]
    pub const fn times(mut self, times: u32) -> Self {
        self.remaining = Some(times);
        self
    }

    fn matches(&self, resource_type: &str, operation: &str, attributes: Option<&Attributes>) -> bool {
        if self.resource_type != resource_type || self.operation != operation {
            return false;
        }
        if self.remaining == Some(0) {
            return false;
        }
        match (&self.attribute, attributes) {
            (None, _) => true,
            (Some((name, value)), Some(attrs)) => attrs.get(name) == Some(value),
            (Some(_), None) => false,
        }
    }
}

/// In-memory provider.
#[derive(Debug)]
pub struct SandboxProvider {
    registry: Registry,
    objects: Mutex<BTreeMap<String, SandboxObject>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<SandboxCall>>,
    latency: Option<Duration>,
    cancellable: bool,
    path: Option<PathBuf>,
}

impl SandboxProvider {
    /// Creates an empty sandbox.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            latency: None,
            cancellable: true,
            path: None,
        }
    }

    /// Opens a sandbox persisted at `path`, loading existing objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(registry: Registry, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut sandbox = Self::new(registry);

        if path.exists() {
            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| StateError::storage(format!("Failed to read sandbox file: {e}")))?;
            let objects: BTreeMap<String, SandboxObject> = serde_json::from_str(&content)
                .map_err(|e| StateError::Corrupted {
                    message: format!("Failed to parse sandbox file: {e}"),
                })?;
            debug!("Loaded {} sandbox objects from {}", objects.len(), path.display());
            sandbox.objects = Mutex::new(objects);
        }

        sandbox.path = Some(path);
        Ok(sandbox)
    }

    /// Adds latency to every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sets whether in-flight calls may be abandoned on cancellation.
    #[must_use]
    pub const fn with_cancellation(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    /// Injects a failure.
    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.push(fault);
    }

    /// Returns the calls made so far.
    pub async fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().await.clone()
    }

    /// Returns a stored object.
    pub async fn object(&self, provider_id: &str) -> Option<SandboxObject> {
        self.objects.lock().await.get(provider_id).cloned()
    }

    /// Number of live objects.
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Overwrites an exported attribute out of band, simulating drift.
    pub async fn tamper(&self, provider_id: &str, attribute: &str, value: Value) {
        if let Some(object) = self.objects.lock().await.get_mut(provider_id) {
            object.exported.insert(attribute.to_string(), value);
        }
    }

    /// Removes an object out of band, simulating drift.
    pub async fn forget(&self, provider_id: &str) {
        self.objects.lock().await.remove(provider_id);
    }

    async fn enter(
        &self,
        operation: &'static str,
        resource_type: &str,
        attributes: Option<&Attributes>,
    ) -> std::result::Result<(), ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock().await;
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.matches(resource_type, operation, attributes))
        {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            trace!("Injected fault on {operation} {resource_type}");
            return Err(fault.error.clone());
        }
        Ok(())
    }

    async fn record(&self, operation: &'static str, resource_type: &str, provider_id: Option<&str>) {
        self.calls.lock().await.push(SandboxCall {
            operation,
            resource_type: resource_type.to_string(),
            provider_id: provider_id.map(String::from),
        });
    }

    async fn persist(&self, objects: &BTreeMap<String, SandboxObject>) -> std::result::Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(objects)
            .map_err(|e| ProviderError::fatal(FatalKind::Other, format!("sandbox: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::fatal(FatalKind::Other, format!("sandbox: {e}")))?;
        }
        fs::write(path, content)
            .await
            .map_err(|e| ProviderError::fatal(FatalKind::Other, format!("sandbox: {e}")))
    }

    fn exports(&self, resource_type: &str, provider_id: &str, attributes: &Attributes) -> Attributes {
        let Some(descriptor) = self.registry.get(resource_type) else {
            return Attributes::new();
        };
        descriptor
            .exports
            .iter()
            .map(|name| {
                let value = match name.as_str() {
                    ID_ATTRIBUTE => Value::from(provider_id),
                    "arn" => Value::from(format!("arn:sandbox:{resource_type}:{provider_id}")),
                    _ => attributes
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Value::from(format!("{provider_id}/{name}"))),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl Provider for SandboxProvider {
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Created, ProviderError> {
        self.enter("create", resource_type, Some(attributes)).await?;

        let Some(descriptor) = self.registry.get(resource_type) else {
            return Err(ProviderError::fatal(
                FatalKind::InvalidParameter,
                format!("unsupported resource type {resource_type}"),
            ));
        };
        let hex = Uuid::new_v4().simple().to_string();
        let provider_id = format!("{}-{}", descriptor.id_prefix, &hex[..ID_SUFFIX_LEN]);
        let exported = self.exports(resource_type, &provider_id, attributes);

        let mut objects = self.objects.lock().await;
        objects.insert(
            provider_id.clone(),
            SandboxObject {
                resource_type: resource_type.to_string(),
                attributes: attributes.clone(),
                exported: exported.clone(),
            },
        );
        self.persist(&objects).await?;
        drop(objects);

        self.record("create", resource_type, Some(&provider_id)).await;
        Ok(Created { provider_id, exported })
    }

    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changes: &Attributes,
    ) -> std::result::Result<Attributes, ProviderError> {
        self.enter("update", resource_type, Some(changes)).await?;

        let mut objects = self.objects.lock().await;
        let Some(object) = objects.get_mut(provider_id) else {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            });
        };

        for (name, value) in changes {
            if *value == Value::Null {
                object.attributes.remove(name);
            } else {
                object.attributes.insert(name.clone(), value.clone());
            }
        }
        let refreshed = self.exports(resource_type, provider_id, &object.attributes);
        for (name, value) in refreshed {
            if changes.contains_key(&name) || !object.exported.contains_key(&name) {
                object.exported.insert(name, value);
            }
        }
        let exported = object.exported.clone();
        self.persist(&objects).await?;
        drop(objects);

        self.record("update", resource_type, Some(provider_id)).await;
        Ok(exported)
    }

    async fn destroy(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        self.enter("destroy", resource_type, None).await?;

        let mut objects = self.objects.lock().await;
        if objects.remove(provider_id).is_none() {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            });
        }
        self.persist(&objects).await?;
        drop(objects);

        self.record("destroy", resource_type, Some(provider_id)).await;
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<Attributes, ProviderError> {
        self.enter("read", resource_type, None).await?;

        let objects = self.objects.lock().await;
        let object = objects.get(provider_id).ok_or_else(|| ProviderError::NotFound {
            provider_id: provider_id.to_string(),
        })?;

        let mut observed = object.attributes.clone();
        observed.extend(object.exported.clone());
        Ok(observed)
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellable
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}
