//! Execution of a single step.
//!
//! References are resolved against the records current at the time the step
//! runs, so a dependent sees the identifiers assigned earlier in the same run.
//! The record is only touched after the provider call returned.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{ActionFailed, FatalKind, ProviderError};
use crate::model::{Reference, Resource, ResourceId, ResourceSet};
use crate::planner::update_payload;
use crate::provider::{Attributes, Provider};
use crate::resolver::{Step, StepKind};
use crate::state::{StateRecord, StateSession};

use super::cancel::CancelToken;
use super::retry::{Interrupted, RetryPolicy};

/// Why a step did not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The action failed permanently.
    Failed(ActionFailed),
    /// The provider call succeeded but the state could not be persisted.
    Unrecorded {
        /// Provider calls made.
        attempts: u32,
        /// Persistence failure.
        message: String,
    },
    /// Not started because an earlier result could not be persisted.
    Halted,
    /// The run was cancelled.
    Cancelled,
}

/// Reason reported for steps skipped after a persistence failure.
pub(super) const HALTED: &str = "not started: state could not be persisted";

/// Shared context of the step tasks of one run.
pub struct StepRunner {
    provider: Arc<dyn Provider>,
    session: Arc<StateSession>,
    resources: Arc<ResourceSet>,
    policy: RetryPolicy,
    hasher: ConfigHasher,
}

impl StepRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        session: Arc<StateSession>,
        resources: Arc<ResourceSet>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            session,
            resources,
            policy,
            hasher: ConfigHasher::new(),
        }
    }

    /// Runs one step. Returns the number of provider calls made.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Failed`] if the provider call fails permanently,
    /// [`StepError::Unrecorded`] if the result could not be persisted, or
    /// [`StepError::Cancelled`] if the run was cancelled.
    pub async fn run(&self, step: &Step, cancel: &CancelToken) -> Result<u32, StepError> {
        debug!("Running step {step}");
        match step.kind {
            StepKind::Create | StepKind::CreateReplacement => self.create(step, cancel).await,
            StepKind::Update => self.update(step, cancel).await,
            StepKind::Destroy | StepKind::DestroyExisting | StepKind::DestroyDeposed => {
                self.destroy(step, cancel).await
            }
        }
    }

    fn failed(step: &Step, attempts: u32, cause: ProviderError) -> StepError {
        StepError::Failed(ActionFailed {
            resource: step.resource.to_string(),
            operation: step.kind.operation().to_string(),
            attempts,
            cause,
        })
    }

    fn declared(&self, step: &Step) -> Result<&Resource, StepError> {
        self.resources.get(&step.resource).ok_or_else(|| {
            Self::failed(
                step,
                0,
                ProviderError::fatal(FatalKind::Other, format!("{} is not declared", step.resource)),
            )
        })
    }

    /// Resolves every reference of `resource` against the current records.
    async fn resolve(&self, step: &Step, resource: &Resource) -> Result<Attributes, StepError> {
        let mut records: BTreeMap<ResourceId, StateRecord> = BTreeMap::new();
        for (_, reference) in resource.references() {
            if !records.contains_key(&reference.target)
                && let Some(record) = self.session.record(&reference.target).await
            {
                records.insert(reference.target.clone(), record);
            }
        }

        let lookup = |r: &Reference| records.get(&r.target).and_then(|rec| rec.lookup(&r.attribute)).cloned();

        resource
            .attributes
            .iter()
            .map(|(name, value)| {
                value
                    .resolve(&lookup)
                    .map(|resolved| (name.clone(), resolved))
                    .ok_or_else(|| {
                        Self::failed(
                            step,
                            0,
                            ProviderError::fatal(
                                FatalKind::InvalidParameter,
                                format!("attribute {name} has an unresolved reference"),
                            ),
                        )
                    })
            })
            .collect()
    }

    /// Runs a provider call under the retry policy, abandoning it on
    /// cancellation when the provider allows that.
    async fn call<T, F, Fut>(&self, step: &Step, cancel: &CancelToken, op: F) -> Result<(T, u32), StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let label = step.to_string();
        let attempt = self.policy.run(&label, cancel, op);

        let (result, attempts) = if self.provider.supports_cancellation() {
            let mut watcher = cancel.clone();
            tokio::select! {
                outcome = attempt => outcome,
                () = watcher.cancelled() => {
                    warn!("Abandoning in-flight {label}");
                    return Err(StepError::Cancelled);
                }
            }
        } else {
            attempt.await
        };

        match result {
            Ok(value) => Ok((value, attempts)),
            Err(Interrupted::Cancelled) => Err(StepError::Cancelled),
            Err(Interrupted::Failed(cause)) => Err(Self::failed(step, attempts, cause)),
        }
    }

    fn fill_record(&self, record: &mut StateRecord, resource: &Resource, attributes: Attributes) {
        record.attributes_hash = self.hasher.hash_attributes(&attributes);
        record.attributes = attributes;
        record.dependencies = resource.dependencies();
        record.lifecycle = resource.lifecycle;
        record.touch();
    }

    async fn create(&self, step: &Step, cancel: &CancelToken) -> Result<u32, StepError> {
        let resource = self.declared(step)?;
        let attributes = self.resolve(step, resource).await?;
        let resource_type = step.resource.resource_type.as_str();

        let (created, attempts) = self
            .call(step, cancel, || self.provider.create(resource_type, &attributes))
            .await?;

        let mut slot = self.session.lock(&step.resource).await;
        let mut record = StateRecord::new(step.resource.clone(), created.provider_id.clone());
        if let Some(previous) = slot.take() {
            record.deposed = previous.deposed;
            if step.kind == StepKind::CreateReplacement {
                record.deposed.push(previous.provider_id);
            }
        }
        record.exported = created.exported;
        self.fill_record(&mut record, resource, attributes);
        *slot = Some(record);
        drop(slot);

        info!("Created {} ({})", step.resource, created.provider_id);
        self.checkpoint(step, attempts).await?;
        Ok(attempts)
    }

    async fn update(&self, step: &Step, cancel: &CancelToken) -> Result<u32, StepError> {
        let resource = self.declared(step)?;
        let attributes = self.resolve(step, resource).await?;
        let current = self.session.record(&step.resource).await.ok_or_else(|| {
            Self::failed(
                step,
                0,
                ProviderError::fatal(FatalKind::Other, format!("{} has no record", step.resource)),
            )
        })?;

        let payload = update_payload(&attributes, &current.attributes);
        let (exported, attempts) = if payload.is_empty() {
            debug!("{} resolved to no changes, skipping provider call", step.resource);
            (Attributes::new(), 0)
        } else {
            let resource_type = step.resource.resource_type.as_str();
            let provider_id = current.provider_id.as_str();
            self.call(step, cancel, || {
                self.provider.update(resource_type, provider_id, &payload)
            })
            .await?
        };

        let mut slot = self.session.lock(&step.resource).await;
        let record = slot.get_or_insert(current);
        record.exported.extend(exported);
        self.fill_record(record, resource, attributes);
        drop(slot);

        info!("Updated {}", step.resource);
        self.checkpoint(step, attempts).await?;
        Ok(attempts)
    }

    async fn destroy(&self, step: &Step, cancel: &CancelToken) -> Result<u32, StepError> {
        let resource_type = step.resource.resource_type.as_str();
        let provider_id = match &step.provider_id {
            Some(id) => id.clone(),
            None => match self.session.record(&step.resource).await {
                Some(record) => record.provider_id,
                None => {
                    debug!("{} has no record, nothing to destroy", step.resource);
                    return Ok(0);
                }
            },
        };

        let provider = &self.provider;
        let target = provider_id.as_str();
        let ((), attempts) = self
            .call(step, cancel, move || async move {
                match provider.destroy(resource_type, target).await {
                    Err(ProviderError::NotFound { .. }) => {
                        debug!("{target} already gone");
                        Ok(())
                    }
                    other => other,
                }
            })
            .await?;

        let mut slot = self.session.lock(&step.resource).await;
        if step.kind == StepKind::DestroyDeposed {
            if let Some(record) = slot.as_mut() {
                record.deposed.retain(|id| *id != provider_id);
            }
        } else if slot.as_ref().is_some_and(|r| r.provider_id == provider_id) {
            *slot = None;
        }
        drop(slot);

        info!("Destroyed {} ({provider_id})", step.resource);
        self.checkpoint(step, attempts).await?;
        Ok(attempts)
    }

    async fn checkpoint(&self, step: &Step, attempts: u32) -> Result<(), StepError> {
        self.session.checkpoint().await.map(drop).map_err(|e| {
            error!("{step} applied but the state could not be persisted: {e}");
            StepError::Unrecorded {
                attempts,
                message: format!("applied at the provider, state not persisted: {e}"),
            }
        })
    }
}

/// Failure message of a step outcome, if any.
pub(super) fn summarize(result: &Result<u32, StepError>) -> Option<String> {
    match result {
        Ok(_) => None,
        Err(StepError::Failed(failure)) => Some(failure.to_string()),
        Err(StepError::Unrecorded { message, .. }) => Some(message.clone()),
        Err(StepError::Halted) => Some(HALTED.to_string()),
        Err(StepError::Cancelled) => Some(String::from("cancelled")),
    }
}
