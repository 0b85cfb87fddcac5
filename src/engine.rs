//! Engine for one run.
//!
//! The engine scopes a single invocation: it models the configuration, opens
//! the state session, plans against a snapshot, resolves the plan into steps,
//! executes them and records the run. Validation failures surface before any
//! provider call; action failures end up in the run report.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigValidator, LandformConfig};
use crate::error::{ProviderError, Result};
use crate::executor::{CancelToken, Executor, Interrupted, RetryPolicy, RunReport};
use crate::graph::{DependencyGraph, GraphBuilder};
use crate::model::{ResourceId, ResourceSet, Value};
use crate::planner::{ActionKind, Plan, PlanMode, PlanGenerator};
use crate::provider::{self, Provider};
use crate::registry::Registry;
use crate::resolver::{DependencyResolver, ExecutionSequence};
use crate::state::{self, RunHistoryEntry, RunOperation, StateFile, StateSession, StateStore};

/// Orchestrates plan, apply, destroy and drift for one run.
pub struct Engine {
    config: LandformConfig,
    registry: Registry,
    resources: Arc<ResourceSet>,
    provider: Arc<dyn Provider>,
    session: Arc<StateSession>,
    concurrency: Option<usize>,
}

/// A plan together with the steps it resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedRun {
    /// The plan.
    pub plan: Plan,
    /// Ordered steps.
    pub sequence: ExecutionSequence,
    /// Drift found by a refresh, if one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
}

/// Result of an apply or destroy.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// The plan that was executed.
    pub plan: Plan,
    /// Execution report.
    pub report: RunReport,
    /// Drift found by a refresh, if one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    /// State serial after the run, unless the final save failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    /// Why the final save failed. The report still describes what changed
    /// at the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
}

impl RunOutcome {
    /// Returns true if every step applied and the state was saved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success() && self.state_error.is_none()
    }
}

/// An attribute whose observed value differs from the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftedAttribute {
    /// Attribute name.
    pub attribute: String,
    /// Value in the state record.
    pub recorded: Value,
    /// Value reported by the provider; `None` if it is gone.
    pub observed: Option<Value>,
}

/// A resource whose object changed outside of Landform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftedResource {
    /// Resource identity.
    pub resource: ResourceId,
    /// Provider identifier.
    pub provider_id: String,
    /// Changed attributes.
    pub changes: Vec<DriftedAttribute>,
}

/// Report of drift detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Number of records read.
    pub checked: usize,
    /// Records whose object no longer exists.
    pub missing: Vec<ResourceId>,
    /// Records whose object changed.
    pub changed: Vec<DriftedResource>,
    /// Records that could not be read.
    pub unreadable: Vec<String>,
}

impl DriftReport {
    /// Returns true if any object is missing or changed.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty() || !self.changed.is_empty()
    }
}

impl Engine {
    /// Opens an engine with the provider and state store named by the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a backend cannot
    /// be initialized.
    pub async fn open(config: LandformConfig) -> Result<Self> {
        let registry = config.registry();
        let store = state::from_config(&config.state, &config.project).await?;
        let provider = provider::from_config(&config.provider, &registry).await?;
        Self::with_backends(config, provider, store).await
    }

    /// Opens an engine with explicit backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the state cannot
    /// be loaded.
    pub async fn with_backends(
        config: LandformConfig,
        provider: Arc<dyn Provider>,
        store: Box<dyn StateStore>,
    ) -> Result<Self> {
        let validation = ConfigValidator::new().validate(&config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let registry = config.registry();
        let resources = Arc::new(config.to_resource_set()?);
        let session = StateSession::open(store, &config.project.name, &config.project.environment).await?;
        info!(
            "Opened {}/{} with {} declared resource(s), provider {}, {} state",
            config.project.name,
            config.project.environment,
            resources.len(),
            provider.name(),
            session.backend_type()
        );

        Ok(Self {
            config,
            registry,
            resources,
            provider,
            session: Arc::new(session),
            concurrency: None,
        })
    }

    /// Overrides the configured concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Builds the dependency graph of the declarations.
    ///
    /// # Errors
    ///
    /// Returns a validation error on unknown types, dangling or
    /// unresolvable references, or cycles.
    pub fn graph(&self) -> Result<DependencyGraph> {
        Ok(GraphBuilder::new(&self.registry).build(&self.resources)?)
    }

    /// Current state.
    pub async fn state(&self) -> StateFile {
        self.session.snapshot().await
    }

    /// Plans a run without executing it.
    ///
    /// With `refresh`, records are first reconciled with what the provider
    /// reports, so missing objects plan as creates and changed ones as
    /// updates or replacements. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the graph is invalid or the plan would
    /// destroy a protected resource.
    pub async fn plan(&self, mode: PlanMode, refresh: bool) -> Result<PreparedRun> {
        let drift = if refresh { Some(self.refresh().await) } else { None };
        let (plan, sequence) = self.prepare(mode).await?;
        Ok(PreparedRun { plan, sequence, drift })
    }

    /// Converges the provider to the declarations.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any provider call, or a state error
    /// if the final state cannot be persisted. Action failures are reported
    /// in the outcome, not as errors.
    pub async fn apply(&self, refresh: bool, cancel: CancelToken) -> Result<RunOutcome> {
        let drift = if refresh { Some(self.refresh().await) } else { None };
        self.run(PlanMode::Apply, drift, cancel).await
    }

    /// Destroys every tracked resource in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a tracked resource is protected.
    pub async fn destroy(&self, cancel: CancelToken) -> Result<RunOutcome> {
        self.run(PlanMode::Destroy, None, cancel).await
    }

    /// Reads every record from the provider and reports differences.
    ///
    /// Read failures other than a missing object are listed as unreadable.
    pub async fn drift(&self) -> DriftReport {
        let snapshot = self.session.snapshot().await;
        let policy = self.retry_policy();
        let never = CancelToken::never();
        let mut report = DriftReport::default();

        for (id, record) in &snapshot.records {
            report.checked += 1;
            let label = format!("read {id}");
            let resource_type = id.resource_type.as_str();
            let provider_id = record.provider_id.as_str();
            let (result, _) = policy
                .run(&label, &never, || self.provider.read(resource_type, provider_id))
                .await;

            let observed = match result {
                Ok(observed) => observed,
                Err(Interrupted::Failed(ProviderError::NotFound { .. })) => {
                    warn!("{id} ({provider_id}) no longer exists");
                    report.missing.push(id.clone());
                    continue;
                }
                Err(Interrupted::Failed(e)) => {
                    warn!("Could not read {id}: {e}");
                    report.unreadable.push(format!("{id}: {e}"));
                    continue;
                }
                Err(Interrupted::Cancelled) => continue,
            };

            let changes = compare(&record.attributes, &record.exported, &observed);
            if changes.is_empty() {
                debug!("{id} matches its record");
            } else {
                warn!("{id} drifted in {} attribute(s)", changes.len());
                report.changed.push(DriftedResource {
                    resource: id.clone(),
                    provider_id: record.provider_id.clone(),
                    changes,
                });
            }
        }

        info!(
            "Drift check: {} checked, {} missing, {} changed",
            report.checked,
            report.missing.len(),
            report.changed.len()
        );
        report
    }

    /// Runs a drift check and folds the result into the session records.
    async fn refresh(&self) -> DriftReport {
        let report = self.drift().await;

        for id in &report.missing {
            let mut slot = self.session.lock(id).await;
            if slot.as_ref().is_some_and(|r| !r.deposed.is_empty()) {
                warn!("Deposed instances of {id} are no longer tracked");
            }
            *slot = None;
        }

        for drifted in &report.changed {
            let mut slot = self.session.lock(&drifted.resource).await;
            let Some(record) = slot.as_mut() else {
                continue;
            };
            for change in &drifted.changes {
                match &change.observed {
                    Some(value) if record.attributes.contains_key(&change.attribute) => {
                        record.attributes.insert(change.attribute.clone(), value.clone());
                    }
                    Some(value) => {
                        record.exported.insert(change.attribute.clone(), value.clone());
                    }
                    // Only exports are reported as vanished.
                    None => {
                        record.exported.remove(&change.attribute);
                    }
                }
            }
        }

        report
    }

    /// Plans against a snapshot and resolves the plan into steps.
    async fn prepare(&self, mode: PlanMode) -> Result<(Plan, ExecutionSequence)> {
        let graph = self.graph()?;
        let snapshot = self.session.snapshot().await;
        let plan = PlanGenerator::new(&self.registry).generate(&self.resources, &graph, &snapshot, mode)?;
        let sequence = DependencyResolver::new(&graph, &self.resources, &snapshot).resolve(&plan)?;
        Ok((plan, sequence))
    }

    async fn run(&self, mode: PlanMode, drift: Option<DriftReport>, cancel: CancelToken) -> Result<RunOutcome> {
        let (plan, sequence) = self.prepare(mode).await?;
        info!("{plan}");

        self.sync_unchanged(&plan).await;

        let mut executor = Executor::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.session),
            &self.config.executor,
        );
        if let Some(concurrency) = self.concurrency {
            executor = executor.with_concurrency(concurrency);
        }
        let report = executor
            .execute(plan.run_id, &sequence, Arc::clone(&self.resources), cancel)
            .await;

        let operation = match mode {
            PlanMode::Apply => RunOperation::Apply,
            PlanMode::Destroy => RunOperation::Destroy,
        };
        let finished = self
            .session
            .finish(RunHistoryEntry {
                run_id: plan.run_id,
                timestamp: Utc::now(),
                operation,
                config_hash: plan.config_hash.clone(),
                applied: report.applied(),
                incomplete: report.incomplete(),
                success: report.is_success(),
            })
            .await;
        let (serial, state_error) = match finished {
            Ok(serial) => (Some(serial), None),
            Err(e) => {
                error!("Run {} finished but the state could not be saved: {e}", plan.run_id);
                (None, Some(e.to_string()))
            }
        };

        Ok(RunOutcome {
            plan,
            report,
            drift,
            serial,
            state_error,
        })
    }

    /// Records lifecycle and explicit dependency changes of unchanged
    /// resources, which never reach the provider.
    async fn sync_unchanged(&self, plan: &Plan) {
        for action in plan.actions.iter().filter(|a| a.kind == ActionKind::NoOp) {
            let Some(resource) = self.resources.get(&action.resource) else {
                continue;
            };
            let mut slot = self.session.lock(&action.resource).await;
            let Some(record) = slot.as_mut() else {
                continue;
            };
            let dependencies = resource.dependencies();
            if record.lifecycle != resource.lifecycle || record.dependencies != dependencies {
                debug!("Syncing lifecycle and dependencies of {}", action.resource);
                record.lifecycle = resource.lifecycle;
                record.dependencies = dependencies;
                record.touch();
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.executor.retry)
    }
}

/// Compares the recorded inputs and exports with what the provider reports.
///
/// Inputs are only compared when the provider echoes them back; a read that
/// omits an input says nothing about it. Exports are compared in full.
fn compare(
    attributes: &BTreeMap<String, Value>,
    exported: &BTreeMap<String, Value>,
    observed: &BTreeMap<String, Value>,
) -> Vec<DriftedAttribute> {
    let inputs = attributes.iter().filter_map(|(name, value)| {
        observed
            .get(name)
            .filter(|current| *current != value)
            .map(|current| DriftedAttribute {
                attribute: name.clone(),
                recorded: value.clone(),
                observed: Some(current.clone()),
            })
    });

    let exports = exported
        .iter()
        .filter(|(name, _)| !attributes.contains_key(*name))
        .filter_map(|(name, value)| {
            let current = observed.get(name);
            (current != Some(value)).then(|| DriftedAttribute {
                attribute: name.clone(),
                recorded: value.clone(),
                observed: current.cloned(),
            })
        });

    inputs.chain(exports).collect()
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift() {
            writeln!(f, "Drift detected:")?;
            for id in &self.missing {
                writeln!(f, "  - {id}: missing")?;
            }
            for drifted in &self.changed {
                writeln!(f, "  ~ {} ({})", drifted.resource, drifted.provider_id)?;
                for change in &drifted.changes {
                    match &change.observed {
                        Some(observed) => {
                            writeln!(f, "      {}: {} -> {observed}", change.attribute, change.recorded)?;
                        }
                        None => writeln!(f, "      {}: {} -> (absent)", change.attribute, change.recorded)?,
                    }
                }
            }
        } else {
            write!(f, "No drift detected across {} resource(s)", self.checked)?;
        }
        for unreadable in &self.unreadable {
            write!(f, "\n  ? {unreadable}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{LandformError, ValidationError};
    use crate::executor::{ResourceStatus, cancellation};
    use crate::provider::{Created, MockProvider, SandboxProvider};
    use crate::error::StateError;
    use crate::state::{LocalStateStore, MockStateStore};
    use tempfile::TempDir;

    const NETWORK: &str = r#"
project:
  name: network
executor:
  concurrency: 4
  retry:
    initial_delay_ms: 1
    max_delay_ms: 2
resources:
  - type: aws_vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
  - type: aws_internet_gateway
    name: main
    attributes:
      vpc_id: "${aws_vpc.main.id}"
  - type: aws_subnet
    name: public
    depends_on: [aws_internet_gateway.main]
    attributes:
      vpc_id: "${aws_vpc.main.id}"
      cidr_block: 10.0.1.0/24
"#;

    fn config(yaml: &str) -> LandformConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    async fn engine(dir: &TempDir, yaml: &str, provider: Arc<dyn Provider>) -> Engine {
        let store = Box::new(LocalStateStore::with_base_dir(dir.path()));
        Engine::with_backends(config(yaml), provider, store).await.unwrap()
    }

    fn sandbox() -> Arc<SandboxProvider> {
        Arc::new(SandboxProvider::new(Registry::builtin()))
    }

    #[test]
    fn test_init_template_builds_a_graph() {
        let config = config(include_str!("../templates/landform.yaml"));
        ConfigValidator::new().validate(&config).unwrap();

        let registry = config.registry();
        let resources = config.to_resource_set().unwrap();
        let graph = GraphBuilder::new(&registry).build(&resources).unwrap();
        assert_eq!(graph.node_count(), resources.len());
        assert!(graph.topological_order().is_ok());
    }

    #[tokio::test]
    async fn test_apply_then_replan_is_clean() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();

        let first = engine(&dir, NETWORK, cloud.clone()).await;
        let outcome = first.apply(false, CancelToken::never()).await.unwrap();
        assert!(outcome.report.is_success());
        assert_eq!(outcome.plan.counts().create, 3);
        assert_eq!(cloud.object_count().await, 3);

        let second = engine(&dir, NETWORK, cloud.clone()).await;
        let prepared = second.plan(PlanMode::Apply, false).await.unwrap();
        assert!(!prepared.plan.has_changes());
        assert!(prepared.sequence.is_empty());

        let state = second.state().await;
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
        assert_eq!(state.history[0].config_hash, outcome.plan.config_hash);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_the_report() {
        let mut store = MockStateStore::new();
        store.expect_load().returning(|| Ok(None));
        store
            .expect_save()
            .returning(|_| Err(StateError::storage("read-only filesystem").into()));
        store.expect_backend_type().return_const("mock");
        let cloud = sandbox();
        let engine = Engine::with_backends(config(NETWORK), cloud.clone(), Box::new(store))
            .await
            .unwrap();

        let outcome = engine.apply(false, CancelToken::never()).await.unwrap();

        assert!(!outcome.is_success());
        assert!(outcome.serial.is_none());
        assert!(outcome.state_error.as_deref().unwrap().contains("read-only filesystem"));
        assert_eq!(outcome.report.count(ResourceStatus::Failed), 1);
        assert_eq!(cloud.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_provider_calls() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
project:
  name: cyclic
resources:
  - type: aws_security_group
    name: web
    attributes:
      ingress: "${aws_security_group.db.id}"
  - type: aws_security_group
    name: db
    attributes:
      ingress: "${aws_security_group.web.id}"
"#;
        // No expectations: any provider call fails the test.
        let mut mock = MockProvider::new();
        mock.expect_name().return_const("mock");
        let engine = engine(&dir, yaml, Arc::new(mock)).await;

        let err = engine.apply(false, CancelToken::never()).await.unwrap_err();
        assert!(matches!(
            err,
            LandformError::Validation(ValidationError::CyclicDependency { .. })
        ));
        assert_eq!(err.exit_code(), crate::error::EXIT_VALIDATION);
        assert!(engine.state().await.history.is_empty());
    }

    #[tokio::test]
    async fn test_prevent_destroy_blocks_removal() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let protected = r#"
project:
  name: db
resources:
  - type: aws_db_instance
    name: main
    lifecycle:
      prevent_destroy: true
    attributes:
      engine: postgres
"#;
        let first = engine(&dir, protected, cloud.clone()).await;
        tokio_test::assert_ok!(first.apply(false, CancelToken::never()).await);

        let removed = "project:\n  name: db\n";
        let second = engine(&dir, removed, cloud.clone()).await;
        let err = second.plan(PlanMode::Apply, false).await.unwrap_err();
        assert!(matches!(
            err,
            LandformError::Validation(ValidationError::PreventDestroy { .. })
        ));
        assert_eq!(cloud.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let engine = engine(&dir, NETWORK, cloud.clone()).await;
        engine.apply(false, CancelToken::never()).await.unwrap();

        let outcome = engine.destroy(CancelToken::never()).await.unwrap();
        assert!(outcome.report.is_success());
        assert_eq!(outcome.plan.counts().destroy, 3);
        assert_eq!(cloud.object_count().await, 0);

        let state = engine.state().await;
        assert!(state.is_empty());
        assert_eq!(state.history.last().map(|h| h.operation), Some(RunOperation::Destroy));

        let vpc = outcome.report.step(&id("aws_vpc.main"), crate::resolver::StepKind::Destroy).unwrap();
        let subnet = outcome
            .report
            .step(&id("aws_subnet.public"), crate::resolver::StepKind::Destroy)
            .unwrap();
        assert!(subnet.finished < vpc.started);
    }

    #[tokio::test]
    async fn test_drift_reports_missing_and_changed() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let engine = engine(&dir, NETWORK, cloud.clone()).await;
        engine.apply(false, CancelToken::never()).await.unwrap();

        let state = engine.state().await;
        let subnet = state.get(&id("aws_subnet.public")).unwrap().provider_id.clone();
        let igw = state.get(&id("aws_internet_gateway.main")).unwrap().provider_id.clone();
        cloud.tamper(&subnet, "cidr_block", Value::from("10.0.9.0/24")).await;
        cloud.forget(&igw).await;

        let report = engine.drift().await;
        assert!(report.has_drift());
        assert_eq!(report.checked, 3);
        assert_eq!(report.missing, vec![id("aws_internet_gateway.main")]);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].changes[0].attribute, "cidr_block");
        assert_eq!(report.changed[0].changes[0].observed, Some(Value::from("10.0.9.0/24")));
    }

    #[tokio::test]
    async fn test_read_reporting_only_exports_is_not_drift() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_supports_cancellation().return_const(false);
        mock.expect_create().returning(|resource_type, _| {
            let provider_id = format!("{resource_type}-1");
            Ok(Created {
                exported: [("id".to_string(), Value::from(provider_id.as_str()))].into(),
                provider_id,
            })
        });
        mock.expect_read()
            .returning(|_, provider_id| Ok([("id".to_string(), Value::from(provider_id))].into()));
        let engine = engine(&dir, NETWORK, Arc::new(mock)).await;
        engine.apply(false, CancelToken::never()).await.unwrap();

        let report = engine.drift().await;
        assert_eq!(report.checked, 3);
        assert!(!report.has_drift(), "{report}");

        let prepared = engine.plan(PlanMode::Apply, true).await.unwrap();
        assert!(!prepared.plan.has_changes());
        let state = engine.state().await;
        let vpc = state.get(&id("aws_vpc.main")).unwrap();
        assert_eq!(vpc.attributes["cidr_block"], Value::from("10.0.0.0/16"));
    }

    #[test]
    fn test_vanished_export_is_drift() {
        let attributes = BTreeMap::from([("cidr_block".to_string(), Value::from("10.0.0.0/16"))]);
        let exported = BTreeMap::from([
            ("id".to_string(), Value::from("vpc-1")),
            ("arn".to_string(), Value::from("arn:vpc-1")),
        ]);
        let observed = BTreeMap::from([("id".to_string(), Value::from("vpc-1"))]);

        let changes = compare(&attributes, &exported, &observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attribute, "arn");
        assert_eq!(changes[0].observed, None);
    }

    #[tokio::test]
    async fn test_refresh_plans_recreate_and_replace() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let engine = engine(&dir, NETWORK, cloud.clone()).await;
        engine.apply(false, CancelToken::never()).await.unwrap();

        let state = engine.state().await;
        let subnet = state.get(&id("aws_subnet.public")).unwrap().provider_id.clone();
        let igw = state.get(&id("aws_internet_gateway.main")).unwrap().provider_id.clone();
        cloud.tamper(&subnet, "cidr_block", Value::from("10.0.9.0/24")).await;
        cloud.forget(&igw).await;

        let outcome = engine.apply(true, CancelToken::never()).await.unwrap();
        assert!(outcome.report.is_success());
        assert!(outcome.drift.as_ref().is_some_and(DriftReport::has_drift));
        assert_eq!(
            outcome.plan.action_for(&id("aws_internet_gateway.main")).map(|a| a.kind),
            Some(ActionKind::Create)
        );
        assert_eq!(
            outcome.plan.action_for(&id("aws_subnet.public")).map(|a| a.kind),
            Some(ActionKind::Replace)
        );

        assert!(!engine.drift().await.has_drift());
    }

    #[tokio::test]
    async fn test_lifecycle_change_is_recorded_without_provider_call() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let yaml = "project:\n  name: eip\nresources:\n  - type: aws_eip\n    name: nat\n";
        let first = engine(&dir, yaml, cloud.clone()).await;
        first.apply(false, CancelToken::never()).await.unwrap();
        let calls = cloud.calls().await.len();

        let protected = format!("{yaml}    lifecycle:\n      prevent_destroy: true\n");
        let second = engine(&dir, &protected, cloud.clone()).await;
        let outcome = second.apply(false, CancelToken::never()).await.unwrap();

        assert_eq!(outcome.report.resources[&id("aws_eip.nat")], ResourceStatus::NoOp);
        assert_eq!(cloud.calls().await.len(), calls);
        let record = second.state().await.get(&id("aws_eip.nat")).cloned().unwrap();
        assert!(record.lifecycle.prevent_destroy);
    }

    #[tokio::test]
    async fn test_cancelled_apply_records_incomplete_run() {
        let dir = TempDir::new().unwrap();
        let cloud = sandbox();
        let engine = engine(&dir, NETWORK, cloud.clone()).await;

        let (handle, token) = cancellation();
        handle.cancel();
        let outcome = engine.apply(false, token).await.unwrap();

        assert!(!outcome.report.is_success());
        let history = &engine.state().await.history;
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].incomplete.len(), 3);
    }
}
