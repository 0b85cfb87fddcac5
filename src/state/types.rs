//! State types for tracking provisioned resources.
//!
//! A [`StateFile`] is the durable record of what was last successfully
//! provisioned, keyed by resource identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::model::{LifecyclePolicy, ResourceId, Value};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of run history entries kept in the state file.
const MAX_HISTORY: usize = 100;

/// The complete persisted state of one project environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Incremented on every save.
    pub serial: u64,
    /// Fixed when the state is first created.
    pub lineage: Uuid,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Records keyed by `type.name`.
    #[serde(default)]
    pub records: BTreeMap<ResourceId, StateRecord>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Last-known state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource identity.
    pub id: ResourceId,
    /// Provider-assigned identifier of the current instance.
    pub provider_id: String,
    /// Last-applied input attributes with references resolved.
    pub attributes: BTreeMap<String, Value>,
    /// Attributes exported by the provider.
    #[serde(default)]
    pub exported: BTreeMap<String, Value>,
    /// Dependencies at the time of the last apply.
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceId>,
    /// Lifecycle policy at the time of the last apply.
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
    /// Hash of `attributes`.
    pub attributes_hash: String,
    /// Old instances of unfinished create-before-destroy replacements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<String>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Hash of the declarations the run was planned from.
    pub config_hash: String,
    /// Resources whose actions succeeded.
    pub applied: Vec<String>,
    /// Resources that failed, were blocked or were cancelled.
    #[serde(default)]
    pub incomplete: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
}

/// Types of runs that mutate state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge to the declarations.
    Apply,
    /// Remove every tracked resource.
    Destroy,
}

impl StateFile {
    /// Creates a new empty state with a fresh lineage.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            lineage: Uuid::new_v4(),
            last_updated: Utc::now(),
            records: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Gets a record by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
        self.records.get(id)
    }

    /// Adds or replaces a record.
    pub fn set(&mut self, record: StateRecord) {
        self.records.insert(record.id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record.
    pub fn remove(&mut self, id: &ResourceId) -> Option<StateRecord> {
        let result = self.records.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns true if no resources are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StateRecord {
    /// Creates a record for a freshly created instance.
    #[must_use]
    pub fn new(id: ResourceId, provider_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_id: provider_id.into(),
            attributes: BTreeMap::new(),
            exported: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            lifecycle: LifecyclePolicy::default(),
            attributes_hash: String::new(),
            deposed: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up an attribute, preferring exported values over inputs.
    #[must_use]
    pub fn lookup(&self, attribute: &str) -> Option<&Value> {
        self.exported
            .get(attribute)
            .or_else(|| self.attributes.get(attribute))
    }

    /// Marks the record as written now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
