//! Run-scoped state session.
//!
//! A session loads the state once, hands the planner an immutable snapshot,
//! and then lets executor tasks read and write records concurrently. Each
//! resource identity has its own async mutex, so tasks working on unrelated
//! resources never contend. Saves are serialized and bump the serial.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::ResourceId;

use super::store::StateStore;
use super::types::{RunHistoryEntry, StateFile, StateRecord};

type Slot = Arc<Mutex<Option<StateRecord>>>;

/// Exclusive access to one resource's record.
pub type RecordGuard = OwnedMutexGuard<Option<StateRecord>>;

/// Shared, per-record-locked view of the state for one run.
pub struct StateSession {
    store: Box<dyn StateStore>,
    /// Everything except the records; also serializes saves.
    header: Mutex<StateFile>,
    slots: StdMutex<BTreeMap<ResourceId, Slot>>,
}

impl std::fmt::Debug for StateSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSession")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

impl StateSession {
    /// Loads the state from `store`, or starts an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored state cannot be loaded.
    pub async fn open(store: Box<dyn StateStore>, project: &str, environment: &str) -> Result<Self> {
        let mut state = match store.load().await? {
            Some(state) => {
                if state.project != project || state.environment != environment {
                    warn!(
                        "State belongs to {}/{}, configuration is {project}/{environment}",
                        state.project, state.environment
                    );
                }
                state
            }
            None => {
                info!("No existing state, starting fresh for {project}/{environment}");
                StateFile::new(project, environment)
            }
        };

        let records = std::mem::take(&mut state.records);
        debug!(
            "Opened state session: {} record(s), serial {}",
            records.len(),
            state.serial
        );
        let slots = records
            .into_iter()
            .map(|(id, record)| (id, Arc::new(Mutex::new(Some(record)))))
            .collect();

        Ok(Self {
            store,
            header: Mutex::new(state),
            slots: StdMutex::new(slots),
        })
    }

    fn slot(&self, id: &ResourceId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_default())
    }

    fn all_slots(&self) -> Vec<(ResourceId, Slot)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(id, slot)| (id.clone(), Arc::clone(slot))).collect()
    }

    /// Locks the record of `id`, creating an empty slot if needed.
    pub async fn lock(&self, id: &ResourceId) -> RecordGuard {
        self.slot(id).lock_owned().await
    }

    /// Returns a copy of the record of `id`.
    pub async fn record(&self, id: &ResourceId) -> Option<StateRecord> {
        self.slot(id).lock().await.clone()
    }

    /// Returns the current state as a plain document.
    pub async fn snapshot(&self) -> StateFile {
        let mut state = self.header.lock().await.clone();
        for (id, slot) in self.all_slots() {
            if let Some(record) = slot.lock().await.clone() {
                state.records.insert(id, record);
            }
        }
        state
    }

    /// Persists the current records without closing the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn checkpoint(&self) -> Result<u64> {
        self.save(None).await
    }

    /// Records the run in the history and persists the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn finish(&self, entry: RunHistoryEntry) -> Result<u64> {
        self.save(Some(entry)).await
    }

    async fn save(&self, entry: Option<RunHistoryEntry>) -> Result<u64> {
        let mut header = self.header.lock().await;

        let mut state = header.clone();
        for (id, slot) in self.all_slots() {
            if let Some(record) = slot.lock().await.clone() {
                state.records.insert(id, record);
            }
        }
        state.serial = header.serial + 1;
        state.last_updated = Utc::now();
        if let Some(entry) = entry {
            state.add_history(entry);
        }

        self.store.save(&state).await?;

        header.serial = state.serial;
        header.last_updated = state.last_updated;
        header.history = state.history;
        debug!("Persisted state serial {}", header.serial);
        Ok(header.serial)
    }

    /// Backend the session persists to.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{LocalStateStore, RunOperation};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn store(dir: &TempDir) -> Box<dyn StateStore> {
        Box::new(LocalStateStore::with_base_dir(dir.path()))
    }

    fn entry() -> RunHistoryEntry {
        RunHistoryEntry {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation: RunOperation::Apply,
            config_hash: "abc".into(),
            applied: vec!["aws_vpc.main".into()],
            incomplete: Vec::new(),
            success: true,
        }
    }

    #[tokio::test]
    async fn test_records_written_through_guards_are_persisted() {
        let dir = TempDir::new().unwrap();
        let session = StateSession::open(store(&dir), "net", "dev").await.unwrap();

        *session.lock(&id("aws_vpc.main")).await = Some(StateRecord::new(id("aws_vpc.main"), "vpc-1"));
        let serial = session.finish(entry()).await.unwrap();
        assert_eq!(serial, 1);

        let reopened = StateSession::open(store(&dir), "net", "dev").await.unwrap();
        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.serial, 1);
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.get(&id("aws_vpc.main")).unwrap().provider_id, "vpc-1");
    }

    #[tokio::test]
    async fn test_removed_records_are_dropped() {
        let dir = TempDir::new().unwrap();
        let session = StateSession::open(store(&dir), "net", "dev").await.unwrap();
        *session.lock(&id("aws_eip.nat")).await = Some(StateRecord::new(id("aws_eip.nat"), "eipalloc-1"));
        session.checkpoint().await.unwrap();

        session.lock(&id("aws_eip.nat")).await.take();
        let serial = session.checkpoint().await.unwrap();

        assert_eq!(serial, 2);
        assert!(session.snapshot().await.is_empty());
        assert!(session.record(&id("aws_eip.nat")).await.is_none());
    }

    #[tokio::test]
    async fn test_unrelated_records_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let session = StateSession::open(store(&dir), "net", "dev").await.unwrap();

        let _held = session.lock(&id("aws_vpc.main")).await;
        let other = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            session.lock(&id("aws_subnet.a")),
        )
        .await;
        assert!(other.is_ok());
    }
}
