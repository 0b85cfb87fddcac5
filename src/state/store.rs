//! Persistence boundary for the state document.
//!
//! A store reads and writes one whole [`StateFile`]. It holds no locks of its
//! own: within a run the [`StateSession`](super::StateSession) serializes
//! record updates, and coordination between operators is left to whatever
//! wraps the backend.

use async_trait::async_trait;

use super::types::StateFile;
use crate::error::Result;

/// Backend holding the state of one project environment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the stored document, or `None` before the first save.
    async fn load(&self) -> Result<Option<StateFile>>;

    /// Replaces the stored document. Called after every applied step and at
    /// the end of a run.
    async fn save(&self, state: &StateFile) -> Result<()>;

    /// Removes the stored document.
    async fn delete(&self) -> Result<()>;

    /// Whether a document has been saved.
    async fn exists(&self) -> Result<bool>;

    /// Short backend name for logs and output (`local`, `s3`).
    fn backend_type(&self) -> &'static str;
}
