//! State management module.
//!
//! This module provides persistent state storage for tracking provisioned
//! resources, their provider identifiers, exported attributes and run history.

mod local;
mod s3;
mod session;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use session::{RecordGuard, StateSession};
pub use store::StateStore;
#[cfg(test)]
pub use store::MockStateStore;
pub use types::{RunHistoryEntry, RunOperation, STATE_VERSION, StateFile, StateRecord};

use tracing::info;

use crate::config::{ProjectConfig, StateBackend, StateConfig};
use crate::error::{ConfigError, Result};

/// Creates the state store named by the configuration.
///
/// Without an explicit prefix, S3 state is keyed by project and environment.
///
/// # Errors
///
/// Returns an error if the S3 backend lacks a bucket or cannot be initialized.
pub async fn from_config(config: &StateConfig, project: &ProjectConfig) -> Result<Box<dyn StateStore>> {
    match config.backend {
        StateBackend::Local => {
            let store = match &config.path {
                Some(path) => LocalStateStore::with_state_path(path),
                None => LocalStateStore::new()?,
            };
            info!("Using local state at {}", store.path().display());
            Ok(Box::new(store))
        }
        StateBackend::S3 => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::invalid("S3 bucket is required", "state.bucket"))?;
            let default_prefix = format!("{}/{}", project.name, project.environment);
            let prefix = config.prefix.as_deref().unwrap_or(&default_prefix);
            info!("Using S3 state at s3://{bucket}/{prefix}");
            Ok(Box::new(
                S3StateStore::new(bucket, prefix, config.region.as_deref()).await?,
            ))
        }
    }
}
