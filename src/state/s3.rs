//! S3 state backend.
//!
//! One object per project environment. Lineage and serial are mirrored into
//! object metadata so a save can check both with a HEAD request instead of
//! downloading the document. A write is refused when the stored object
//! belongs to another lineage or is not older than the incoming state.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::local::decode;
use super::store::StateStore;
use super::types::StateFile;

const STATE_OBJECT: &str = "state.json";
const LINEAGE_META: &str = "landform-lineage";
const SERIAL_META: &str = "landform-serial";

/// State store keeping the document in an S3 bucket.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    key: String,
}

/// Builds the object key under `prefix`, ignoring stray slashes.
fn object_key(prefix: &str) -> String {
    let segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        STATE_OBJECT.to_string()
    } else {
        format!("{}/{STATE_OBJECT}", segments.join("/"))
    }
}

/// Lineage and serial read from the stored object's metadata.
#[derive(Debug, Default, PartialEq, Eq)]
struct StoredHead {
    lineage: Option<String>,
    serial: Option<u64>,
}

impl StoredHead {
    fn from_metadata(meta: Option<&HashMap<String, String>>) -> Self {
        let Some(meta) = meta else {
            return Self::default();
        };
        Self {
            lineage: meta.get(LINEAGE_META).cloned(),
            serial: meta.get(SERIAL_META).and_then(|s| s.parse().ok()),
        }
    }
}

/// Rejects a write whose lineage differs from the stored one.
fn check_lineage(stored: Option<&str>, incoming: &str) -> std::result::Result<(), StateError> {
    match stored {
        Some(stored) if stored != incoming => Err(StateError::LineageMismatch {
            stored: stored.to_string(),
            incoming: incoming.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Rejects a write that does not advance the stored serial.
fn check_serial(stored: Option<u64>, incoming: u64) -> std::result::Result<(), StateError> {
    match stored {
        Some(stored) if incoming <= stored => Err(StateError::StaleSerial { stored, incoming }),
        _ => Ok(()),
    }
}

impl S3StateStore {
    /// Connects to S3 using the ambient AWS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: &str, region: Option<&str>) -> Result<Self> {
        let loader = aws_config::from_env();
        let loader = match region {
            Some(region) => loader.region(aws_config::Region::new(region.to_string())),
            None => loader,
        };
        let sdk_config = loader.load().await;

        Ok(Self::with_client(Client::new(&sdk_config), bucket, prefix))
    }

    /// Uses an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: object_key(prefix),
        }
    }

    /// Lineage and serial recorded on the stored object, if there is one.
    async fn stored_head(&self) -> Result<Option<StoredHead>> {
        match self.client.head_object().bucket(&self.bucket).key(&self.key).send().await {
            Ok(head) => Ok(Some(StoredHead::from_metadata(head.metadata()))),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("HEAD s3://{}/{}: {service_err}", self.bucket, self.key)).into())
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<StateFile>> {
        debug!("Fetching s3://{}/{}", self.bucket, self.key);

        let response = match self.client.get_object().bucket(&self.bucket).key(&self.key).send().await {
            Ok(response) => response,
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    debug!("No remote state yet");
                    return Ok(None);
                }
                return Err(StateError::s3(format!("GET s3://{}/{}: {service_err}", self.bucket, self.key)).into());
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StateError::s3(format!("Reading state body: {e}")))?
            .into_bytes();
        let content = std::str::from_utf8(&bytes).map_err(|e| StateError::Corrupted {
            message: format!("State object is not UTF-8: {e}"),
        })?;

        let state = decode(content)?;
        info!(
            "Loaded remote state {}/{} at serial {}",
            state.project, state.environment, state.serial
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &StateFile) -> Result<()> {
        let lineage = state.lineage.to_string();
        if let Some(stored) = self.stored_head().await? {
            check_lineage(stored.lineage.as_deref(), &lineage)?;
            check_serial(stored.serial, state.serial)?;
        }

        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type("application/json")
            .metadata(LINEAGE_META, lineage)
            .metadata(SERIAL_META, state.serial.to_string())
            .body(body.into())
            .send()
            .await
            .map_err(|e| StateError::s3(format!("PUT s3://{}/{}: {e}", self.bucket, self.key)))?;

        debug!("Remote state written at serial {}", state.serial);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Removing s3://{}/{}", self.bucket, self.key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("DELETE s3://{}/{}: {e}", self.bucket, self.key)))?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(&self.key).send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("HEAD s3://{}/{}: {service_err}", self.bucket, self.key)).into())
                }
            }
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(""), "state.json");
        assert_eq!(object_key("/"), "state.json");
        assert_eq!(object_key("network/prod"), "network/prod/state.json");
        assert_eq!(object_key("/network//prod/"), "network/prod/state.json");
    }

    #[test]
    fn test_lineage_guard() {
        assert!(check_lineage(None, "a").is_ok());
        assert!(check_lineage(Some("a"), "a").is_ok());

        let err = check_lineage(Some("a"), "b").unwrap_err();
        assert!(matches!(err, StateError::LineageMismatch { ref stored, .. } if stored == "a"));
    }

    #[test]
    fn test_serial_must_advance() {
        assert!(check_serial(None, 1).is_ok());
        assert!(check_serial(Some(4), 5).is_ok());

        let err = check_serial(Some(5), 5).unwrap_err();
        assert!(matches!(err, StateError::StaleSerial { stored: 5, incoming: 5 }));
        assert!(check_serial(Some(7), 3).is_err());
    }

    #[test]
    fn test_stored_head_reads_metadata() {
        let meta = HashMap::from([
            (LINEAGE_META.to_string(), "b1946ac9".to_string()),
            (SERIAL_META.to_string(), "12".to_string()),
        ]);
        let head = StoredHead::from_metadata(Some(&meta));
        assert_eq!(head.lineage.as_deref(), Some("b1946ac9"));
        assert_eq!(head.serial, Some(12));

        let garbled = HashMap::from([(SERIAL_META.to_string(), "twelve".to_string())]);
        assert_eq!(StoredHead::from_metadata(Some(&garbled)).serial, None);
        assert_eq!(StoredHead::from_metadata(None), StoredHead::default());
    }
}
