//! HTTP provider client.
//!
//! Talks to a provider endpoint exposing
//! `POST/PATCH/GET/DELETE /v1/resources/{type}[/{id}]`. Status codes are
//! mapped onto the retryable and fatal error classes; the client itself
//! performs no retries.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ConfigError, FatalKind, ProviderError, Result};

use super::{Attributes, Created, Provider};

/// API path prefix.
const API_PREFIX: &str = "/v1/resources";

/// HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Endpoint base URL, without trailing slash.
    base_url: String,
    /// Bearer token.
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    attributes: &'a Attributes,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    changes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
struct AttributesResponse {
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpProvider {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::invalid(format!("Failed to create HTTP client: {e}"), "provider"))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, resource_type: &str, provider_id: Option<&str>) -> String {
        match provider_id {
            Some(id) => format!("{}{API_PREFIX}/{resource_type}/{id}", self.base_url),
            None => format!("{}{API_PREFIX}/{resource_type}", self.base_url),
        }
    }

    /// Sends a request and maps non-success statuses to provider errors.
    async fn send(
        &self,
        request: RequestBuilder,
        provider_id: Option<&str>,
    ) -> std::result::Result<Response, ProviderError> {
        let request = request.header(header::ACCEPT, "application/json");
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| map_transport_error(&e))?;
        let status = response.status();
        trace!("Provider responded with {status}");

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body: ErrorBody = response.json().await.unwrap_or_default();

        Err(map_status(status, retry_after, body, provider_id))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> std::result::Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(FatalKind::Other, format!("Invalid provider response: {e}")))
    }
}

/// Maps a transport failure; everything that never reached the provider is
/// treated as a transient network failure.
fn map_transport_error(error: &reqwest::Error) -> ProviderError {
    if error.is_decode() || error.is_builder() {
        ProviderError::fatal(FatalKind::Other, format!("Request failed: {error}"))
    } else {
        ProviderError::network(format!("Request failed: {error}"))
    }
}

fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: ErrorBody,
    provider_id: Option<&str>,
) -> ProviderError {
    let message = body
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    if body.code.as_deref() == Some("QuotaExceeded") {
        return ProviderError::fatal(FatalKind::QuotaExceeded, message);
    }

    match status.as_u16() {
        429 => ProviderError::throttled(message, retry_after),
        502..=504 => ProviderError::network(format!("{status}: {message}")),
        404 => match provider_id {
            Some(id) => ProviderError::NotFound {
                provider_id: id.to_string(),
            },
            None => ProviderError::fatal(FatalKind::Other, message),
        },
        400 | 422 => ProviderError::fatal(FatalKind::InvalidParameter, message),
        401 | 403 => ProviderError::fatal(FatalKind::PermissionDenied, message),
        409 => ProviderError::fatal(FatalKind::Conflict, message),
        _ => ProviderError::fatal(FatalKind::Other, format!("{status}: {message}")),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> std::result::Result<Created, ProviderError> {
        debug!("POST {resource_type}");
        let request = self
            .client
            .post(self.url(resource_type, None))
            .json(&CreateRequest { attributes });
        let response = self.send(request, None).await?;
        let object: ObjectResponse = Self::decode(response).await?;

        Ok(Created {
            provider_id: object.id,
            exported: object.attributes,
        })
    }

    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changes: &Attributes,
    ) -> std::result::Result<Attributes, ProviderError> {
        debug!("PATCH {resource_type}/{provider_id}");
        let request = self
            .client
            .patch(self.url(resource_type, Some(provider_id)))
            .json(&UpdateRequest { changes });
        let response = self.send(request, Some(provider_id)).await?;
        let body: AttributesResponse = Self::decode(response).await?;
        Ok(body.attributes)
    }

    async fn destroy(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        debug!("DELETE {resource_type}/{provider_id}");
        let request = self.client.delete(self.url(resource_type, Some(provider_id)));
        self.send(request, Some(provider_id)).await?;
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> std::result::Result<Attributes, ProviderError> {
        let request = self.client.get(self.url(resource_type, Some(provider_id)));
        let response = self.send(request, Some(provider_id)).await?;
        let body: AttributesResponse = Self::decode(response).await?;
        Ok(body.attributes)
    }

    fn supports_cancellation(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransientKind;
    use crate::model::Value;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some("secret".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_sends_attributes_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/aws_vpc"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({"attributes": {"cidr_block": "10.0.0.0/16"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "vpc-123",
                "attributes": {"id": "vpc-123", "arn": "arn:aws:ec2:vpc/vpc-123"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let attributes = Attributes::from([("cidr_block".to_string(), Value::from("10.0.0.0/16"))]);
        let created = provider(&server).await.create("aws_vpc", &attributes).await.unwrap();

        assert_eq!(created.provider_id, "vpc-123");
        assert_eq!(created.exported["arn"], Value::from("arn:aws:ec2:vpc/vpc-123"));
    }

    #[tokio::test]
    async fn test_throttling_is_transient_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/resources/aws_vpc/vpc-1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .update("aws_vpc", "vpc-1", &Attributes::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_gateway_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).await.read("aws_vpc", "vpc-1").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transient {
                kind: TransientKind::Network,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fatal_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/aws_db_instance"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "QuotaExceeded",
                "message": "DB instance quota reached"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/aws_iam_role"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = provider(&server).await;
        let quota = client.create("aws_db_instance", &Attributes::new()).await.unwrap_err();
        assert_eq!(
            quota,
            ProviderError::fatal(FatalKind::QuotaExceeded, "DB instance quota reached")
        );

        let denied = client.create("aws_iam_role", &Attributes::new()).await.unwrap_err();
        assert!(matches!(
            denied,
            ProviderError::Fatal {
                kind: FatalKind::PermissionDenied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/aws_eip/eipalloc-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server).await.destroy("aws_eip", "eipalloc-9").await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::NotFound {
                provider_id: "eipalloc-9".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let client = HttpProvider::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        let err = client.read("aws_vpc", "vpc-1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
