//! HTTP client for the REST transport.
//!
//! Every request goes through the per-method rate limiter and the retry
//! policy, so the REST collaborators only build URLs and decode bodies.

use crate::config::{AccessToken, ConfigError, InventoryConfig};
use crate::error::{InventoryError, InventoryResult};
use crate::rate_limiter::MethodRateLimiter;
use crate::retry::RetryPolicy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate-limited, retrying JSON client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Arc<MethodRateLimiter>,
    retry: RetryPolicy,
    token: Option<AccessToken>,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        limiter: Arc<MethodRateLimiter>,
        retry: RetryPolicy,
        token: Option<AccessToken>,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            limiter,
            retry,
            token,
        })
    }

    /// Builds a client from the endpoint, quota and retry sections.
    pub fn from_config(config: &InventoryConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.timeout(),
            Arc::new(config.rate_limiter()?),
            config.retry_policy(),
            config.access_token.clone(),
        )
    }

    /// GETs `url` and decodes the JSON body.
    ///
    /// `method` is the API method name the call is throttled and logged
    /// under.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> InventoryResult<T> {
        self.retry
            .run(method, cancel, move || async move {
                self.limiter.wait(method, cancel).await;
                let request = self.authorize(self.client.get(url).query(query));
                let response = self.send(request, cancel).await?;
                parse_json_response(response).await
            })
            .await
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> InventoryResult<Response> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InventoryError::Cancelled),
            response = request.send() => response.map_err(map_transport_error)?,
        };

        let status = response.status();
        debug!(status = %status, url = %response.url(), "Received response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

async fn parse_json_response<T: DeserializeOwned>(response: Response) -> InventoryResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        InventoryError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}

fn map_transport_error(err: reqwest::Error) -> InventoryError {
    if err.is_timeout() {
        InventoryError::DeadlineExceeded(err.to_string())
    } else if err.is_connect() {
        InventoryError::Unavailable(err.to_string())
    } else {
        InventoryError::RequestFailed(err.to_string())
    }
}

/// Maps a non-success status onto the error taxonomy.
pub(crate) fn map_status(status: StatusCode, body: &str) -> InventoryError {
    let detail = format!(
        "{}: {}",
        status,
        body.chars().take(200).collect::<String>()
    );
    match status {
        StatusCode::TOO_MANY_REQUESTS => InventoryError::ResourceExhausted(detail),
        StatusCode::SERVICE_UNAVAILABLE => InventoryError::Unavailable(detail),
        StatusCode::GATEWAY_TIMEOUT => InventoryError::DeadlineExceeded(detail),
        StatusCode::UNAUTHORIZED => InventoryError::AuthenticationFailed(detail),
        StatusCode::FORBIDDEN => InventoryError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => InventoryError::NotFound(detail),
        _ => InventoryError::RequestFailed(detail),
    }
}
