/// HTTP client for the voice interpretation service
///
/// Submissions are a single JSON POST per recording. Every transport or
/// protocol problem is folded into `InterpretationResult::Failure`, so the
/// workflow consumes success and failure through the same transition.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::audio::encoder::EncodedPayload;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::interpretation::{Failure, InterpretationResult};
use crate::network::messages::{parse_response, HealthResponse, InterpretationRequest};
use crate::state::app_state::WorkflowPhase;
use crate::state::config::ServiceConfig;

/// Sends recordings to the interpretation service
///
/// Implementations never return transport errors; they resolve to
/// `InterpretationResult::Failure`. Callers keep at most one submission
/// outstanding.
#[async_trait]
pub trait InterpretationClient: Send + Sync {
    async fn submit(&self, payload: &EncodedPayload, phase: WorkflowPhase) -> InterpretationResult;
}

/// reqwest-backed [`InterpretationClient`]
///
/// # Example
/// ```no_run
/// use vpay_lib::network::HttpInterpretationClient;
/// use vpay_lib::state::config::ServiceConfig;
///
/// #[tokio::main]
/// async fn main() {
///     let client = HttpInterpretationClient::new(&ServiceConfig::default()).unwrap();
///     let health = client.health().await.unwrap();
///     println!("Service status: {}", health.status);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpInterpretationClient {
    http: reqwest::Client,
    submit_url: String,
    health_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpInterpretationClient {
    /// Create a client from service configuration
    ///
    /// # Errors
    /// `NetworkError::InvalidConfig` if the base URL is not http(s) or the
    /// timeout is zero.
    pub fn new(config: &ServiceConfig) -> NetworkResult<Self> {
        let base = config.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(NetworkError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }
        if config.request_timeout_secs == 0 {
            return Err(NetworkError::InvalidConfig(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NetworkError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            submit_url: join_url(base, &config.submit_path),
            health_url: join_url(base, &config.health_path),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            timeout_secs: config.request_timeout_secs,
        })
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Query the service health endpoint
    pub async fn health(&self) -> NetworkResult<HealthResponse> {
        let response = self
            .authorize(self.http.get(&self.health_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status { status, body });
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        let health: HealthResponse =
            serde_json::from_str(&body).map_err(|e| NetworkError::Protocol(e.to_string()))?;
        debug!(status = %health.status, "Health check complete");
        Ok(health)
    }

    async fn try_submit(
        &self,
        payload: &EncodedPayload,
        phase: WorkflowPhase,
    ) -> NetworkResult<InterpretationResult> {
        let request = InterpretationRequest::new(payload, phase);

        info!(
            url = %self.submit_url,
            phase = %phase,
            encoded_len = payload.data.len(),
            "Submitting recording"
        );

        let response = self
            .authorize(self.http.post(&self.submit_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        debug!(status = status.as_u16(), body_len = body.len(), "Service responded");
        parse_response(&body, phase)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout(self.timeout_secs)
        } else {
            NetworkError::from(err)
        }
    }
}

#[async_trait]
impl InterpretationClient for HttpInterpretationClient {
    async fn submit(&self, payload: &EncodedPayload, phase: WorkflowPhase) -> InterpretationResult {
        match self.try_submit(payload, phase).await {
            Ok(result) => result,
            Err(err) => {
                match &err {
                    NetworkError::Protocol(detail) => {
                        warn!(phase = %phase, detail = %detail, "Service response rejected")
                    }
                    other => error!(phase = %phase, error = %other, "Submission failed"),
                }
                InterpretationResult::Failure(Failure::from(err))
            }
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        body.to_string()
    } else {
        let head: String = body.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
