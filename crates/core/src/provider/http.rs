//! HTTP adapter for the generation provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::Job;

use super::error::{ProviderError, ProviderFault};
use super::Provider;

/// Connection settings for the upstream generation service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    300
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    instruction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_artifact: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    artifact_ref: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Calls the generation service over HTTP and translates its responses
/// into the three outcomes the orchestrator understands: an artifact,
/// a retryable failure, or a terminal one.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::with_fault(ProviderFault::BadRequest, e.to_string()))?;

        Ok(Self { client, config })
    }

    fn classify_status(status: StatusCode, body: &str) -> ProviderError {
        let fault = match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderFault::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderFault::Unauthorized,
            StatusCode::BAD_REQUEST => ProviderFault::BadRequest,
            s if s.is_server_error() => ProviderFault::ServerError,
            _ => ProviderFault::classify(body),
        };
        let message = if body.is_empty() {
            format!("provider returned {}", status)
        } else {
            format!("provider returned {}: {}", status, body)
        };
        ProviderError::with_fault(fault, message)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn execute(&self, job: &Job) -> Result<String, ProviderError> {
        let url = format!("{}/v1/generate", self.config.base_url);
        debug!(job_id = %job.id, %url, "dispatching generation request");

        let body = GenerateBody {
            instruction: &job.request.instruction,
            reference_artifact: job.request.reference_artifact.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::with_fault(ProviderFault::Timeout, format!("request timed out: {e}"))
                } else {
                    ProviderError::with_fault(ProviderFault::Unknown, format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::with_fault(ProviderFault::Unknown, format!("malformed response: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::from_text(error));
        }

        parsed.artifact_ref.ok_or_else(|| {
            ProviderError::with_fault(ProviderFault::Unknown, "empty provider response".to_string())
        })
    }
}
