use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::api::middleware::AppError;
use crate::config::Config;

/// The external validation capability: execute a candidate translation
/// against the live engine for the partition and report whether it was
/// accepted. The error string is the engine's message; transport failures
/// surface the same way since both are retried within the worker's budget.
#[async_trait]
pub trait Validate: Send + Sync {
    async fn validate(&self, partition: &str, translation: &str) -> Result<(), String>;
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    valid: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the validation service. Every call is bounded by the
/// configured timeout; a hung engine becomes an ordinary retryable failure.
pub struct ValidatorClient {
    endpoint_url: String,
    http_client: HttpClient,
}

impl ValidatorClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.validator.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint_url: config.validator.endpoint_url.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl Validate for ValidatorClient {
    async fn validate(&self, partition: &str, translation: &str) -> Result<(), String> {
        let response = self
            .http_client
            .post(&self.endpoint_url)
            .json(&json!({
                "partition": partition,
                "translation": translation,
            }))
            .send()
            .await
            .map_err(|e| format!("validation service unreachable: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("validation service error {}: {}", status, text));
        }

        let result: ValidationResponse = response
            .json()
            .await
            .map_err(|e| format!("bad validation response: {}", e))?;

        if result.valid {
            Ok(())
        } else {
            Err(result
                .error
                .unwrap_or_else(|| "query rejected without a message".to_string()))
        }
    }
}
