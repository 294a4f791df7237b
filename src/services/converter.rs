use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::json;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::WorkPayload;

/// A failed earlier attempt, fed back into the next conversion request so
/// the gateway can correct the specific mistake. The translation is absent
/// when the failure happened before a candidate existed, or when only the
/// ledgered reason survives.
#[derive(Debug, Clone)]
pub struct PriorAttempt {
    pub translation: Option<String>,
    pub error: String,
}

/// The external conversion capability: given a work item's payload, obtain
/// a candidate translation. Non-deterministic black box.
#[async_trait]
pub trait Convert: Send + Sync {
    async fn convert(
        &self,
        partition: &str,
        payload: &WorkPayload,
        prior: Option<&PriorAttempt>,
    ) -> Result<String, AppError>;
}

/// HTTP client for the conversion gateway.
pub struct ConverterClient {
    gateway_url: String,
    api_key: Option<String>,
    model: String,
    http_client: HttpClient,
}

impl ConverterClient {
    pub fn new(config: &Config) -> Self {
        Self {
            gateway_url: config.converter.gateway_url.clone(),
            api_key: config.converter.api_key.clone(),
            model: config.converter.model.clone(),
            http_client: HttpClient::new(),
        }
    }

    fn build_prompt(&self, partition: &str, payload: &WorkPayload, prior: Option<&PriorAttempt>) -> String {
        let mut prompt = format!(
            r#"You are an expert at translating queries for the '{partition}' dataset.

Question: {question}

Source query:
```
{source_query}
```

Instructions:
1. Return ONLY the translated query, no explanations or markdown formatting
2. The translation must be syntactically valid
3. Use double quotes for strings"#,
            partition = partition,
            question = payload.question,
            source_query = payload.source_query,
        );

        if let Some(prior) = prior {
            prompt.push_str("\n\nA previous attempt failed.");
            if let Some(translation) = &prior.translation {
                prompt.push_str(&format!(
                    "\nPrevious translation:\n```\n{}\n```",
                    translation
                ));
            }
            prompt.push_str(&format!(
                "\nError: {}\n\nFix the issue and provide a corrected translation.",
                prior.error
            ));
        }

        prompt
    }

    async fn call_gateway(&self, prompt: &str) -> Result<String, AppError> {
        if self.gateway_url.is_empty() {
            return Err(AppError::Converter(
                "conversion gateway not configured".to_string(),
            ));
        }

        let mut request = self.http_client.post(&self.gateway_url).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": 2048,
            "temperature": 0.1,
        }));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Converter(format!("Failed to call conversion gateway: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Converter(format!(
                "Conversion gateway returned error {}: {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Converter(format!("Failed to parse gateway response: {}", e)))?;

        let candidate = result["text"]
            .as_str()
            .or_else(|| result["content"].as_str())
            .or_else(|| result["response"].as_str())
            .ok_or_else(|| {
                AppError::Converter("Gateway response does not contain a translation".to_string())
            })?;

        Ok(strip_code_fences(candidate))
    }
}

#[async_trait]
impl Convert for ConverterClient {
    async fn convert(
        &self,
        partition: &str,
        payload: &WorkPayload,
        prior: Option<&PriorAttempt>,
    ) -> Result<String, AppError> {
        let prompt = self.build_prompt(partition, payload, prior);
        self.call_gateway(&prompt).await
    }
}

/// Gateways habitually wrap the answer in a markdown code block despite
/// being told not to.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag on the opening fence, then the closing fence.
    let inner = match inner.split_once('\n') {
        Some((_tag, rest)) => rest,
        None => inner,
    };
    inner.trim_end_matches('`').trim().to_string()
}
