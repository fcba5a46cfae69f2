use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;

use crate::models::{
    CacheError, ANOMALY_DETECTION, AUTOMATED_REPORT, IMAGE_ANALYSIS, LAB_INTERPRETATION,
    LAB_PACKAGE_ANALYSIS, REPORT_SUMMARY, SYMPTOM_ANALYSIS,
};

const MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Upstream model behind the AI cache.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, operation: &str, input: &Value) -> Result<Value, CacheError>;
}

pub struct OpenAiClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(config: &AppConfig) -> Result<Self, CacheError> {
        if config.openai_api_key.is_empty() {
            return Err(CacheError::LlmNotConfigured);
        }

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CacheError::LlmUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn system_prompt(operation: &str) -> &'static str {
    match operation {
        LAB_INTERPRETATION => "You are a clinical laboratory scientist. Interpret the lab results, flag values outside reference ranges and explain them in plain language. Respond with a JSON object.",
        SYMPTOM_ANALYSIS => "You are a triage assistant for a diagnostic centre. Suggest which diagnostic tests are relevant to the reported symptoms. Do not diagnose. Respond with a JSON object.",
        REPORT_SUMMARY => "Summarise the diagnostic report for the patient in plain language. Respond with a JSON object.",
        IMAGE_ANALYSIS => "You assist radiographers. Describe notable findings in the imaging study description. Respond with a JSON object.",
        ANOMALY_DETECTION => "Identify anomalous values or trends in the diagnostic data. Respond with a JSON object.",
        LAB_PACKAGE_ANALYSIS => "Compare the lab test packages and recommend the most suitable one for the stated needs. Respond with a JSON object.",
        AUTOMATED_REPORT => "Draft a structured diagnostic report from the supplied findings. Respond with a JSON object.",
        _ => "You are an assistant for a diagnostic centre. Respond with a JSON object.",
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, operation: &str, input: &Value) -> Result<Value, CacheError> {
        debug!("Calling LLM for {}", operation);

        let prompt = json!({
            "model": MODEL,
            "messages": [
                { "role": "system", "content": system_prompt(operation) },
                { "role": "user", "content": input.to_string() }
            ],
            "temperature": 0.2,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&prompt)
            .send()
            .await
            .map_err(|e| CacheError::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CacheError::LlmUnavailable(format!("OpenAI API returned {}", status)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::LlmInvalidResponse(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CacheError::LlmInvalidResponse(e.to_string()))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CacheError::LlmInvalidResponse("Invalid OpenAI response format".to_string()))?;

        Ok(serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string())))
    }
}
