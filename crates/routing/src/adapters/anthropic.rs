//! Adapter for the Anthropic Messages API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use conductor_core::config::ProviderSpec;

use crate::provider::{InferenceRequest, ProviderClient, ProviderError, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    api_key: String,
    cost_per_1k_tokens: f64,
    timeout_seconds: u64,
    task_types: Vec<String>,
}

impl AnthropicProvider {
    pub fn new(spec: &ProviderSpec, api_key: String) -> Self {
        Self {
            client: Client::new(),
            name: spec.name.clone(),
            model: spec.model.clone(),
            base_url: spec
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            cost_per_1k_tokens: spec.cost_per_1k_tokens,
            timeout_seconds: spec.timeout_seconds,
            task_types: spec.task_types.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens
    }

    fn preferred_task_types(&self) -> &[String] {
        &self.task_types
    }

    async fn call(&self, request: &InferenceRequest) -> Result<ProviderResponse, ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout_seconds))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(err) => err.error.message,
                Err(e) => format!("unparseable error body: {e}"),
            };
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "response contained no text blocks".to_string(),
            ));
        }

        let total_tokens = parsed.usage.input_tokens + parsed.usage.output_tokens;
        Ok(ProviderResponse {
            text,
            cost_units: f64::from(total_tokens) / 1000.0 * self.cost_per_1k_tokens,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
