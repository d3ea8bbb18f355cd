//! Adapter for OpenAI-compatible chat completion endpoints. Covers the
//! hosted OpenAI API, gateways such as OpenRouter, and local servers
//! (llama.cpp, vLLM) that speak the same protocol.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use conductor_core::config::ProviderSpec;

use crate::provider::{InferenceRequest, ProviderClient, ProviderError, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    /// Local servers commonly run without authentication.
    api_key: Option<String>,
    cost_per_1k_tokens: f64,
    timeout_seconds: u64,
    task_types: Vec<String>,
}

impl OpenAiCompatProvider {
    pub fn new(spec: &ProviderSpec, api_key: Option<String>) -> Self {
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
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
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
impl ProviderClient for OpenAiCompatProvider {
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
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(Duration::from_secs(self.timeout_seconds))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let started = Instant::now();
        let response = builder
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("no choices in response".to_string())
            })?;

        // Local servers sometimes omit usage; the call is then free by
        // definition of a zero cost rate, so default to zero tokens.
        let total_tokens = parsed
            .usage
            .map(|u| u.prompt_tokens + u.completion_tokens)
            .unwrap_or(0);

        Ok(ProviderResponse {
            text,
            cost_units: f64::from(total_tokens) / 1000.0 * self.cost_per_1k_tokens,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
