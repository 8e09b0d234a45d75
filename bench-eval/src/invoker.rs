// Copyright 2025 Longbench Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Model invocation (C5): a thin trait over the chat-completion APIs
//! that answer benchmark prompts, plus the retry policy wrapped around
//! every call.

use async_trait::async_trait;
use bench_core::model::ParsingStatus;
use rand::random;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum InvokerError {
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("model refused to answer")]
    Refused,

    #[error("invalid response shape: {0}")]
    InvalidResponse(String),
}

impl InvokerError {
    /// Map a terminal invoker error to the parsing status recorded for
    /// the question: network/timeout/refusal outcomes never reach the
    /// parser.
    pub fn terminal_status(&self) -> ParsingStatus {
        match self {
            InvokerError::Timeout => ParsingStatus::Timeout,
            InvokerError::Refused => ParsingStatus::Refused,
            InvokerError::Api(_) | InvokerError::RateLimited | InvokerError::InvalidResponse(_) => {
                ParsingStatus::Error
            }
        }
    }
}

/// Trait for chat-completion backed model invokers used by the
/// execution pipeline.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<String, InvokerError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

/// Call `invoker` with exponential backoff; rate limits and API errors
/// retry, timeouts and refusals do not (retrying either wastes the
/// remaining attempt budget on an outcome that will not change).
pub async fn invoke_with_retry(
    invoker: &dyn ModelInvoker,
    system_prompt: &str,
    user_prompt: &str,
    policy: &RetryPolicy,
) -> Result<String, InvokerError> {
    let mut last_error = None;
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
        }
        match invoker.invoke(system_prompt, user_prompt).await {
            Ok(reply) if reply.trim().is_empty() => return Err(InvokerError::Refused),
            Ok(reply) => return Ok(reply),
            Err(e @ (InvokerError::Timeout | InvokerError::Refused)) => return Err(e),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or(InvokerError::Api("exhausted retries with no recorded error".into())))
}

/// Chat-completions client for OpenAI-shaped APIs (OpenAI itself and any
/// OpenAI-compatible gateway).
pub struct OpenAiInvoker {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiInvoker {
    /// `timeout` bounds each individual HTTP call; it is applied at the
    /// `reqwest::Client` level so every retry attempt gets the same budget.
    pub fn new(api_key: String, model: String, temperature: f64, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            temperature,
            max_tokens,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ModelInvoker for OpenAiInvoker {
    async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<String, InvokerError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokerError::Timeout
                } else {
                    InvokerError::Api(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InvokerError::RateLimited);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InvokerError::Api(text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvokerError::InvalidResponse(e.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InvokerError::InvalidResponse("missing choices[0].message.content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Messages-API client for Anthropic-shaped APIs.
pub struct AnthropicInvoker {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicInvoker {
    pub fn new(api_key: String, model: String, temperature: f64, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1".to_string(),
            temperature,
            max_tokens,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ModelInvoker for AnthropicInvoker {
    async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<String, InvokerError> {
        let request = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": [
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.temperature
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokerError::Timeout
                } else {
                    InvokerError::Api(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InvokerError::RateLimited);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InvokerError::Api(text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvokerError::InvalidResponse(e.to_string()))?;

        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InvokerError::InvalidResponse("missing content[0].text".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
