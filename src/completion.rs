//! Chat completion client for the OpenAI API.
//!
//! Sends a single `POST {base_url}/v1/chat/completions` per request with a
//! system and a user message and returns the trimmed content of the first
//! choice. There is no retry: a failed call fails the item, and the next
//! pipeline run is the retry.
//!
//! Any OpenAI-compatible server works by pointing `OPENAI_BASE_URL` at it.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{CompletionConfig, RunConfig};
use crate::error::ServiceError;
use crate::traits::{CompletionClient, CompletionRequest};

const SERVICE: &str = "openai";

/// [`CompletionClient`] backed by the OpenAI chat completions endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ServiceError::transport(SERVICE))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        debug!(
            model = %self.model,
            prompt_chars = request.user.len(),
            "sending chat completion"
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;

        if !resp.status().is_success() {
            return Err(ServiceError::from_response(SERVICE, resp).await);
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse {
                service: SERVICE,
                detail: format!("body is not JSON: {}", e),
            })?;

        let text = parse_chat_response(&json)?;
        debug!(model = %self.model, response_chars = text.len(), "chat completion received");
        Ok(text)
    }
}

/// Extract `choices[0].message.content`, trimmed. Blank content is an
/// [`ServiceError::EmptyResult`].
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ServiceError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| ServiceError::InvalidResponse {
            service: SERVICE,
            detail: "missing choices[0].message.content".into(),
        })?;

    // A `null` content (e.g. a refusal) carries no text.
    let text = content.as_str().unwrap_or_default().trim();
    if text.is_empty() {
        return Err(ServiceError::EmptyResult {
            service: SERVICE,
            what: "completion",
        });
    }
    Ok(text.to_string())
}

/// Build the completion client from configuration.
///
/// # Errors
///
/// [`ServiceError::NotConfigured`] when `OPENAI_API_KEY` is not set.
pub fn create_completion_client(
    completion: &CompletionConfig,
    run: &RunConfig,
) -> Result<Arc<dyn CompletionClient>, ServiceError> {
    let api_key = completion
        .api_key
        .clone()
        .ok_or_else(|| ServiceError::NotConfigured {
            service: SERVICE,
            hint: "set OPENAI_API_KEY".into(),
        })?;
    Ok(Arc::new(OpenAiClient::new(
        &completion.base_url,
        api_key,
        completion.model.clone(),
        Duration::from_secs(run.http_timeout_secs),
    )?))
}
