/// Client for OpenAI-compatible `/chat/completions` endpoints.
///
/// The default configuration points at Gemini's OpenAI-compatible surface;
/// any provider speaking the same protocol works.
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{CompletionService, LlmError, Message, ResponseSchema, parse_json_reply};
use crate::config::LlmConfig;

pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    reasoning_effort: Option<String>,
}

impl OpenAiClient {
    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::MissingApiKey(config.api_key_env.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(format!("client build failed: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            reasoning_effort: config.reasoning_effort.clone(),
        })
    }

    fn payload(&self, messages: &[Message], schema: Option<&ResponseSchema>) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(obj) = payload.as_object_mut() {
            if let Some(effort) = &self.reasoning_effort {
                obj.insert("reasoning_effort".to_string(), json!(effort));
            }
            if let Some(schema) = schema {
                obj.insert(
                    "response_format".to_string(),
                    json!({
                        "type": "json_schema",
                        "json_schema": {
                            "name": schema.name,
                            "schema": schema.schema,
                            "strict": true,
                        }
                    }),
                );
            }
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body_bytes).into_owned(),
            });
        }

        let value: Value = serde_json::from_slice(&body_bytes)?;
        extract_content(&value)
    }
}

/// Pull `choices[0].message.content` out of a chat completion body.
fn extract_content(body: &Value) -> Result<String, LlmError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or(LlmError::EmptyResponse)
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        debug!("Chat completion with {} messages", messages.len());
        let payload = self.payload(messages, None);
        self.send(&payload).await
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<Value, LlmError> {
        debug!("Structured completion ({})", schema.name);
        let payload = self.payload(messages, Some(schema));
        let text = self.send(&payload).await?;
        parse_json_reply(&text)
    }
}
