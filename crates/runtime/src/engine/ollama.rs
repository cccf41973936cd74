//! Ollama-compatible HTTP engine client

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;

use super::{EngineChatRequest, EngineChatResponse, EngineError, LocalEngine};
use crate::config::EngineConfig;
use crate::types::{ChatMessage, TokenUsage};

/// Client for an engine speaking the Ollama REST API
pub struct OllamaEngine {
    client: reqwest::Client,
    base_url: String,
    keep_alive: String,
}

impl OllamaEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EngineError::InvalidResponse(format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout
        } else {
            EngineError::Unreachable {
                url: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, EngineError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
    }
}

/// Extract the completion and token counts from an `/api/chat` response body.
fn parse_chat_response(model: &str, body: &Value) -> Result<EngineChatResponse, EngineError> {
    let message = body
        .get("message")
        .ok_or_else(|| EngineError::InvalidResponse("Missing 'message' field".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| EngineError::InvalidResponse("Missing message content".to_string()))?;
    let role = message
        .get("role")
        .and_then(|r| r.as_str())
        .unwrap_or("assistant");

    let count = |key: &str| {
        body.get(key)
            .and_then(|v| v.as_u64())
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0)
    };

    Ok(EngineChatResponse {
        model: body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string(),
        message: ChatMessage::new(role, content),
        usage: TokenUsage::new(count("prompt_eval_count"), count("eval_count")),
        // Ollama reports durations in nanoseconds
        total_duration_ms: body
            .get("total_duration")
            .and_then(|v| v.as_u64())
            .map(|ns| ns / 1_000_000),
    })
}

#[async_trait]
impl LocalEngine for OllamaEngine {
    async fn chat(&self, request: &EngineChatRequest) -> Result<EngineChatResponse, EngineError> {
        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.options.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.options.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }

        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "keep_alive": self.keep_alive,
            "options": options,
        });

        let start = Instant::now();
        let response = self.post("/api/chat", &body).await?;
        let parsed = parse_chat_response(&request.model, &response)?;

        tracing::debug!(
            "Engine chat: model={} prompt_tokens={} completion_tokens={} latency={:?}",
            parsed.model,
            parsed.usage.prompt_tokens,
            parsed.usage.completion_tokens,
            start.elapsed(),
        );

        Ok(parsed)
    }

    async fn load(&self, model: &str) -> Result<(), EngineError> {
        // An empty generate request loads the model without producing tokens.
        let body = json!({ "model": model, "prompt": "", "keep_alive": self.keep_alive });
        self.post("/api/generate", &body).await?;
        tracing::info!("Loaded model {} into engine", model);
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<(), EngineError> {
        let body = json!({ "model": model, "prompt": "", "keep_alive": 0 });
        self.post("/api/generate", &body).await?;
        tracing::info!("Unloaded model {} from engine", model);
        Ok(())
    }

    async fn list_models(&self) -> Result<Value, EngineError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}
