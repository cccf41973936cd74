//! Cloud fallback client
//!
//! Tries the configured providers in preference order and stops at the first
//! success. Every skipped or failed provider contributes one
//! [`ProviderError`] so callers can report exactly why the cloud stage
//! failed.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use super::ledger::{CostEntry, CostLedger};
use super::{CloudResponse, ProviderError};
use crate::config::{CloudConfig, ProviderConfig, ProviderKind};
use crate::types::{ChatMessage, GenerationOptions, TokenUsage};

const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct CloudFallbackClient {
    client: reqwest::Client,
    providers: Vec<ProviderConfig>,
    ledger: Arc<CostLedger>,
}

impl CloudFallbackClient {
    pub fn new(config: &CloudConfig, ledger: Arc<CostLedger>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Request {
                provider: "<client>".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            providers: config.providers.clone(),
            ledger,
        })
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Providers whose credentials are currently resolvable
    pub fn configured_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.credentials().is_some())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Send a chat to the first provider that answers.
    ///
    /// Never fails outright: with no usable provider the result is
    /// `(None, errors)` with one entry per provider, or a single
    /// [`ProviderError::NoProvidersConfigured`].
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> (Option<CloudResponse>, Vec<ProviderError>) {
        if self.providers.is_empty() {
            return (None, vec![ProviderError::NoProvidersConfigured]);
        }

        let mut errors = Vec::new();
        for provider in &self.providers {
            let Some(api_key) = provider.credentials() else {
                tracing::debug!("Skipping cloud provider {}: no credentials", provider.name);
                errors.push(ProviderError::CredentialsMissing {
                    provider: provider.name.clone(),
                });
                continue;
            };

            match self.call(provider, &api_key, messages, options).await {
                Ok(response) => {
                    self.ledger.record(CostEntry {
                        provider: response.provider.clone(),
                        model: response.model.clone(),
                        prompt_tokens: response.usage.prompt_tokens,
                        completion_tokens: response.usage.completion_tokens,
                        cost_usd: response.cost_usd,
                        timestamp: chrono::Utc::now(),
                    });
                    return (Some(response), errors);
                }
                Err(e) => {
                    tracing::warn!("Cloud provider {} failed: {}", provider.name, e);
                    errors.push(e);
                }
            }
        }

        (None, errors)
    }

    async fn call(
        &self,
        provider: &ProviderConfig,
        api_key: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<CloudResponse, ProviderError> {
        let start = Instant::now();

        let request = match provider.kind {
            ProviderKind::OpenAi => self
                .client
                .post(format!("{}/chat/completions", provider.base_url()))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&build_openai_body(&provider.model, messages, options)),
            ProviderKind::Anthropic => self
                .client
                .post(format!("{}/messages", provider.base_url()))
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&build_anthropic_body(&provider.model, messages, options)),
        };

        let response = request
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: provider.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Status {
                provider: provider.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: provider.name.clone(),
                reason: e.to_string(),
            })?;

        let parsed = match provider.kind {
            ProviderKind::OpenAi => parse_openai_response(&body),
            ProviderKind::Anthropic => parse_anthropic_response(&body),
        }
        .map_err(|reason| ProviderError::InvalidResponse {
            provider: provider.name.clone(),
            reason,
        })?;

        let (content, usage) = parsed;
        let latency = start.elapsed();
        let cost_usd = provider
            .pricing
            .cost(usage.prompt_tokens, usage.completion_tokens);

        tracing::info!(
            "Cloud usage: provider={} model={} prompt_tokens={} completion_tokens={} cost_usd={:.6} latency={:?}",
            provider.name,
            provider.model,
            usage.prompt_tokens,
            usage.completion_tokens,
            cost_usd,
            latency,
        );

        Ok(CloudResponse {
            provider: provider.name.clone(),
            model: provider.model.clone(),
            message: ChatMessage::assistant(content),
            usage,
            cost_usd,
            latency_ms: latency.as_millis() as u64,
        })
    }
}

fn build_openai_body(model: &str, messages: &[ChatMessage], options: &GenerationOptions) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Anthropic takes system prompts out of band.
fn build_anthropic_body(
    model: &str,
    messages: &[ChatMessage],
    options: &GenerationOptions,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.is_system())
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| !m.is_system()).collect();

    let mut body = json!({
        "model": model,
        "messages": turns,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn token_count(usage: Option<&Value>, key: &str) -> u32 {
    usage
        .and_then(|u| u.get(key))
        .and_then(|v| v.as_u64())
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn parse_openai_response(body: &Value) -> Result<(String, TokenUsage), String> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| "No content in response choices".to_string())?;

    let usage = body.get("usage");
    Ok((
        content.to_string(),
        TokenUsage::new(
            token_count(usage, "prompt_tokens"),
            token_count(usage, "completion_tokens"),
        ),
    ))
}

fn parse_anthropic_response(body: &Value) -> Result<(String, TokenUsage), String> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| "No content in response".to_string())?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err("No text content in response".to_string());
    }

    let usage = body.get("usage");
    Ok((
        text.join("\n"),
        TokenUsage::new(
            token_count(usage, "input_tokens"),
            token_count(usage, "output_tokens"),
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pricing;

    fn provider(name: &str, kind: ProviderKind, api_key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind,
            model: "test-model".to_string(),
            base_url: Some("http://127.0.0.1:1".to_string()),
            api_key: api_key.map(str::to_string),
            api_key_env: Some("KILN_TEST_NEVER_SET_API_KEY".to_string()),
            pricing: Pricing::default(),
        }
    }

    fn client_with(providers: Vec<ProviderConfig>) -> CloudFallbackClient {
        let config = CloudConfig {
            providers,
            ..CloudConfig::default()
        };
        CloudFallbackClient::new(&config, Arc::new(CostLedger::in_memory())).unwrap()
    }

    #[tokio::test]
    async fn test_zero_providers_degrades_gracefully() {
        let client = client_with(Vec::new());
        let (response, errors) = client
            .chat(&[ChatMessage::user("hello")], &GenerationOptions::default())
            .await;
        assert!(response.is_none());
        assert!(matches!(errors[..], [ProviderError::NoProvidersConfigured]));
    }

    #[tokio::test]
    async fn test_missing_credentials_are_skipped_and_recorded() {
        let client = client_with(vec![
            provider("openai", ProviderKind::OpenAi, None),
            provider("anthropic", ProviderKind::Anthropic, Some("  ")),
        ]);

        for prompt in ["hello", "", "summarise this"] {
            let (response, errors) = client
                .chat(&[ChatMessage::user(prompt)], &GenerationOptions::default())
                .await;
            assert!(response.is_none());
            assert_eq!(errors.len(), 2);
            assert!(errors
                .iter()
                .all(|e| matches!(e, ProviderError::CredentialsMissing { .. })));
        }
        assert!(client.ledger().is_empty());
        assert!(client.configured_providers().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_reported() {
        let client = client_with(vec![provider("openai", ProviderKind::OpenAi, Some("sk-test"))]);
        let (response, errors) = client
            .chat(&[ChatMessage::user("hello")], &GenerationOptions::default())
            .await;
        assert!(response.is_none());
        assert!(matches!(errors[..], [ProviderError::Request { .. }]));
        assert_eq!(errors[0].provider(), Some("openai"));
    }

    #[test]
    fn test_anthropic_body_lifts_system_prompt() {
        let messages = vec![
            ChatMessage::system("Be terse."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Status?"),
        ];
        let body = build_anthropic_body("claude-3-5-haiku-latest", &messages, &GenerationOptions::default());
        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_openai_body_forwards_options() {
        let options = GenerationOptions {
            temperature: Some(0.5),
            max_tokens: Some(256),
        };
        let body = build_openai_body("gpt-4o-mini", &[ChatMessage::user("Hi")], &options);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_parse_openai_response() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });
        let (content, usage) = parse_openai_response(&body).unwrap();
        assert_eq!(content, "Paris");
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_oversized_token_counts_saturate() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "…" } }],
            "usage": { "prompt_tokens": 5_000_000_000u64, "completion_tokens": 7 }
        });
        let (_, usage) = parse_openai_response(&body).unwrap();
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_parse_anthropic_response() {
        let body = json!({
            "content": [
                { "type": "text", "text": "Hello" },
                { "type": "text", "text": "world" }
            ],
            "usage": { "input_tokens": 20, "output_tokens": 4 }
        });
        let (content, usage) = parse_anthropic_response(&body).unwrap();
        assert_eq!(content, "Hello\nworld");
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 4);

        assert!(parse_anthropic_response(&json!({ "content": [] })).is_err());
    }
}
