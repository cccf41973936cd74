//! Local inference engine client
//!
//! The control plane never runs models itself. Loading, unloading and chat
//! completions are delegated to an Ollama-compatible engine behind the
//! [`LocalEngine`] trait so the scheduler and router can be exercised against
//! in-process fakes.

pub mod ollama;

pub use ollama::OllamaEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChatMessage, GenerationOptions, TokenUsage};

/// Local engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Engine request timed out")]
    Timeout,

    #[error("Engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid engine response: {0}")]
    InvalidResponse(String),
}

impl EngineError {
    /// True when the engine process itself could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, EngineError::Unreachable { .. })
    }
}

/// Chat request sent to the local engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineChatRequest {
    /// Canonical model name, already resolved by the registry
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Completed chat response from the local engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineChatResponse {
    pub model: String,
    pub message: ChatMessage,
    pub usage: TokenUsage,
    pub total_duration_ms: Option<u64>,
}

/// Abstraction over the process that actually holds model weights
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Run a non-streaming chat completion
    async fn chat(&self, request: &EngineChatRequest) -> Result<EngineChatResponse, EngineError>;

    /// Ask the engine to load a model into accelerator memory
    async fn load(&self, model: &str) -> Result<(), EngineError>;

    /// Ask the engine to release a model's accelerator memory
    async fn unload(&self, model: &str) -> Result<(), EngineError>;

    /// Raw listing of locally available models
    async fn list_models(&self) -> Result<serde_json::Value, EngineError>;

    /// Address used in diagnostics
    fn endpoint(&self) -> &str;
}
