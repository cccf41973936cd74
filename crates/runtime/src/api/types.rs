//! HTTP API request and response bodies
//!
//! `/api/chat`, `/api/generate` and `/api/tags` follow the Ollama wire shape
//! so existing Ollama clients can point at the control plane unchanged; the
//! responses carry extra routing fields those clients ignore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud::CostSummary;
use crate::models::ModelInfo;
use crate::routing::{RouteAttempt, RoutedResponse, RoutedVia, RoutingMetrics};
use crate::scheduler::{AcceleratorStats, ResidentEntry};
use crate::services::{LogEntry, ServiceCounts, ServiceSnapshot, ServiceState};
use crate::types::{ChatMessage, ErrorStage, GenerationOptions};

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Part of the control plane that failed
    pub stage: ErrorStage,
    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub services: ServiceCounts,
}

/// Full control plane status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub services: Vec<ServiceSnapshot>,
    pub counts: ServiceCounts,
    pub accelerator: AcceleratorStats,
    pub routing: RoutingMetrics,
    pub cloud_providers: Vec<String>,
}

/// A catalogue entry plus whether it currently occupies accelerator memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelView {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub resident: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub default_model: String,
    pub default_footprint_gb: f64,
    pub models: Vec<ModelView>,
}

/// Resolution of a role alias or model name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLookupResponse {
    pub requested: String,
    pub resolved: String,
    /// False when the name is unknown and passed through as given
    pub known: bool,
    pub footprint_gb: f64,
    pub resident: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuResponse {
    #[serde(flatten)]
    pub stats: AcceleratorStats,
    /// Most recently used first
    pub residency: Vec<ResidentEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceActionResponse {
    pub id: String,
    pub action: String,
    pub state: ServiceState,
}

pub type CostsResponse = CostSummary;

/// Ollama-style sampling options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub num_predict: Option<u32>,
}

impl From<EngineOptions> for GenerationOptions {
    fn from(options: EngineOptions) -> Self {
        GenerationOptions {
            temperature: options.temperature,
            max_tokens: options.num_predict,
        }
    }
}

/// `POST /api/chat` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Role alias or model name; empty selects the default model
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Accepted for compatibility; responses are never streamed
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub options: EngineOptions,
    #[serde(default)]
    pub allow_local: Option<bool>,
    #[serde(default)]
    pub allow_cloud: Option<bool>,
}

/// `POST /api/generate` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub options: EngineOptions,
    #[serde(default)]
    pub allow_local: Option<bool>,
    #[serde(default)]
    pub allow_cloud: Option<bool>,
}

impl GenerateRequest {
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_ref().filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Routing details appended to Ollama-shaped responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub request_id: String,
    pub requested: String,
    pub routed_via: RoutedVia,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_reasons: Vec<RouteAttempt>,
}

impl From<&RoutedResponse> for RoutingInfo {
    fn from(r: &RoutedResponse) -> Self {
        Self {
            request_id: r.request_id.clone(),
            requested: r.requested.clone(),
            routed_via: r.routed_via.clone(),
            latency_ms: r.latency_ms,
            cost_usd: r.cost_usd,
            fallback_reasons: r.fallback_reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub message: ChatMessage,
    pub done: bool,
    pub done_reason: String,
    pub prompt_eval_count: u32,
    pub eval_count: u32,
    #[serde(flatten)]
    pub routing: RoutingInfo,
}

impl From<RoutedResponse> for ChatResponse {
    fn from(r: RoutedResponse) -> Self {
        let routing = RoutingInfo::from(&r);
        Self {
            model: r.model,
            created_at: Utc::now(),
            message: r.message,
            done: true,
            done_reason: "stop".to_string(),
            prompt_eval_count: r.usage.prompt_tokens,
            eval_count: r.usage.completion_tokens,
            routing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub response: String,
    pub done: bool,
    pub done_reason: String,
    pub prompt_eval_count: u32,
    pub eval_count: u32,
    #[serde(flatten)]
    pub routing: RoutingInfo,
}

impl From<RoutedResponse> for GenerateResponse {
    fn from(r: RoutedResponse) -> Self {
        let routing = RoutingInfo::from(&r);
        Self {
            model: r.model,
            created_at: Utc::now(),
            response: r.message.content,
            done: true,
            done_reason: "stop".to_string(),
            prompt_eval_count: r.usage.prompt_tokens,
            eval_count: r.usage.completion_tokens,
            routing,
        }
    }
}
