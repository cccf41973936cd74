//! Inference router: local first, cloud as fallback

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{RouteAttempt, RoutingError};
use super::metrics::{RouterMetrics, RoutingMetrics};
use crate::cloud::CloudFallbackClient;
use crate::config::RoutingConfig;
use crate::engine::{EngineChatRequest, EngineError, LocalEngine};
use crate::models::ModelCatalog;
use crate::scheduler::AcceleratorScheduler;
use crate::types::{ChatMessage, ErrorStage, GenerationOptions, TokenUsage};

/// Per-request routing switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOptions {
    #[serde(default = "default_true")]
    pub allow_local: bool,
    #[serde(default = "default_true")]
    pub allow_cloud: bool,
    #[serde(default)]
    pub generation: GenerationOptions,
    /// Overrides the configured local timeout
    #[serde(default, with = "humantime_serde")]
    pub local_timeout: Option<Duration>,
}

fn default_true() -> bool {
    true
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            allow_local: true,
            allow_cloud: true,
            generation: GenerationOptions::default(),
            local_timeout: None,
        }
    }
}

/// Which backend served a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RoutedVia {
    Local,
    Cloud { provider: String },
}

impl std::fmt::Display for RoutedVia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutedVia::Local => write!(f, "local"),
            RoutedVia::Cloud { provider } => write!(f, "cloud:{}", provider),
        }
    }
}

/// Completed routed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedResponse {
    pub request_id: String,
    /// Role alias or model name as supplied by the caller
    pub requested: String,
    /// Model that produced the answer
    pub model: String,
    pub message: ChatMessage,
    pub usage: TokenUsage,
    pub routed_via: RoutedVia,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Backends that failed before the one that answered
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_reasons: Vec<RouteAttempt>,
}

/// Request entry point of the control plane
pub struct InferenceRouter {
    config: RoutingConfig,
    catalog: Arc<ModelCatalog>,
    scheduler: Arc<AcceleratorScheduler>,
    engine: Arc<dyn LocalEngine>,
    cloud: Arc<CloudFallbackClient>,
    metrics: RouterMetrics,
}

impl InferenceRouter {
    pub fn new(
        config: RoutingConfig,
        catalog: Arc<ModelCatalog>,
        scheduler: Arc<AcceleratorScheduler>,
        engine: Arc<dyn LocalEngine>,
        cloud: Arc<CloudFallbackClient>,
    ) -> Self {
        Self {
            config,
            catalog,
            scheduler,
            engine,
            cloud,
            metrics: RouterMetrics::new(),
        }
    }

    /// Route a chat request.
    ///
    /// An empty `role_or_name` selects the catalog's default model.
    pub async fn route(
        &self,
        role_or_name: &str,
        messages: Vec<ChatMessage>,
        options: RouteOptions,
    ) -> Result<RoutedResponse, RoutingError> {
        self.metrics.record_request();
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();

        if messages.is_empty() {
            self.metrics.record_failure();
            return Err(RoutingError::InvalidRequest {
                reason: "at least one message is required".to_string(),
            });
        }

        let requested = if role_or_name.trim().is_empty() {
            self.catalog.get_default_model()
        } else {
            role_or_name
        };
        let model = self.catalog.resolve(requested);
        let mut attempts = Vec::new();

        if options.allow_local {
            match self.try_local(&model, &messages, &options).await {
                Ok((message, usage)) => {
                    let latency = start.elapsed();
                    self.metrics.record_local_success(latency);
                    tracing::info!(
                        "Routed request {} ({} -> {}) locally in {:?}",
                        request_id,
                        requested,
                        model,
                        latency
                    );
                    return Ok(RoutedResponse {
                        request_id,
                        requested: requested.to_string(),
                        model,
                        message,
                        usage,
                        routed_via: RoutedVia::Local,
                        latency_ms: latency.as_millis() as u64,
                        cost_usd: None,
                        fallback_reasons: Vec::new(),
                    });
                }
                Err(attempt) => {
                    if attempt.stage == ErrorStage::Capacity {
                        self.metrics.record_capacity_rejection();
                    }
                    tracing::warn!("Local attempt for request {} failed: {}", request_id, attempt);
                    attempts.push(attempt);
                }
            }
        } else {
            attempts.push(RouteAttempt::skipped(
                ErrorStage::Local,
                model.clone(),
                "local inference disabled for this request",
            ));
        }

        if options.allow_cloud && self.config.cloud_fallback {
            let (response, errors) = self.cloud.chat(&messages, &options.generation).await;
            attempts.extend(errors.into_iter().map(RouteAttempt::from));

            if let Some(response) = response {
                let latency = start.elapsed();
                self.metrics.record_cloud_fallback(latency);
                tracing::info!(
                    "Routed request {} ({}) to cloud provider {} in {:?}",
                    request_id,
                    requested,
                    response.provider,
                    latency
                );
                return Ok(RoutedResponse {
                    request_id,
                    requested: requested.to_string(),
                    model: response.model,
                    message: response.message,
                    usage: response.usage,
                    routed_via: RoutedVia::Cloud {
                        provider: response.provider,
                    },
                    latency_ms: latency.as_millis() as u64,
                    cost_usd: Some(response.cost_usd),
                    fallback_reasons: attempts,
                });
            }
        } else {
            attempts.push(RouteAttempt::skipped(
                ErrorStage::Cloud,
                "cloud",
                "cloud fallback disabled",
            ));
        }

        self.metrics.record_failure();
        let error = RoutingError::AllRoutesExhausted { attempts };
        tracing::error!("Request {} failed: {}", request_id, error);
        Err(error)
    }

    /// One local attempt. Capacity is reserved for the duration of the call
    /// and released again unless the engine answers in time.
    async fn try_local(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RouteOptions,
    ) -> Result<(ChatMessage, TokenUsage), RouteAttempt> {
        let reservation = self
            .scheduler
            .acquire(model)
            .await
            .map_err(|e| RouteAttempt::failed(ErrorStage::Capacity, model, e.to_string()))?;

        let request = EngineChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            options: options.generation.clone(),
        };

        let timeout = options.local_timeout.unwrap_or(self.config.local_timeout);
        match tokio::time::timeout(timeout, self.engine.chat(&request)).await {
            Ok(Ok(response)) => {
                reservation.confirm();
                Ok((response.message, response.usage))
            }
            Ok(Err(e @ EngineError::Unreachable { .. })) => Err(RouteAttempt::unreachable(
                ErrorStage::Local,
                model,
                e.to_string(),
            )),
            Ok(Err(e)) => Err(RouteAttempt::failed(ErrorStage::Local, model, e.to_string())),
            Err(_) => Err(RouteAttempt::failed(
                ErrorStage::Local,
                model,
                format!("no response within {:?}", timeout),
            )),
        }
    }

    /// Passthrough listing of models the local engine has available
    pub async fn list_local_models(&self) -> Result<serde_json::Value, EngineError> {
        self.engine.list_models().await
    }

    pub fn metrics(&self) -> RoutingMetrics {
        self.metrics.snapshot()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CostLedger;
    use crate::config::{AcceleratorConfig, CloudConfig, TelemetryConfig};
    use crate::engine::EngineChatResponse;
    use crate::models::{ModelCatalogFile, ModelInfo};
    use crate::scheduler::DisabledTelemetry;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    enum Behaviour {
        Answer,
        Fail,
        Hang,
    }

    struct FakeEngine {
        behaviour: Behaviour,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocalEngine for FakeEngine {
        async fn chat(
            &self,
            request: &EngineChatRequest,
        ) -> Result<EngineChatResponse, EngineError> {
            self.calls.lock().push(request.model.clone());
            match self.behaviour {
                Behaviour::Answer => Ok(EngineChatResponse {
                    model: request.model.clone(),
                    message: ChatMessage::assistant("42"),
                    usage: TokenUsage::new(10, 2),
                    total_duration_ms: Some(5),
                }),
                Behaviour::Fail => Err(EngineError::Unreachable {
                    url: "http://127.0.0.1:11434".to_string(),
                    reason: "connection refused".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(EngineError::Timeout)
                }
            }
        }

        async fn load(&self, _model: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn unload(&self, _model: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn list_models(&self) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!({ "models": [{ "name": "qwen2.5:14b" }] }))
        }

        fn endpoint(&self) -> &str {
            "memory://fake"
        }
    }

    struct Harness {
        router: InferenceRouter,
        scheduler: Arc<AcceleratorScheduler>,
        engine: Arc<FakeEngine>,
    }

    fn harness(behaviour: Behaviour, total_capacity_gb: f64) -> Harness {
        let catalog = Arc::new(
            ModelCatalog::new(ModelCatalogFile {
                default_model: "qwen2.5:14b".to_string(),
                default_footprint_gb: 4.0,
                models: vec![
                    ModelInfo {
                        name: "qwen2.5:14b".to_string(),
                        roles: vec!["reasoning".to_string()],
                        footprint_gb: 10.0,
                        always_resident: false,
                        description: None,
                    },
                    ModelInfo {
                        name: "qwen2.5:72b".to_string(),
                        roles: vec!["heavy".to_string()],
                        footprint_gb: 40.0,
                        always_resident: false,
                        description: None,
                    },
                ],
            })
            .unwrap(),
        );
        let engine = Arc::new(FakeEngine {
            behaviour,
            calls: Mutex::new(Vec::new()),
        });
        let scheduler = Arc::new(AcceleratorScheduler::new(
            AcceleratorConfig {
                total_capacity_gb,
                reserved_headroom_gb: 1.0,
                preload_always_resident: false,
                telemetry: TelemetryConfig::default(),
            },
            catalog.clone(),
            engine.clone(),
            Arc::new(DisabledTelemetry),
        ));
        let cloud = Arc::new(
            CloudFallbackClient::new(&CloudConfig::default(), Arc::new(CostLedger::in_memory()))
                .unwrap(),
        );
        let router = InferenceRouter::new(
            RoutingConfig::default(),
            catalog,
            scheduler.clone(),
            engine.clone(),
            cloud,
        );
        Harness {
            router,
            scheduler,
            engine,
        }
    }

    #[tokio::test]
    async fn test_local_success_with_resident_model() {
        let h = harness(Behaviour::Answer, 24.0);
        h.scheduler.mark_resident("qwen2.5:14b").await.unwrap();

        let response = h
            .router
            .route("reasoning", vec![ChatMessage::user("6 x 7?")], RouteOptions::default())
            .await
            .unwrap();

        assert_eq!(response.routed_via, RoutedVia::Local);
        assert_eq!(response.model, "qwen2.5:14b");
        assert_eq!(response.message.content, "42");

        let metrics = h.router.metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.local_success, 1);
        assert_eq!(metrics.cloud_fallback, 0);
    }

    #[tokio::test]
    async fn test_empty_role_uses_default_model() {
        let h = harness(Behaviour::Answer, 24.0);
        let response = h
            .router
            .route("", vec![ChatMessage::user("hi")], RouteOptions::default())
            .await
            .unwrap();
        assert_eq!(response.model, "qwen2.5:14b");
        assert!(h.scheduler.is_resident("qwen2.5:14b"));
    }

    #[tokio::test]
    async fn test_literal_model_names_pass_through() {
        let h = harness(Behaviour::Answer, 24.0);
        let response = h
            .router
            .route("llama3.1:8b", vec![ChatMessage::user("hi")], RouteOptions::default())
            .await
            .unwrap();
        assert_eq!(response.model, "llama3.1:8b");
        assert_eq!(*h.engine.calls.lock(), vec!["llama3.1:8b".to_string()]);
    }

    #[tokio::test]
    async fn test_engine_failure_lists_every_attempt() {
        let h = harness(Behaviour::Fail, 24.0);
        let err = h
            .router
            .route("reasoning", vec![ChatMessage::user("hi")], RouteOptions::default())
            .await
            .unwrap_err();

        let attempts = err.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].stage, ErrorStage::Local);
        assert!(attempts[0].reason.contains("connection refused"));
        assert_eq!(attempts[1].stage, ErrorStage::Cloud);
        assert_eq!(err.stage(), ErrorStage::Local);
        assert!(attempts[0].unreachable);
        assert!(err.is_unavailable());

        // The failed load must not keep capacity booked
        assert!(h.scheduler.residency().is_empty());
        assert_eq!(h.router.metrics().failed, 1);
    }

    #[tokio::test]
    async fn test_timed_out_local_attempt_releases_reservation() {
        let h = harness(Behaviour::Hang, 24.0);
        let options = RouteOptions {
            local_timeout: Some(Duration::from_millis(50)),
            ..RouteOptions::default()
        };

        let err = h
            .router
            .route("reasoning", vec![ChatMessage::user("hi")], options)
            .await
            .unwrap_err();

        assert!(err.attempts()[0].reason.contains("no response within"));
        assert!(h.scheduler.residency().is_empty());
        assert_eq!(h.scheduler.free_budget_gb(), 23.0);
    }

    #[tokio::test]
    async fn test_capacity_exhausted_is_reported_with_capacity_stage() {
        let h = harness(Behaviour::Answer, 24.0);
        let err = h
            .router
            .route("heavy", vec![ChatMessage::user("hi")], RouteOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), ErrorStage::Capacity);
        assert!(h.engine.calls.lock().is_empty());
        let metrics = h.router.metrics();
        assert_eq!(metrics.capacity_rejections, 1);
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_local_disabled_skips_engine() {
        let h = harness(Behaviour::Answer, 24.0);
        let options = RouteOptions {
            allow_local: false,
            ..RouteOptions::default()
        };
        let err = h
            .router
            .route("reasoning", vec![ChatMessage::user("hi")], options)
            .await
            .unwrap_err();

        assert!(h.engine.calls.lock().is_empty());
        assert!(err.attempts().iter().all(|a| a.skipped));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let h = harness(Behaviour::Answer, 24.0);
        let err = h
            .router
            .route("reasoning", Vec::new(), RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidRequest { .. }));
        assert_eq!(h.router.metrics().total_requests, 1);
    }
}
