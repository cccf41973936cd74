//! End-to-end tests for the control plane
//!
//! The local engine and the cloud provider are in-process axum servers bound
//! to ephemeral ports, so requests travel over real HTTP.

#![cfg(feature = "http-api")]

use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use kiln_runtime::cloud::CostLedger;
use kiln_runtime::config::{KilnConfig, Pricing, ProviderConfig, ProviderKind};
use kiln_runtime::models::{ModelCatalog, ModelCatalogFile, ModelInfo};
use kiln_runtime::routing::RoutedVia;
use kiln_runtime::scheduler::DisabledTelemetry;
use kiln_runtime::services::ServicesFile;
use kiln_runtime::types::{ChatMessage, ErrorStage, KilnError};
use kiln_runtime::{ControlPlane, RouteOptions};

async fn spawn_mock(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Ollama stand-in that counts chat calls
async fn mock_engine(chats: Arc<AtomicUsize>) -> String {
    let router = Router::new()
        .route(
            "/api/chat",
            post(move |Json(body): Json<Value>| {
                let chats = chats.clone();
                async move {
                    chats.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "model": body["model"],
                        "message": {"role": "assistant", "content": "local answer"},
                        "done": true,
                        "prompt_eval_count": 12,
                        "eval_count": 4
                    }))
                }
            }),
        )
        .route("/api/generate", post(|| async { Json(json!({"done": true})) }))
        .route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "qwen2.5:14b"}]})) }),
        );
    spawn_mock(router).await
}

async fn mock_openai() -> String {
    let router = Router::new().route(
        "/chat/completions",
        post(|Json(body): Json<Value>| async move {
            Json(json!({
                "model": body["model"],
                "choices": [{"message": {"role": "assistant", "content": "cloud answer"}}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
            }))
        }),
    );
    spawn_mock(router).await
}

async fn failing_openai() -> String {
    let router = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
    );
    spawn_mock(router).await
}

fn catalog() -> ModelCatalog {
    ModelCatalog::new(ModelCatalogFile {
        default_model: "qwen2.5:14b".to_string(),
        default_footprint_gb: 4.0,
        models: vec![
            ModelInfo {
                name: "qwen2.5:14b".to_string(),
                roles: vec!["reasoning".to_string()],
                footprint_gb: 9.0,
                always_resident: true,
                description: None,
            },
            ModelInfo {
                name: "llama3.2:3b".to_string(),
                roles: vec!["fast".to_string()],
                footprint_gb: 2.5,
                always_resident: false,
                description: None,
            },
        ],
    })
    .unwrap()
}

fn provider(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        name: "openai".to_string(),
        kind: ProviderKind::OpenAi,
        model: "gpt-4o-mini".to_string(),
        base_url: Some(base_url.to_string()),
        api_key: Some("sk-test".to_string()),
        api_key_env: None,
        pricing: Pricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    }
}

fn plane(config: KilnConfig) -> ControlPlane {
    ControlPlane::builder(config, catalog(), ServicesFile::default())
        .telemetry(Arc::new(DisabledTelemetry))
        .ledger(Arc::new(CostLedger::in_memory()))
        .build()
        .unwrap()
}

fn question() -> Vec<ChatMessage> {
    vec![ChatMessage::user("What is 6 x 7?")]
}

#[tokio::test]
async fn test_resident_model_is_served_locally() {
    let chats = Arc::new(AtomicUsize::new(0));
    let mut config = KilnConfig::default();
    config.engine.base_url = mock_engine(chats.clone()).await;
    let plane = plane(config);

    plane.scheduler().mark_resident("qwen2.5:14b").await.unwrap();
    let before = plane.router().metrics();

    let response = plane
        .router()
        .route("reasoning", question(), RouteOptions::default())
        .await
        .unwrap();

    assert_eq!(response.routed_via, RoutedVia::Local);
    assert_eq!(response.model, "qwen2.5:14b");
    assert_eq!(response.message.content, "local answer");
    assert_eq!(response.usage.total_tokens, 16);
    assert_eq!(chats.load(Ordering::SeqCst), 1);

    let after = plane.router().metrics();
    assert_eq!(after.local_success, before.local_success + 1);
    assert_eq!(after.cloud_fallback, before.cloud_fallback);
    assert!(plane.cloud().ledger().is_empty());
}

#[tokio::test]
async fn test_unreachable_engine_falls_back_to_cloud() {
    let mut config = KilnConfig::default();
    config.engine.base_url = "http://127.0.0.1:1".to_string();
    config.cloud.providers = vec![provider(&mock_openai().await)];
    let plane = plane(config);

    let response = plane
        .router()
        .route("fast", question(), RouteOptions::default())
        .await
        .unwrap();

    assert_eq!(
        response.routed_via,
        RoutedVia::Cloud {
            provider: "openai".to_string()
        }
    );
    assert_eq!(response.message.content, "cloud answer");
    assert_eq!(response.fallback_reasons.len(), 1);
    assert_eq!(response.fallback_reasons[0].stage, ErrorStage::Local);

    let metrics = plane.router().metrics();
    assert_eq!(metrics.cloud_fallback, 1);
    assert_eq!(metrics.local_success, 0);

    let ledger = plane.cloud().ledger();
    assert_eq!(ledger.len(), 1);
    let today = ledger.get_costs_today();
    assert_eq!(today.calls, 1);
    // 1000 * 0.15 / 1M + 500 * 0.60 / 1M
    assert!((today.total_usd - 0.00045).abs() < 1e-12);

    // The failed local attempt must not leave capacity booked
    assert!(plane.scheduler().residency().is_empty());
}

#[tokio::test]
async fn test_cloud_answer_is_not_held_by_a_stalled_ledger_writer() {
    let mut config = KilnConfig::default();
    config.engine.base_url = "http://127.0.0.1:1".to_string();
    config.cloud.providers = vec![provider(&mock_openai().await)];

    // The reader half is never polled, so the first append fills the pipe
    let (sink, _reader) = tokio::io::duplex(8);
    let plane = ControlPlane::builder(config, catalog(), ServicesFile::default())
        .telemetry(Arc::new(DisabledTelemetry))
        .ledger(Arc::new(CostLedger::with_sink(sink).unwrap()))
        .build()
        .unwrap();

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        plane.router().route("fast", question(), RouteOptions::default()),
    )
    .await
    .expect("routing must not wait on the ledger writer")
    .unwrap();

    assert!(matches!(response.routed_via, RoutedVia::Cloud { .. }));
    assert_eq!(plane.cloud().ledger().len(), 1);
}

#[tokio::test]
async fn test_every_backend_failing_reports_each_attempt() {
    let mut config = KilnConfig::default();
    config.engine.base_url = "http://127.0.0.1:1".to_string();
    config.cloud.providers = vec![provider(&failing_openai().await)];
    let plane = plane(config);

    let err = plane
        .router()
        .route("fast", question(), RouteOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.attempts().len(), 2);
    assert_eq!(err.stage(), ErrorStage::Cloud);
    assert!(!err.is_unavailable());
    assert!(plane.cloud().ledger().is_empty());
    assert_eq!(plane.router().metrics().failed, 1);
}

#[tokio::test]
async fn test_oversized_model_is_rejected_for_capacity() {
    let chats = Arc::new(AtomicUsize::new(0));
    let mut config = KilnConfig::default();
    config.engine.base_url = mock_engine(chats.clone()).await;
    config.accelerator.total_capacity_gb = 12.0;
    config.accelerator.reserved_headroom_gb = 1.0;
    let plane = plane(config);

    // 9 GB pinned, 2 GB left and nothing evictable
    plane.scheduler().mark_resident("qwen2.5:14b").await.unwrap();
    let options = RouteOptions {
        allow_cloud: false,
        ..RouteOptions::default()
    };
    let err = plane
        .router()
        .route("fast", question(), options)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), ErrorStage::Capacity);
    assert!(err.is_unavailable());
    assert_eq!(chats.load(Ordering::SeqCst), 0);
    assert_eq!(plane.router().metrics().capacity_rejections, 1);
    assert!(plane.scheduler().is_resident("qwen2.5:14b"));

    let kiln_err = KilnError::from(err);
    assert_eq!(kiln_err.stage(), ErrorStage::Capacity);
}
