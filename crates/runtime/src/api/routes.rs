//! HTTP API route handlers
//!
//! Every handler shares one [`ControlPlane`] through axum state. Failures are
//! returned as `(StatusCode, Json<ErrorResponse>)` with the stage that
//! produced them.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

use super::types::{
    ChatRequest, ChatResponse, CostsResponse, ErrorResponse, GenerateRequest, GenerateResponse,
    GpuResponse, HealthResponse, LogsQuery, LogsResponse, ModelLookupResponse, ModelView,
    ModelsResponse, ServiceActionResponse, StatusResponse,
};
use crate::engine::EngineError;
use crate::routing::{RouteOptions, RoutingError};
use crate::services::{ServiceError, ServiceSnapshot};
use crate::types::{ChatMessage, ErrorStage};
use crate::ControlPlane;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_response(
    status: StatusCode,
    code: &str,
    stage: ErrorStage,
    error: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
            stage,
            details: None,
        }),
    )
}

fn routing_error(error: RoutingError) -> ApiError {
    let stage = error.stage();
    match &error {
        RoutingError::InvalidRequest { reason } => {
            error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", stage, reason.clone())
        }
        RoutingError::AllRoutesExhausted { attempts } => {
            let status = if error.is_unavailable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            };
            let (status, Json(mut body)) =
                error_response(status, "ROUTES_EXHAUSTED", stage, error.to_string());
            body.details = serde_json::to_value(attempts).ok();
            (status, Json(body))
        }
    }
}

fn service_error(error: ServiceError) -> ApiError {
    match &error {
        ServiceError::UnknownService { .. } => error_response(
            StatusCode::NOT_FOUND,
            "SERVICE_NOT_FOUND",
            ErrorStage::Service,
            error.to_string(),
        ),
        ServiceError::Failed { .. } => error_response(
            StatusCode::CONFLICT,
            "SERVICE_FAILED",
            ErrorStage::Service,
            error.to_string(),
        ),
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERVICE_ERROR",
            ErrorStage::Service,
            error.to_string(),
        ),
    }
}

fn route_options(allow_local: Option<bool>, allow_cloud: Option<bool>) -> RouteOptions {
    let defaults = RouteOptions::default();
    RouteOptions {
        allow_local: allow_local.unwrap_or(defaults.allow_local),
        allow_cloud: allow_cloud.unwrap_or(defaults.allow_cloud),
        ..defaults
    }
}

/// Liveness, uptime and service counts
pub async fn health(State(plane): State<Arc<ControlPlane>>) -> ApiResult<HealthResponse> {
    let counts = plane.services().counts();
    let status = if counts.failed > 0 || counts.unhealthy > 0 {
        "degraded"
    } else {
        "healthy"
    };
    Ok(Json(HealthResponse {
        status: status.to_string(),
        uptime_seconds: plane.uptime().as_secs(),
        started_at: plane.started_at(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: counts,
    }))
}

pub async fn status(State(plane): State<Arc<ControlPlane>>) -> ApiResult<StatusResponse> {
    Ok(Json(StatusResponse {
        uptime_seconds: plane.uptime().as_secs(),
        services: plane.services().snapshots(),
        counts: plane.services().counts(),
        accelerator: plane.scheduler().get_stats().await,
        routing: plane.router().metrics(),
        cloud_providers: plane
            .cloud()
            .provider_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }))
}

pub async fn list_models(State(plane): State<Arc<ControlPlane>>) -> ApiResult<ModelsResponse> {
    let catalog = plane.catalog();
    let models = catalog
        .list_models()
        .into_iter()
        .map(|info| ModelView {
            resident: plane.scheduler().is_resident(&info.name),
            info: info.clone(),
        })
        .collect();

    Ok(Json(ModelsResponse {
        default_model: catalog.get_default_model().to_string(),
        default_footprint_gb: catalog.default_footprint_gb(),
        models,
    }))
}

/// Resolve a role alias or model name. Unknown names are reported with
/// `known: false` rather than as an error.
pub async fn get_model(
    State(plane): State<Arc<ControlPlane>>,
    Path(role): Path<String>,
) -> ApiResult<ModelLookupResponse> {
    let catalog = plane.catalog();
    let resolution = catalog.resolve_tagged(&role);
    let resolved = resolution.name().to_string();

    Ok(Json(ModelLookupResponse {
        known: resolution.is_known(),
        footprint_gb: catalog.footprint_for(&resolved),
        resident: plane.scheduler().is_resident(&resolved),
        model: catalog.get_model_info(&resolved).cloned(),
        requested: role,
        resolved,
    }))
}

pub async fn gpu(State(plane): State<Arc<ControlPlane>>) -> ApiResult<GpuResponse> {
    Ok(Json(GpuResponse {
        stats: plane.scheduler().get_stats().await,
        residency: plane.scheduler().residency(),
    }))
}

pub async fn list_services(
    State(plane): State<Arc<ControlPlane>>,
) -> ApiResult<Vec<ServiceSnapshot>> {
    Ok(Json(plane.services().snapshots()))
}

pub async fn get_service(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<String>,
) -> ApiResult<ServiceSnapshot> {
    plane
        .services()
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| service_error(ServiceError::UnknownService { id }))
}

/// Start an on-demand service
pub async fn start_service(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<String>,
) -> ApiResult<ServiceActionResponse> {
    let state = plane
        .services()
        .ensure_started(&id)
        .await
        .map_err(service_error)?;
    Ok(Json(ServiceActionResponse {
        id,
        action: "start".to_string(),
        state,
    }))
}

/// Clear a service's failure counters and start it again
pub async fn restart_service(
    State(plane): State<Arc<ControlPlane>>,
    Path(id): Path<String>,
) -> ApiResult<ServiceActionResponse> {
    let state = plane.services().reset(&id).await.map_err(service_error)?;
    Ok(Json(ServiceActionResponse {
        id,
        action: "restart".to_string(),
        state,
    }))
}

pub async fn logs(
    State(plane): State<Arc<ControlPlane>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<LogsResponse> {
    let log = plane.services().log();
    Ok(Json(LogsResponse {
        entries: log.recent(query.limit),
        capacity: log.capacity(),
    }))
}

pub async fn cloud_costs(State(plane): State<Arc<ControlPlane>>) -> ApiResult<CostsResponse> {
    Ok(Json(plane.cloud().ledger().get_costs_today()))
}

pub async fn chat(
    State(plane): State<Arc<ControlPlane>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let mut options = route_options(request.allow_local, request.allow_cloud);
    options.generation = request.options.into();

    plane
        .router()
        .route(&request.model, request.messages, options)
        .await
        .map(|routed| Json(ChatResponse::from(routed)))
        .map_err(routing_error)
}

pub async fn generate(
    State(plane): State<Arc<ControlPlane>>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    let messages: Vec<ChatMessage> = request.messages();
    let mut options = route_options(request.allow_local, request.allow_cloud);
    options.generation = request.options.into();

    plane
        .router()
        .route(&request.model, messages, options)
        .await
        .map(|routed| Json(GenerateResponse::from(routed)))
        .map_err(routing_error)
}

/// Engine model listing, passed through untouched
pub async fn tags(State(plane): State<Arc<ControlPlane>>) -> ApiResult<serde_json::Value> {
    plane.router().list_local_models().await.map(Json).map_err(|e| {
        let (status, code) = match &e {
            EngineError::Unreachable { .. } | EngineError::Timeout => {
                (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNREACHABLE")
            }
            _ => (StatusCode::BAD_GATEWAY, "ENGINE_ERROR"),
        };
        error_response(status, code, ErrorStage::Local, e.to_string())
    })
}
