//! HTTP routes.

use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clusterback_core::{CaptureOutcome, CaptureReport, CaptureSummary, CoreError, GateOutcome};
use clusterback_store::{Version, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// API error response.
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    code: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

impl ApiError {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    fn from_core(err: CoreError) -> (StatusCode, Json<Self>) {
        let status = match &err {
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Applier { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "Request failed");
        }
        (status, Json(Self::new(err.to_string(), err.code())))
    }
}

/// Create the router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/versions", get(list_versions))
        .route("/capture", post(capture))
        .route("/versions/{id}/diff", get(diff_version))
        .route("/versions/{id}/rollback", post(rollback_version))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Versions
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    order: Order,
}

async fn list_versions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Version>>> {
    let mut versions = state
        .engine
        .list_versions()
        .await
        .map_err(ApiError::from_core)?;
    if query.order == Order::Desc {
        versions.reverse();
    }
    Ok(Json(versions))
}

async fn diff_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .diff(&VersionId::from_string(id))
        .await
        .map_err(ApiError::from_core)?;
    Ok(Json(outcome))
}

async fn rollback_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let version_id = VersionId::from_string(id);
    info!(version = %version_id, "Rollback requested over HTTP");
    let outcome = state
        .engine
        .rollback(&version_id)
        .await
        .map_err(ApiError::from_core)?;
    Ok(Json(outcome))
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct CaptureQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct CaptureResponse {
    created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<CaptureSummary>,
}

impl From<GateOutcome> for CaptureResponse {
    fn from(outcome: GateOutcome) -> Self {
        let reason = outcome.reason();
        match outcome {
            GateOutcome::Captured(report) => CaptureResponse::from(report),
            GateOutcome::RateLimited { .. } => CaptureResponse {
                created: false,
                version: None,
                latest: None,
                code: Some("RATE_LIMITED"),
                reason,
                summary: None,
            },
        }
    }
}

impl From<CaptureReport> for CaptureResponse {
    fn from(report: CaptureReport) -> Self {
        let created = report.outcome.is_created();
        let (version, latest, reason) = match report.outcome {
            CaptureOutcome::Created(version) => (Some(version), None, None),
            CaptureOutcome::NoChange { latest } => {
                let reason = format!("no new version was created: live state matches {latest}");
                (None, Some(latest), Some(reason))
            }
        };
        CaptureResponse {
            created,
            version,
            latest,
            code: None,
            reason,
            summary: Some(report.summary),
        }
    }
}

async fn capture(
    State(state): State<AppState>,
    Query(query): Query<CaptureQuery>,
) -> ApiResult<Json<CaptureResponse>> {
    let response = if query.force {
        CaptureResponse::from(state.engine.capture().await.map_err(ApiError::from_core)?)
    } else {
        CaptureResponse::from(
            state
                .engine
                .request_capture("http")
                .await
                .map_err(ApiError::from_core)?,
        )
    };
    Ok(Json(response))
}
