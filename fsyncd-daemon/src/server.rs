//! HTTP control surface.
//!
//! Endpoints mirror the daemon's two concerns: kicking one ad-hoc
//! reconciliation and reading or updating the persisted sync configuration.
//! Every reconciliation pathway passes through the same single-flight gate;
//! an operator request that cannot acquire it is answered with 409 and is
//! never queued.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header::HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use fsyncd_engine::{CancelToken, SyncError, SyncGate};

use crate::config::{validate_diff_percent, validate_sync_paths, DaemonConfig};
use crate::drivers::ConfigSource;

/// Shared state behind every handler.
pub struct AppState {
    pub gate: Arc<SyncGate>,
    pub source: Arc<dyn ConfigSource>,
    pub cancel: CancelToken,
}

type SharedState = Arc<AppState>;

/// Body of `PATCH /api/v1/sync/directories`.
#[derive(Debug, Deserialize)]
pub struct SyncDirectoriesRequest {
    pub src_path: std::path::PathBuf,
    pub dst_path: std::path::PathBuf,
    pub max_diff_percent: u8,
}

impl SyncDirectoriesRequest {
    fn validate(&self) -> Result<(), String> {
        validate_sync_paths(&self.src_path, &self.dst_path).map_err(|e| e.to_string())?;
        validate_diff_percent(self.max_diff_percent).map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Body of `PATCH /api/v1/sync/config/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub src_path: std::path::PathBuf,
    pub dst_path: std::path::PathBuf,
    pub max_diff_percent: u8,
    pub sync_time: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (
        code,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// One-shot reconciliation against operator-supplied paths. 409 when a run
/// is already in flight.
async fn sync_directories(
    State(state): State<SharedState>,
    Json(request): Json<SyncDirectoriesRequest>,
) -> Response {
    if let Err(message) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let Some(_guard) = state.gate.acquire() else {
        return StatusCode::CONFLICT.into_response();
    };

    info!(
        src = %request.src_path.display(),
        dst = %request.dst_path.display(),
        "operator-initiated reconciliation"
    );

    match fsyncd_engine::reconcile(
        &request.src_path,
        &request.dst_path,
        request.max_diff_percent,
        &state.cancel,
    )
    .await
    {
        Ok(()) => (StatusCode::OK, Json(StatusBody { status: "synchronized" })).into_response(),
        Err(err @ SyncError::TooLargeDifference { .. }) => {
            warn!(error = %err, "reconciliation abandoned");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) if err.is_fatal() => {
            error!(error = %err, "invariant violated; terminating");
            std::process::exit(1);
        }
        Err(err) => {
            error!(error = %err, "reconciliation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Persist a new sync configuration through the configured driver.
async fn update_config(
    State(state): State<SharedState>,
    Json(request): Json<UpdateConfigRequest>,
) -> Response {
    let config = crate::config::SyncConfig {
        src_path: request.src_path,
        dst_path: request.dst_path,
        max_diff_percent: request.max_diff_percent,
        sync_time: request.sync_time,
    };
    if let Err(e) = config.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    match state.source.update(config).await {
        Ok(()) => (StatusCode::OK, Json(StatusBody { status: "updated" })).into_response(),
        Err(e) => {
            error!(error = %e, "failed to persist sync configuration");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Return the sync configuration currently persisted.
async fn get_config(State(state): State<SharedState>) -> Response {
    match state.source.load().await {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to load sync configuration");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health() -> Response {
    (StatusCode::OK, Json(StatusBody { status: "ok" })).into_response()
}

pub fn router(config: &DaemonConfig, state: SharedState) -> Router {
    // hyper exposes no split read/write socket deadlines; the request-timeout
    // layer enforces both budgets as one bound on the whole exchange
    let request_timeout = config.read_timeout() + config.write_timeout();

    Router::new()
        .route("/api/v1/sync/directories", patch(sync_directories))
        .route("/api/v1/sync/config/update", patch(update_config))
        .route("/api/v1/sync/config", get(get_config))
        .route("/api/v1/health", get(health))
        .layer(cors_layer(config))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

fn cors_layer(config: &DaemonConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_hosts
        .iter()
        .filter_map(|host| host.parse().ok())
        .collect();
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|method| method.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|header| header.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers))
}

/// Bind and serve until the cancellation token fires, then drain within the
/// configured graceful-shutdown window.
pub async fn serve(config: Arc<DaemonConfig>, state: SharedState) -> std::io::Result<()> {
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "control surface listening");

    let app = router(&config, state.clone());

    let drain = state.cancel.clone();
    let deadline = state.cancel.clone();
    let window = config.shutdown_window();

    tokio::select! {
        result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { drain.cancelled().await }) =>
        {
            result?;
        }
        _ = async move {
            deadline.cancelled().await;
            tokio::time::sleep(window).await;
        } => {
            warn!("graceful-shutdown window elapsed; dropping remaining connections");
        }
    }

    info!("control surface stopped");
    Ok(())
}
