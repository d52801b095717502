use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ImportConfig};
use crate::import::{run_flow, Flow, FlowError, ImportError, ImportSummary, Store};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    import: Arc<ImportConfig>,
    allowlist: Arc<Vec<IpAddr>>,
    /// Held for the duration of an import; imports never overlap.
    running: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config, shutdown: CancellationToken) -> Self {
        AppState {
            store,
            import: Arc::new(config.import.clone()),
            allowlist: Arc::new(config.allowlist.clone()),
            running: Arc::new(Mutex::new(())),
            shutdown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("an import is already running")]
    Busy,
    #[error("{0} is not allowed to trigger imports")]
    Forbidden(IpAddr),
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Flow(FlowError::Unknown(_)) => StatusCode::NOT_FOUND,
            ApiError::Flow(_) => StatusCode::BAD_REQUEST,
            ApiError::Busy => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Import(ImportError::Configuration(_)) => StatusCode::CONFLICT,
            ApiError::Import(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Flow(FlowError::Unknown(_)) => "NotFound",
            ApiError::Flow(_) => "BadRequest",
            ApiError::Busy => "Conflict",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::Import(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ImportResponse {
    status: &'static str,
    flow: String,
    #[serde(flatten)]
    summary: ImportSummary,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ops/imports/{flow}", get(import_handler))
        .route("/ops/imports/{flow}/{algo}", get(import_algo_handler))
        .layer(middleware::from_fn_with_state(state.clone(), allowlist))
        .with_state(state)
}

fn is_allowed(allowlist: &[IpAddr], caller: IpAddr) -> bool {
    let caller = caller.to_canonical();
    allowlist.iter().any(|ip| ip.to_canonical() == caller)
}

async fn allowlist(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_allowed(&state.allowlist, addr.ip()) {
        warn!(caller = %addr.ip(), path = %request.uri().path(), "rejected caller outside allowlist");
        return Err(ApiError::Forbidden(addr.ip()));
    }
    Ok(next.run(request).await)
}

async fn import_handler(
    State(state): State<AppState>,
    Path(flow): Path<String>,
) -> Result<Json<ImportResponse>, ApiError> {
    run_import(state, Flow::new(&flow, None)?).await
}

async fn import_algo_handler(
    State(state): State<AppState>,
    Path((flow, algo)): Path<(String, String)>,
) -> Result<Json<ImportResponse>, ApiError> {
    run_import(state, Flow::new(&flow, Some(&algo))?).await
}

/// Runs the import synchronously; the response is sent once every pipeline
/// has stopped.
async fn run_import(state: AppState, flow: Flow) -> Result<Json<ImportResponse>, ApiError> {
    let Ok(_running) = state.running.try_lock() else {
        return Err(ApiError::Busy);
    };

    info!(flow = %flow, "import requested");
    let name = flow.to_string();
    let summary = run_flow(flow, &state.import, state.store.clone(), &state.shutdown).await?;
    Ok(Json(ImportResponse {
        status: "ok",
        flow: name,
        summary,
    }))
}
