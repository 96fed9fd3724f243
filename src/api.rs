//! HTTP control plane over the syncer pool
//!
//! `GET /list?type=configured|active` and
//! `GET /ops?sync=<hostname>&action=pause|resume|details|changePeriod[&period=<cron>]`.
//! Changes made here are not persisted; a restart rebuilds the pool from configuration.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::error::SyncError;
use crate::pool::SyncerPool;
use crate::scheduler::JobHandle;

/// Weekday, day-month-year, time and zone, e.g. `Monday, 02-Jan-06 15:04:05 UTC`
const TIME_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S %Z";

#[derive(Clone)]
struct ApiState {
    pool: Arc<SyncerPool>,
    auth_token: Option<Arc<str>>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpsQuery {
    sync: Option<String>,
    action: Option<String>,
    period: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        match &err {
            SyncError::InvalidSchedule { .. } => ApiError::BadRequest(err.to_string()),
            _ => {
                error!("control plane operation failed: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Router for the control plane, with the bearer gate applied when `enable_auth` is set
pub fn router(pool: Arc<SyncerPool>, config: &ApiConfig) -> Router {
    let state = ApiState {
        pool,
        auth_token: config
            .enable_auth
            .then(|| Arc::from(config.auth_token.as_str())),
    };

    Router::new()
        .route("/list", get(list))
        .route("/ops", get(ops))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control plane until `shutdown` is cancelled
pub async fn serve(pool: Arc<SyncerPool>, config: &ApiConfig, shutdown: CancellationToken) -> Result<()> {
    let app = router(pool, config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control plane to {addr}"))?;
    info!("Control plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Stopping control plane");
        })
        .await
        .context("Control plane server failed")?;

    Ok(())
}

async fn require_bearer(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if let Some(expected) = &state.auth_token {
        if !bearer_matches(req.headers(), expected) {
            warn!("Rejected unauthenticated request to {}", req.uri().path());
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn pretty_json<T: Serialize>(value: &T) -> ApiResult<Response> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::Internal(format!("could not serialize response: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

fn next_run_text(job: &JobHandle) -> String {
    job.next_run()
        .map(|next| next.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "never".to_string())
}

async fn list(State(state): State<ApiState>, Query(query): Query<ListQuery>) -> ApiResult<Response> {
    match query.kind.as_deref() {
        Some("configured") => pretty_json(&state.pool.list_configured()),
        Some("active") => pretty_json(&state.pool.list_active().await),
        Some(other) => Err(ApiError::BadRequest(format!(
            "unknown list type '{other}', expected 'configured' or 'active'"
        ))),
        None => Err(ApiError::BadRequest(
            "missing list type, expected 'configured' or 'active'".to_string(),
        )),
    }
}

async fn ops(State(state): State<ApiState>, Query(query): Query<OpsQuery>) -> ApiResult<Response> {
    let hostname = query
        .sync
        .filter(|sync| !sync.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing sync parameter".to_string()))?;
    let pool = &state.pool;

    match query.action.as_deref() {
        Some("details") => pretty_json(&pool.details(&hostname).await?),
        Some("pause") => {
            pool.pause(&hostname).await?;
            Ok(format!("OK. {hostname} has been paused.").into_response())
        }
        Some("resume") => {
            let job = pool.resume(&hostname).await?;
            Ok(format!(
                "OK. Syncer for {hostname} is now running. Next execution will be at {}",
                next_run_text(&job)
            )
            .into_response())
        }
        Some("changePeriod") => {
            let period = query
                .period
                .filter(|period| !period.trim().is_empty())
                .ok_or_else(|| ApiError::BadRequest("missing period parameter".to_string()))?;
            let job = pool.change_period(&hostname, &period).await?;
            Ok(format!(
                "OK. Syncer for {hostname} now runs on '{period}'. Next execution will be at {}",
                next_run_text(&job)
            )
            .into_response())
        }
        Some(other) => Err(ApiError::BadRequest(format!("unknown action '{other}'"))),
        None => Err(ApiError::BadRequest("missing action parameter".to_string())),
    }
}
