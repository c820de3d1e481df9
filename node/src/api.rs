//! # Gateway API
//!
//! Builds the axum router that exposes the relay over HTTP. All handlers
//! share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                                   |
//! |--------|-----------|-----------------------------------------------|
//! | POST   | `/`       | Submit `{"trytes": [...]}` for PoW + broadcast |
//! | GET    | `/pow`    | Name of the PoW implementation in use         |
//! | GET    | `/stats`  | Host CPU, load and memory                     |
//! | GET    | `/health` | Liveness probe                                |
//!
//! Every error body is `{"error": "..."}`. A wrong method gets 405, an
//! unknown path 404, and a panicking handler 500; the server keeps serving
//! after any of them.

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use tangle_relay::dispatch::Dispatcher;
use tangle_relay::stats::StatsCollector;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Deadline-bounded broadcast dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Host stats source for `/stats`.
    pub collector: Arc<dyn StatsCollector>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with all routes, panic isolation, CORS and tracing.
pub fn create_router(state: AppState) -> Router {
    layered(routes().with_state(state))
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_handler).fallback(method_not_allowed))
        .route("/pow", get(pow_handler).fallback(method_not_allowed))
        .route("/stats", get(stats_handler).fallback(method_not_allowed))
        .route("/health", get(health_handler))
        .fallback(not_found)
}

/// Wraps any router in the middleware stack the gateway runs behind.
pub fn layered(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AnyOrigin);

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /`. A missing `trytes` field is an empty batch.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub trytes: Vec<String>,
}

/// Response payload for `GET /pow`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowResponse {
    pub pow_algo: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /` — decode, dispatch and acknowledge a batch.
///
/// Answers 204 for every dispatched batch, whether it succeeded, failed or
/// is still running. Failures surface through the report sinks only.
async fn submit_handler(State(state): State<AppState>, body: Bytes) -> Response {
    state.metrics.batches_received_total.inc();

    let request: SubmitRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            state.metrics.batches_rejected_total.inc();
            tracing::debug!(error = %e, "unparsable submit body");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"));
        }
    };
    state
        .metrics
        .transactions_received_total
        .inc_by(request.trytes.len() as u64);

    let timer = state.metrics.ack_latency_seconds.start_timer();
    match state.dispatcher.submit(request.trytes).await {
        Ok(outcome) => {
            timer.observe_duration();
            state.metrics.record_outcome(&outcome);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            timer.stop_and_discard();
            state.metrics.batches_rejected_total.inc();
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// `GET /pow` — name of the PoW variant sealing submissions.
async fn pow_handler(State(state): State<AppState>) -> Json<PowResponse> {
    Json(PowResponse {
        pow_algo: state.dispatcher.pow_variant().name().to_string(),
    })
}

/// `GET /stats` — host utilisation snapshot.
///
/// The collector sleeps between CPU samples, so it runs on the blocking pool.
/// A collector panic is contained there and mapped to 500 like any error.
async fn stats_handler(State(state): State<AppState>) -> Response {
    let collector = Arc::clone(&state.collector);
    match tokio::task::spawn_blocking(move || collector.snapshot()).await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "host stats collection failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "host stats collector crashed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "stats collection failed")
        }
    }
}

/// `GET /health` — liveness probe.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
