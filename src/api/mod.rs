//! HTTP surface of the broker
//!
//! One query endpoint: `POST /query` with an AQL query body. Aggregate
//! responses are buffered and returned whole; non-aggregate responses stream
//! through a duplex pipe as partials arrive.

use crate::broker::{AggQueryPlan, BrokerTelemetry, NonAggQueryPlan, QueryContext};
use crate::cluster::DynamicTopology;
use crate::datanode::DataNodeQueryClient;
use crate::Error;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

const STREAM_PIPE_CAPACITY: usize = 64 * 1024;

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub topology: Arc<DynamicTopology>,
    pub client: Arc<dyn DataNodeQueryClient>,
    pub telemetry: Arc<BrokerTelemetry>,
}

/// Build the HTTP router
pub fn build_http_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/query", post(handle_query))
        .with_state(state)
        .layer(cors)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness: the broker can serve queries only while the topology watch is
/// alive.
async fn ready_check(State(state): State<ApiState>) -> Response {
    if state.topology.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "topology watch closed").into_response()
    } else {
        (StatusCode::OK, "OK").into_response()
    }
}

async fn handle_query(
    State(state): State<ApiState>,
    Json(query): Json<crate::query::AQLQuery>,
) -> Response {
    let qc = match QueryContext::build(query) {
        Ok(qc) => qc,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let cancel = CancellationToken::new();
    if qc.is_aggregate() {
        run_agg_query(&state, &qc, cancel).await
    } else {
        run_non_agg_query(&state, &qc, cancel)
    }
}

async fn run_agg_query(state: &ApiState, qc: &QueryContext, cancel: CancellationToken) -> Response {
    let plan = match AggQueryPlan::new(
        qc,
        &state.topology,
        Arc::clone(&state.client),
        Arc::clone(&state.telemetry),
    ) {
        Ok(plan) => plan,
        Err(e) => return error_response(plan_error_status(&e), &e),
    };

    let mut body = Vec::new();
    match plan.execute(cancel, &mut body).await {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => error_response(plan_error_status(&e), &e),
    }
}

fn run_non_agg_query(state: &ApiState, qc: &QueryContext, cancel: CancellationToken) -> Response {
    let mut plan = match NonAggQueryPlan::new(
        qc,
        &state.topology,
        Arc::clone(&state.client),
        Arc::clone(&state.telemetry),
    ) {
        Ok(plan) => plan,
        Err(e) => return error_response(plan_error_status(&e), &e),
    };

    let (mut writer, reader) = tokio::io::duplex(STREAM_PIPE_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = plan.execute(cancel, &mut writer).await {
            // dropping the writer truncates the streamed body
            warn!(error = %e, "streaming query aborted");
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

fn plan_error_status(e: &Error) -> StatusCode {
    match e {
        Error::IncompleteCoverage(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Query(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, e: &Error) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": e.to_string()
        })),
    )
        .into_response()
}
