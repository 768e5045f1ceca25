//! HTTP ingress for the funding pipeline.
//!
//! Requests enter the private "scan" queue through `POST /requests`;
//! `GET /completions` drains the completion events currently available
//! on the public bus.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::Serialize;
use walletfund_core::entities::{CompletionEvent, ScanRequest};
use walletfund_core::queue::MessageQueue;

/// Shared handles the request handlers need.
#[derive(Clone)]
pub struct AppState {
    pub scan: MessageQueue,
    pub complete: MessageQueue,
}

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/requests", post(submit_request))
        .route("/completions", get(drain_completions))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /requests` — validate the payload invariants and enqueue the
/// request for scanning.
async fn submit_request(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Response {
    if request.request.amount == 0 {
        return (StatusCode::BAD_REQUEST, "request amount must be positive").into_response();
    }
    if request.scan_height > request.max_height {
        return (
            StatusCode::BAD_REQUEST,
            "scanHeight must not exceed maxHeight",
        )
            .into_response();
    }

    match serde_json::to_vec(&request) {
        Ok(bytes) => {
            state.scan.publish(bytes);
            tracing::debug!(address = %request.wallet.address, "Accepted funding request");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode scan request");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /completions` — drain the completion events currently available
/// on the public bus. Events are consumed by the read.
async fn drain_completions(State(state): State<AppState>) -> Response {
    let mut events: Vec<CompletionEvent> = Vec::new();
    while let Some(delivery) = state.complete.try_pop() {
        match serde_json::from_slice(delivery.payload()) {
            Ok(event) => {
                events.push(event);
                delivery.ack();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable completion event");
                delivery.ack();
            }
        }
    }
    Json(events).into_response()
}
