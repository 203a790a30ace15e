use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use engine::ConversationEngine;
use inference::{CircuitStatus, HybridInferenceManager};
use sb_core::types::UserMessage;

use crate::errors::ApiError;
use crate::telemetry::{RequestTimer, Telemetry};

const MAX_MESSAGE_CHARS: usize = 4000;

pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub manager: Arc<HybridInferenceManager>,
    pub primary_model: String,
    pub active_streams: AtomicUsize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Decrements the active-stream gauge when the client goes away.
struct StreamGuard {
    state: Arc<AppState>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let count = self.state.active_streams.fetch_sub(1, Ordering::Relaxed) - 1;
        Telemetry::set_active_streams(count);
    }
}

async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("user_id is required".into()));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::InvalidRequest("message is empty".into()));
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::InvalidRequest(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    Telemetry::record_request();
    let count = state.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
    Telemetry::set_active_streams(count);
    let guard = StreamGuard {
        state: Arc::clone(&state),
    };
    let mut timer = Some(RequestTimer::new());

    let events = state.engine.stream_message(UserMessage {
        text: request.message,
        user_id: Some(request.user_id),
        session_hint: request.session_id,
    });

    let stream = events.map(move |event| {
        let _held = &guard;
        match event.event_type {
            "retry" => {
                let reason = event.data["reason"].as_str().unwrap_or("unknown");
                Telemetry::record_fallback(reason);
            }
            "error" => {
                let code = event.data["code"].as_str().unwrap_or("unknown");
                Telemetry::record_error(code);
            }
            "done" => {
                if let Some(timer) = timer.take() {
                    timer.finish();
                }
            }
            _ => {}
        }
        Ok(Event::default()
            .event(event.event_type)
            .data(event.data.to_string()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let circuit = match state.manager.breaker().status(&state.primary_model).status {
        CircuitStatus::Closed => "closed",
        CircuitStatus::Open => "open",
        CircuitStatus::HalfOpen => "half_open",
    };
    Json(serde_json::json!({
        "status": "healthy",
        "checks": {
            "primary_circuit": circuit,
        }
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> axum::response::Response<String> {
    let metrics = state.manager.metrics();
    let body = format!(
        "# HELP chat_routes_total Requests routed\n# TYPE chat_routes_total counter\n\
         chat_routes_total {}\n\n\
         # HELP chat_fallback_routes_total Requests routed to the last-resort fallback model\n\
         # TYPE chat_fallback_routes_total counter\nchat_fallback_routes_total {}\n\n\
         # HELP chat_extended_routes_total Requests routed to the extended model\n\
         # TYPE chat_extended_routes_total counter\nchat_extended_routes_total {}\n\n\
         # HELP chat_failures_recorded_total Upstream failures recorded\n\
         # TYPE chat_failures_recorded_total counter\nchat_failures_recorded_total {}\n",
        metrics.total_routes(),
        metrics.fallback_uses(),
        metrics.extended_uses(),
        metrics.failures_recorded(),
    );

    axum::response::Response::builder()
        .header("Content-Type", "text/plain")
        .body(body)
        .unwrap()
}
