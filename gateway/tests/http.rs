use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use engine::stores::{IdentityTranslator, InMemoryBundle, NoopMemoryHooks, StaticToolRegistry};
use engine::upstream::scripted::{ScriptedRound, ScriptedUpstream};
use engine::{ConversationEngine, EngineConfig, PromptCache};
use gateway::routes::{create_router, AppState};
use inference::HybridInferenceManager;
use sb_core::types::FinishReason;

fn test_state(rounds: Vec<Vec<ScriptedRound>>) -> Arc<AppState> {
    let manager = Arc::new(HybridInferenceManager::default());
    let bundle = InMemoryBundle::new();
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&manager),
        Arc::new(ScriptedUpstream::new(rounds)),
        bundle.history.clone(),
        bundle.profiles.clone(),
        Arc::new(StaticToolRegistry::new()),
        Arc::new(NoopMemoryHooks),
        Arc::new(IdentityTranslator),
        Arc::new(PromptCache::new(Duration::from_secs(3600))),
        EngineConfig::default(),
    ));
    Arc::new(AppState {
        engine,
        manager,
        primary_model: "gemini-3-flash-preview".into(),
        active_streams: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn health_reports_primary_circuit() {
    let app = create_router(test_state(vec![]));
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["checks"]["primary_circuit"], "closed");
}

#[tokio::test]
async fn metrics_renders_prometheus_text() {
    let app = create_router(test_state(vec![]));
    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("chat_routes_total"));
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let app = create_router(test_state(vec![]));
    let response = app
        .oneshot(
            Request::post("/chat/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{ "user_id": "u1", "message": "   " }"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_stream_emits_sse_until_done() {
    let rounds = vec![vec![ScriptedRound::text(
        &["გამარჯობა, როგორ ხარ?"],
        FinishReason::Stop,
    )]];
    let app = create_router(test_state(rounds));
    let response = app
        .oneshot(
            Request::post("/chat/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{ "user_id": "u1", "message": "hi" }"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("event: text"));
    assert!(text.contains("event: done"));
    assert!(text.contains("session_"));
}
