//! End-to-end streaming scenarios over the scripted upstream and the
//! in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use engine::stores::{
    IdentityTranslator, InMemoryBundle, NoopMemoryHooks, StaticToolRegistry,
};
use engine::upstream::scripted::{ScriptedRound, ScriptedUpstream};
use engine::{ConversationEngine, EngineConfig, PromptCache, SseEvent};
use inference::HybridInferenceManager;
use sb_core::error::ToolError;
use sb_core::traits::{HistoryStore, ToolRegistry};
use sb_core::types::{FinishReason, MessagePart, UserMessage};

const PRIMARY: &str = "gemini-3-flash-preview";
const EXTENDED: &str = "gemini-2.5-pro";

fn build_engine(
    upstream: Arc<ScriptedUpstream>,
    registry: Arc<dyn ToolRegistry>,
    bundle: &InMemoryBundle,
) -> Arc<ConversationEngine> {
    Arc::new(ConversationEngine::new(
        Arc::new(HybridInferenceManager::default()),
        upstream,
        bundle.history.clone(),
        bundle.profiles.clone(),
        registry,
        Arc::new(NoopMemoryHooks),
        Arc::new(IdentityTranslator),
        Arc::new(PromptCache::new(Duration::from_secs(3600))),
        EngineConfig {
            system_template: "შენ ხარ მრჩეველი.".into(),
            ..Default::default()
        },
    ))
}

async fn drive(engine: &Arc<ConversationEngine>, message: UserMessage) -> Vec<SseEvent> {
    engine.stream_message(message).collect().await
}

fn message(text: &str) -> UserMessage {
    UserMessage {
        text: text.into(),
        user_id: Some("u1".into()),
        session_hint: None,
    }
}

fn concatenated_text(events: &[SseEvent]) -> String {
    events
        .iter()
        .filter(|e| e.event_type == "text")
        .map(|e| e.data["content"].as_str().unwrap().to_string())
        .collect()
}

fn done_event(events: &[SseEvent]) -> &SseEvent {
    events
        .iter()
        .find(|e| e.event_type == "done")
        .expect("missing done event")
}

fn retry_events(events: &[SseEvent]) -> Vec<&SseEvent> {
    events.iter().filter(|e| e.event_type == "retry").collect()
}

#[tokio::test]
async fn healthy_primary_streams_text_then_done() {
    let upstream = Arc::new(ScriptedUpstream::new(vec![vec![ScriptedRound::text(
        &["გამარჯობა! ", "რით შემიძლია დაგეხმარო დღეს?"],
        FinishReason::Stop,
    )]]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("hi")).await;

    let text = concatenated_text(&events);
    assert!(!text.is_empty());

    let done = done_event(&events);
    assert_eq!(done.data["model_used"], PRIMARY);
    let session_id = done.data["session_id"].as_str().unwrap();
    assert!(session_id.starts_with("session_"));
    let hex = &session_id["session_".len()..];
    assert_eq!(hex.len(), 16);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

    // Events arrive in order: any thinking first, text before done.
    let done_index = events.iter().position(|e| e.event_type == "done").unwrap();
    let first_text = events.iter().position(|e| e.event_type == "text").unwrap();
    assert!(first_text < done_index);

    assert_eq!(upstream.opened_models(), vec![PRIMARY.to_string()]);
}

#[tokio::test]
async fn short_safety_truncation_retries_on_extended() {
    let short = "ა".repeat(79);
    let long = "ბ".repeat(900);
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::text(&[short.as_str()], FinishReason::Safety)],
        vec![ScriptedRound::text(&[long.as_str()], FinishReason::Stop)],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("რთული კითხვა")).await;

    let retries = retry_events(&events);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].data["reason"], "safety_block");

    let done = done_event(&events);
    assert_eq!(done.data["model_used"], EXTENDED);

    // Text after the retry marker is the full fallback answer.
    let retry_index = events.iter().position(|e| e.event_type == "retry").unwrap();
    let text_after_retry: String = events[retry_index..]
        .iter()
        .filter(|e| e.event_type == "text")
        .map(|e| e.data["content"].as_str().unwrap().to_string())
        .collect();
    assert!(text_after_retry.chars().count() >= 800);

    assert_eq!(
        upstream.opened_models(),
        vec![PRIMARY.to_string(), EXTENDED.to_string()]
    );
}

#[tokio::test]
async fn long_safety_truncation_passes_through() {
    let long = "გ".repeat(1400);
    let upstream = Arc::new(ScriptedUpstream::new(vec![vec![ScriptedRound::text(
        &[long.as_str()],
        FinishReason::Safety,
    )]]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    assert!(retry_events(&events).is_empty());
    assert_eq!(concatenated_text(&events), long);
    assert_eq!(done_event(&events).data["model_used"], PRIMARY);
    assert_eq!(upstream.opened_models(), vec![PRIMARY.to_string()]);
}

#[tokio::test]
async fn at_most_one_fallback_retry_per_request() {
    let short = "ა".repeat(79);
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::text(&[short.as_str()], FinishReason::Safety)],
        vec![ScriptedRound::text(&[short.as_str()], FinishReason::Safety)],
        // A third session must never be opened.
        vec![ScriptedRound::text(&["უნდა დარჩეს უხილავი"], FinishReason::Stop)],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    assert_eq!(retry_events(&events).len(), 1);
    let error = events
        .iter()
        .find(|e| e.event_type == "error")
        .expect("expected terminal error");
    assert_eq!(error.data["code"], "content_blocked");
    assert_eq!(done_event(&events).data["model_used"], EXTENDED);
    assert_eq!(upstream.opened_models().len(), 2);
}

#[tokio::test]
async fn empty_response_falls_back_once() {
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![
            ScriptedRound::empty(FinishReason::Stop),
            ScriptedRound::empty(FinishReason::Stop),
        ],
        vec![ScriptedRound::text(
            &["აი სრულფასოვანი პასუხი ამ კითხვაზე."],
            FinishReason::Stop,
        )],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    let retries = retry_events(&events);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].data["reason"], "empty_response");
    assert_eq!(done_event(&events).data["model_used"], EXTENDED);
}

#[tokio::test]
async fn incomplete_stop_retries_on_extended() {
    let cut_off = format!("{} თქვენთვის საუკეთესო ვარიანტები:", "ვრცელი შესავალი. ".repeat(5));
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::text(&[cut_off.as_str()], FinishReason::Stop)],
        vec![ScriptedRound::text(
            &["სრული პასუხი ყველა ვარიანტით: პირველი, მეორე და მესამე. ყველა კარგია."],
            FinishReason::Stop,
        )],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    let retries = retry_events(&events);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].data["reason"], "incomplete_response");
    assert_eq!(done_event(&events).data["model_used"], EXTENDED);
}

#[tokio::test]
async fn incomplete_after_fallback_surfaces_error_and_done() {
    let cut_off = format!("{} შესაძლო ვარიანტები:", "კიდევ ერთი ვრცელი შესავალი. ".repeat(4));
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::text(&[cut_off.as_str()], FinishReason::Stop)],
        vec![ScriptedRound::text(&[cut_off.as_str()], FinishReason::Stop)],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    // Exactly one retry, then the degraded outcome surfaces as error + done.
    assert_eq!(retry_events(&events).len(), 1);
    let error = events
        .iter()
        .find(|e| e.event_type == "error")
        .expect("expected terminal error");
    assert_eq!(error.data["code"], "upstream");
    assert_eq!(done_event(&events).data["model_used"], EXTENDED);
    assert_eq!(upstream.opened_models().len(), 2);
}

struct CountingRegistry {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolRegistry for CountingRegistry {
    async fn call(&self, _name: &str, _args: &Value, _user_id: &str) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "products": [{ "id": "p1", "name": "Whey" }] }))
    }
}

#[tokio::test]
async fn duplicate_search_is_answered_synthetically() {
    let search = |sig: Option<&str>| MessagePart::FunctionCall {
        name: "search".into(),
        args: json!({ "q": "x" }),
        thought_signature: sig.map(String::from),
    };
    let upstream = Arc::new(ScriptedUpstream::new(vec![vec![
        ScriptedRound::function_calls(None, vec![search(Some("c2ln"))]),
        ScriptedRound::function_calls(None, vec![search(None)]),
        ScriptedRound::text(
            &["ორივე ძიება დასრულდა, აი შედეგები და რეკომენდაცია."],
            FinishReason::Stop,
        ),
    ]]));
    let registry = Arc::new(CountingRegistry {
        calls: AtomicUsize::new(0),
    });
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream, registry.clone(), &bundle);

    let events = drive(&engine, message("იპოვე x")).await;
    let done = done_event(&events);
    let session_id = done.data["session_id"].as_str().unwrap().to_string();

    // Second identical call never reached the registry.
    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);

    // The synthetic stop directive is part of the persisted exchange.
    let stored = bundle
        .history
        .load_history("u1", &session_id, 30)
        .await
        .unwrap()
        .unwrap();
    let directive_present = stored.iter().any(|m| {
        m.parts.iter().any(|p| {
            matches!(
                p,
                MessagePart::FunctionResponse { response, .. }
                    if response["status"] == "SEARCH_COMPLETE"
            )
        })
    });
    assert!(directive_present, "stored: {:#?}", stored);
}

#[tokio::test]
async fn done_session_id_rebinds_the_next_request() {
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::text(&["პირველი პასუხი."], FinishReason::Stop)],
        vec![ScriptedRound::text(&["მეორე პასუხი."], FinishReason::Stop)],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream, Arc::new(StaticToolRegistry::new()), &bundle);

    let first = drive(&engine, message("გამარჯობა")).await;
    let session_id = done_event(&first).data["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let stored = bundle
        .history
        .load_history("u1", &session_id, 30)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.len() >= 2, "user + assistant expected, got {}", stored.len());

    let second = drive(
        &engine,
        UserMessage {
            text: "გააგრძელე".into(),
            user_id: Some("u1".into()),
            session_hint: Some(session_id.clone()),
        },
    )
    .await;

    // Rebound: the same id comes back in the second done event.
    assert_eq!(done_event(&second).data["session_id"], session_id.as_str());

    let stored = bundle
        .history
        .load_history("u1", &session_id, 30)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.len() >= 4);
}

#[tokio::test]
async fn unknown_session_hint_mints_a_fresh_id() {
    let upstream = Arc::new(ScriptedUpstream::new(vec![vec![ScriptedRound::text(
        &["პასუხი."],
        FinishReason::Stop,
    )]]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream, Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(
        &engine,
        UserMessage {
            text: "hi".into(),
            user_id: Some("u1".into()),
            session_hint: Some("session_deadbeefdeadbeef".into()),
        },
    )
    .await;

    let session_id = done_event(&events).data["session_id"].as_str().unwrap();
    assert_ne!(session_id, "session_deadbeefdeadbeef");
    assert!(session_id.starts_with("session_"));
}

#[tokio::test]
async fn transport_outage_retries_then_surfaces_upstream_error() {
    let upstream = Arc::new(ScriptedUpstream::new(vec![
        vec![ScriptedRound::Fail(sb_core::error::UpstreamError::Http {
            status: 503,
            message: "overloaded".into(),
        })],
        vec![ScriptedRound::Fail(sb_core::error::UpstreamError::Http {
            status: 503,
            message: "still overloaded".into(),
        })],
    ]));
    let bundle = InMemoryBundle::new();
    let engine = build_engine(upstream.clone(), Arc::new(StaticToolRegistry::new()), &bundle);

    let events = drive(&engine, message("კითხვა")).await;

    assert_eq!(retry_events(&events).len(), 1);
    let error = events
        .iter()
        .find(|e| e.event_type == "error")
        .expect("expected error event");
    assert_eq!(error.data["code"], "upstream");
    assert_eq!(upstream.opened_models().len(), 2);
}
