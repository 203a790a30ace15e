use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use inference::HybridInferenceManager;
use sb_core::error::StoreError;
use sb_core::traits::{HistoryStore, MemoryHooks, ProfileStore, ThoughtTranslator, ToolRegistry};
use sb_core::types::{FallbackReason, LoopState, Message, Profile, UserMessage};

use crate::buffer::ResponseBuffer;
use crate::compactor::ContextCompactor;
use crate::error::{EngineError, EngineResult};
use crate::events::SseEvent;
use crate::function_loop::{FunctionCallingLoop, LoopConfig};
use crate::presearch::PreSearch;
use crate::prompt_cache::PromptCache;
use crate::tools::ToolExecutor;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub system_template: String,
    pub history_keep: usize,
    pub max_rounds: u32,
    pub round_timeout: Duration,
    pub max_unique_queries: usize,
    pub compaction_ratio: f64,
    pub presearch_enabled: bool,
    pub tenant: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_template: String::new(),
            history_keep: 30,
            max_rounds: 5,
            round_timeout: Duration::from_secs(30),
            max_unique_queries: 3,
            compaction_ratio: 0.75,
            presearch_enabled: true,
            tenant: "default".to_string(),
        }
    }
}

/// How one streaming attempt ended, after terminal analysis.
enum AttemptVerdict {
    Success(LoopState, Vec<Message>),
    Fallback(FallbackReason),
    Fatal(&'static str),
}

/// Top-level orchestrator for one conversational request.
///
/// Loads context, injects pre-search, routes to a model, runs the
/// function-calling loop, applies at most one fallback retry, and emits
/// the SSE event stream.
pub struct ConversationEngine {
    manager: Arc<HybridInferenceManager>,
    upstream: Arc<dyn UpstreamClient>,
    history: Arc<dyn HistoryStore>,
    profiles: Arc<dyn ProfileStore>,
    tools: Arc<dyn ToolRegistry>,
    hooks: Arc<dyn MemoryHooks>,
    translator: Arc<dyn ThoughtTranslator>,
    prompt_cache: Arc<PromptCache>,
    presearch: PreSearch,
    compactor: ContextCompactor,
    config: EngineConfig,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<HybridInferenceManager>,
        upstream: Arc<dyn UpstreamClient>,
        history: Arc<dyn HistoryStore>,
        profiles: Arc<dyn ProfileStore>,
        tools: Arc<dyn ToolRegistry>,
        hooks: Arc<dyn MemoryHooks>,
        translator: Arc<dyn ThoughtTranslator>,
        prompt_cache: Arc<PromptCache>,
        config: EngineConfig,
    ) -> Self {
        let compactor = ContextCompactor::new(config.compaction_ratio);
        Self {
            manager,
            upstream,
            history,
            profiles,
            tools,
            hooks,
            translator,
            prompt_cache,
            presearch: PreSearch::new(),
            compactor,
            config,
        }
    }

    /// Runs the request on a background task and returns the event stream.
    /// Dropping the stream cancels the request: no further chunks are
    /// pulled and no partial assistant message is persisted.
    pub fn stream_message(self: &Arc<Self>, message: UserMessage) -> ReceiverStream<SseEvent> {
        let (tx, rx) = mpsc::channel(32);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let user = message.user_id.clone().unwrap_or_default();
            let span = info_span!("conversation", user_id = %user);
            engine.run(message, tx).instrument(span).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run(&self, message: UserMessage, tx: mpsc::Sender<SseEvent>) {
        match self.run_inner(&message, &tx).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                info!("client disconnected, stream released");
            }
            Err(err) => {
                error!(%err, "request failed outside the fallback path");
                let _ = tx
                    .send(SseEvent::error(
                        "internal_error",
                        "დროებითი შეცდომა. გთხოვთ სცადოთ ხელახლა.",
                    ))
                    .await;
            }
        }
    }

    async fn run_inner(
        &self,
        message: &UserMessage,
        tx: &mpsc::Sender<SseEvent>,
    ) -> EngineResult<()> {
        let user_id = message
            .user_id
            .clone()
            .unwrap_or_else(|| "anonymous".to_string());

        self.emit(tx, SseEvent::thinking("ვფიქრობ თქვენს შეკითხვაზე...")).await?;

        // Phase 1: context.
        let (session_id, mut history) = self
            .resolve_session(&user_id, message.session_hint.as_deref())
            .await?;
        let profile = match self.profiles.get_profile(&user_id).await {
            Ok(profile) => profile.unwrap_or_default(),
            Err(err) => {
                warn!(%err, "profile load failed, continuing without profile");
                Profile::default()
            }
        };

        // Phase 2: pre-search enrichment.
        let mut enhanced = message.text.clone();
        if self.config.presearch_enabled {
            if let Some(stem) = self.presearch.classify(&message.text, history.len()) {
                info!(keyword = stem, "pre-search triggered");
                if let Some(block) = self
                    .presearch
                    .context_block(&self.tools, &user_id, &message.text)
                    .await
                {
                    enhanced = format!("{}\n\n{}", message.text, block);
                }
            }
        }

        // Phase 3: routing.
        let routing = self.manager.route_request(&enhanced, &history);
        let mut model_used = routing.model.clone();

        // Phase 4: compaction gate.
        let limit = self.manager.model_limit(&model_used).unwrap_or(200_000);
        let message_tokens = self.manager.counter().count(&enhanced);
        if self
            .compactor
            .should_compact(self.manager.counter(), &history, message_tokens, limit)
            && self.compactor.compact(&self.hooks, &user_id, &mut history).await
        {
            if let Err(err) = self
                .history
                .replace(&user_id, &session_id, history.clone())
                .await
            {
                warn!(%err, "failed to persist compacted history");
            }
        }

        let system_prompt = self.build_system_prompt(&profile);

        // Phases 5–7: run the loop, with at most one fallback retry.
        let mut buffer = ResponseBuffer::new();
        let attempt = self
            .run_attempt(
                &model_used,
                &system_prompt,
                history.clone(),
                &enhanced,
                &profile,
                &user_id,
                &mut buffer,
                tx,
            )
            .await;
        let verdict = self.judge(attempt, &buffer)?;

        let verdict = match verdict {
            AttemptVerdict::Fallback(reason) => {
                self.manager.record_failure(&model_used);
                match self.manager.get_fallback_model(&model_used) {
                    None => {
                        warn!(model = %model_used, reason = reason.as_str(), "no fallback available");
                        return self.finish_with_error(tx, &session_id, &model_used, reason).await;
                    }
                    Some(fallback_model) => {
                        info!(
                            from = %model_used,
                            to = %fallback_model,
                            reason = reason.as_str(),
                            "retrying once on fallback model"
                        );
                        buffer.clear();
                        self.emit(tx, SseEvent::retry(reason.as_str())).await?;
                        model_used = fallback_model;
                        let retry = self
                            .run_attempt(
                                &model_used,
                                &system_prompt,
                                history.clone(),
                                &enhanced,
                                &profile,
                                &user_id,
                                &mut buffer,
                                tx,
                            )
                            .await;
                        self.judge(retry, &buffer)?
                    }
                }
            }
            other => other,
        };

        match verdict {
            AttemptVerdict::Success(state, transcript_delta) => {
                self.manager.record_success(&model_used);
                self.finish_with_success(
                    tx,
                    &session_id,
                    &model_used,
                    &user_id,
                    &message.text,
                    state,
                    transcript_delta,
                    &buffer,
                )
                .await
            }
            AttemptVerdict::Fallback(reason) => {
                // The single retry is spent; the degraded outcome surfaces.
                self.manager.record_failure(&model_used);
                self.finish_with_error(tx, &session_id, &model_used, reason).await
            }
            AttemptVerdict::Fatal(code) => {
                self.manager.record_failure(&model_used);
                self.emit(
                    tx,
                    SseEvent::error(code, "დროებითი შეცდომა. გთხოვთ სცადოთ ხელახლა."),
                )
                .await?;
                self.emit(tx, SseEvent::done(&session_id, &model_used)).await
            }
        }
    }

    /// Terminal analysis of one attempt: success, fallback-worthy, or
    /// fatal. `Cancelled` and store failures propagate unchanged.
    fn judge(
        &self,
        attempt: EngineResult<(LoopState, Vec<Message>)>,
        buffer: &ResponseBuffer,
    ) -> EngineResult<AttemptVerdict> {
        let trigger = self.manager.trigger();
        match attempt {
            Ok((state, delta)) => {
                let decision =
                    trigger.analyze_response(state.last_finish_reason.as_ref(), buffer.text());
                if decision.should_fallback {
                    Ok(AttemptVerdict::Fallback(decision.reason))
                } else {
                    Ok(AttemptVerdict::Success(state, delta))
                }
            }
            Err(EngineError::EmptyResponse { .. }) => {
                Ok(AttemptVerdict::Fallback(FallbackReason::EmptyResponse))
            }
            Err(EngineError::LoopTimeout { .. }) => {
                Ok(AttemptVerdict::Fallback(FallbackReason::Timeout))
            }
            Err(EngineError::Upstream(err)) => {
                let decision = trigger.analyze_exception(&err);
                if decision.should_fallback {
                    Ok(AttemptVerdict::Fallback(decision.reason))
                } else {
                    error!(%err, "non-retryable upstream error");
                    Ok(AttemptVerdict::Fatal("upstream"))
                }
            }
            Err(other) => Err(other),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        model: &str,
        system_prompt: &str,
        history: Vec<Message>,
        enhanced_message: &str,
        profile: &Profile,
        user_id: &str,
        buffer: &mut ResponseBuffer,
        tx: &mpsc::Sender<SseEvent>,
    ) -> EngineResult<(LoopState, Vec<Message>)> {
        let seed_len = history.len();
        let mut session = self
            .upstream
            .open_session(model, system_prompt, history)
            .await?;
        let executor = ToolExecutor::new(
            Arc::clone(&self.tools),
            user_id,
            profile.clone(),
            self.config.max_unique_queries,
        );
        let loop_config = LoopConfig {
            max_rounds: self.config.max_rounds,
            round_timeout: self.config.round_timeout,
            ..LoopConfig::default()
        };

        let state = FunctionCallingLoop::new(
            session.as_mut(),
            &executor,
            buffer,
            tx.clone(),
            Arc::clone(&self.translator),
            loop_config,
        )
        .execute_streaming(enhanced_message.to_string())
        .await?;

        let delta = session.transcript()[seed_len..].to_vec();
        Ok((state, delta))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_with_success(
        &self,
        tx: &mpsc::Sender<SseEvent>,
        session_id: &str,
        model_used: &str,
        user_id: &str,
        raw_message: &str,
        state: LoopState,
        transcript_delta: Vec<Message>,
        buffer: &ResponseBuffer,
    ) -> EngineResult<()> {
        let snapshot = buffer.snapshot();
        if let Some(markdown) = snapshot.products_markdown {
            self.emit(tx, SseEvent::products(markdown)).await?;
        }
        if let Some(tip) = snapshot.tip {
            self.emit(tx, SseEvent::tip(tip)).await?;
        }
        if !snapshot.quick_replies.is_empty() {
            self.emit(tx, SseEvent::quick_replies(snapshot.quick_replies))
                .await?;
        }

        self.persist(user_id, session_id, raw_message, &transcript_delta)
            .await;

        info!(
            rounds = state.rounds_completed,
            products = state.all_products.len(),
            model = %model_used,
            "request complete"
        );
        self.emit(tx, SseEvent::done(session_id, model_used)).await
    }

    async fn finish_with_error(
        &self,
        tx: &mpsc::Sender<SseEvent>,
        session_id: &str,
        model_used: &str,
        reason: FallbackReason,
    ) -> EngineResult<()> {
        let (code, message_ka) = match reason {
            FallbackReason::EmptyResponse => (
                "empty_response",
                "პასუხის გენერირება ვერ მოხერხდა. გთხოვთ სცადოთ სხვანაირად.",
            ),
            FallbackReason::Timeout => ("timeout", "მოთხოვნას ძალიან დიდი დრო დასჭირდა."),
            FallbackReason::SafetyBlock | FallbackReason::Recitation => (
                "content_blocked",
                "ბოდიში, ეს კითხვა ვერ დამუშავდა. სცადეთ სხვანაირად.",
            ),
            _ => ("upstream", "დროებითი შეცდომა. გთხოვთ სცადოთ ხელახლა."),
        };
        self.emit(tx, SseEvent::error(code, message_ka)).await?;
        self.emit(tx, SseEvent::done(session_id, model_used)).await
    }

    /// Appends the user message and the assistant side of this request.
    /// The first delta entry is the enhanced outbound text; the raw user
    /// message is stored in its place. Best-effort: a storage failure does
    /// not fail the request.
    async fn persist(
        &self,
        user_id: &str,
        session_id: &str,
        raw_message: &str,
        transcript_delta: &[Message],
    ) {
        let mut to_store = vec![Message::user_text(raw_message)];
        to_store.extend(transcript_delta.iter().skip(1).cloned().map(strip_thoughts));

        if let Err(err) = self.history.append(user_id, session_id, &to_store).await {
            warn!(%err, session_id, "history append failed");
        }
    }

    async fn resolve_session(
        &self,
        user_id: &str,
        hint: Option<&str>,
    ) -> Result<(String, Vec<Message>), StoreError> {
        if let Some(hint) = hint {
            if let Some(history) = self
                .history
                .load_history(user_id, hint, self.config.history_keep)
                .await?
            {
                info!(session_id = hint, messages = history.len(), "session rebound");
                return Ok((hint.to_string(), history));
            }
            info!(hint, "session hint unknown, minting a new session");
        }
        let session_id = mint_session_id();
        Ok((session_id, Vec::new()))
    }

    fn build_system_prompt(&self, profile: &Profile) -> String {
        let base = self
            .prompt_cache
            .get_or_build(&self.config.tenant, || self.config.system_template.clone());
        if profile.is_empty() {
            return base;
        }

        let mut lines = Vec::new();
        if let Some(name) = &profile.name {
            lines.push(format!("მომხმარებლის სახელი: {}", name));
        }
        if let Some(height) = profile.height_cm {
            lines.push(format!("სიმაღლე: {} სმ", height));
        }
        if let Some(weight) = profile.weight_kg {
            lines.push(format!("წონა: {} კგ", weight));
        }
        if !profile.facts.is_empty() {
            lines.push(format!("ფაქტები: {}", profile.facts.join("; ")));
        }
        if !profile.daily_facts.is_empty() {
            lines.push(format!("დღევანდელი: {}", profile.daily_facts.join("; ")));
        }

        format!("{}\n\nმომხმარებლის პროფილი:\n{}", base, lines.join("\n"))
    }

    async fn emit(&self, tx: &mpsc::Sender<SseEvent>, event: SseEvent) -> EngineResult<()> {
        tx.send(event).await.map_err(|_| EngineError::Cancelled)
    }
}

/// Canonical session id form: `session_<hex16>`.
fn mint_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("session_{}", &hex[..16])
}

fn strip_thoughts(mut message: Message) -> Message {
    message
        .parts
        .retain(|part| !matches!(part, sb_core::types::MessagePart::Thought { .. }));
    message
}
