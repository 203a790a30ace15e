use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

use sb_core::traits::ThoughtTranslator;
use sb_core::types::{
    FunctionCall, LoopState, Message, MessagePart, Role, RoundOutput, RoundResult,
};

use crate::buffer::ResponseBuffer;
use crate::error::{EngineError, EngineResult};
use crate::events::SseEvent;
use crate::tools::ToolExecutor;
use crate::upstream::ChatSession;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_rounds: u32,
    pub round_timeout: Duration,
    /// Text at or under this many characters ahead of a function call is an
    /// interrupted prelude and is dropped; past it the text streams out as
    /// a legitimate narrative prefix.
    pub prelude_hold_chars: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_timeout: Duration::from_secs(30),
            prelude_hold_chars: 50,
        }
    }
}

/// Drives the bounded multi-round dialog with the upstream model.
///
/// Each round sends one message (the user text, then tool responses),
/// drains the streaming reply into text, thoughts and function calls, and
/// classifies the outcome. Text is forwarded to the client through the
/// bound [`ResponseBuffer`] and event channel as it arrives, except for a
/// possible prelude held back until it outgrows the hold window.
pub struct FunctionCallingLoop<'a> {
    session: &'a mut dyn ChatSession,
    executor: &'a ToolExecutor,
    buffer: &'a mut ResponseBuffer,
    events: mpsc::Sender<SseEvent>,
    translator: Arc<dyn ThoughtTranslator>,
    config: LoopConfig,
}

impl<'a> FunctionCallingLoop<'a> {
    pub fn new(
        session: &'a mut dyn ChatSession,
        executor: &'a ToolExecutor,
        buffer: &'a mut ResponseBuffer,
        events: mpsc::Sender<SseEvent>,
        translator: Arc<dyn ThoughtTranslator>,
        config: LoopConfig,
    ) -> Self {
        Self {
            session,
            executor,
            buffer,
            events,
            translator,
            config,
        }
    }

    pub async fn execute_streaming(&mut self, initial_message: String) -> EngineResult<LoopState> {
        let span = info_span!("function_loop", max_rounds = self.config.max_rounds);
        async move {
            let mut state = LoopState::default();
            let mut outbound = Message::user_text(initial_message);

            for round_index in 0..self.config.max_rounds {
                info!(round = round_index + 1, "loop round");
                let output = self.run_round(outbound).await?;
                self.absorb(&mut state, &output);

                match output.result {
                    RoundResult::Complete => {
                        info!(
                            rounds = state.rounds_completed,
                            chars = state.accumulated_text.chars().count(),
                            "loop complete"
                        );
                        return Ok(state);
                    }
                    RoundResult::Continue => {
                        outbound = self.execute_calls(&output.function_calls, &mut state).await;
                    }
                    RoundResult::Empty => {
                        if state.forced_round_used {
                            return Err(EngineError::EmptyResponse {
                                rounds: state.rounds_completed,
                                forced_round: true,
                            });
                        }
                        warn!(round = round_index + 1, "empty round, forcing a text reply");
                        state.forced_round_used = true;
                        outbound = self.forced_text_message(&state);
                    }
                }
            }

            // Round bound reached without a completing round. One forced
            // round, counted separately, before giving up.
            if !state.forced_round_used && state.accumulated_text.trim().is_empty() {
                warn!("round bound reached with no text, forcing a text reply");
                state.forced_round_used = true;
                let output = self.run_round(self.forced_text_message(&state)).await?;
                self.absorb(&mut state, &output);
            }

            if state.accumulated_text.trim().is_empty() {
                return Err(EngineError::EmptyResponse {
                    rounds: state.rounds_completed,
                    forced_round: state.forced_round_used,
                });
            }

            Ok(state)
        }
        .instrument(span)
        .await
    }

    async fn run_round(&mut self, outbound: Message) -> EngineResult<RoundOutput> {
        let deadline = self.config.round_timeout;
        match tokio::time::timeout(deadline, self.drive_round(outbound)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::LoopTimeout {
                seconds: deadline.as_secs(),
            }),
        }
    }

    async fn drive_round(&mut self, outbound: Message) -> EngineResult<RoundOutput> {
        let mut stream = self.session.send(outbound).await?;

        let mut flushed = String::new();
        let mut pending = String::new();
        let mut function_calls: Vec<FunctionCall> = Vec::new();
        let mut thoughts: Vec<String> = Vec::new();
        let mut finish_reason = None;

        while let Some(item) = stream.next().await {
            let chunk = item?;
            if let Some(reason) = chunk.finish_reason {
                finish_reason = Some(reason);
            }

            // parts may be null even on a successful chunk.
            for part in chunk.parts.as_deref().unwrap_or(&[]) {
                match part {
                    MessagePart::Thought { text } => {
                        thoughts.push(text.clone());
                        if let Some(status) = self.translator.translate(text).await {
                            self.emit(SseEvent::thinking(status)).await?;
                        }
                    }
                    MessagePart::FunctionCall {
                        name,
                        args,
                        thought_signature,
                    } => {
                        function_calls.push(FunctionCall {
                            name: name.clone(),
                            args: args.clone(),
                            thought_signature: thought_signature.clone(),
                        });
                    }
                    MessagePart::Text { text } => {
                        pending.push_str(text);
                        let past_hold =
                            pending.trim().chars().count() > self.config.prelude_hold_chars;
                        if !flushed.is_empty() || past_hold {
                            self.flush(&mut pending, &mut flushed).await?;
                        }
                    }
                    MessagePart::FunctionResponse { .. } => {}
                }
            }
        }

        drop(stream);

        let total_chars = {
            let mut all = flushed.clone();
            all.push_str(&pending);
            all.trim().chars().count()
        };

        let (result, text) = if !function_calls.is_empty() {
            if flushed.is_empty() && total_chars <= self.config.prelude_hold_chars {
                if total_chars > 0 {
                    info!(chars = total_chars, "discarding interrupted prelude");
                }
                pending.clear();
                (RoundResult::Continue, String::new())
            } else {
                self.flush(&mut pending, &mut flushed).await?;
                (RoundResult::Continue, flushed)
            }
        } else if total_chars > 0 {
            self.flush(&mut pending, &mut flushed).await?;
            (RoundResult::Complete, flushed)
        } else {
            (RoundResult::Empty, String::new())
        };

        Ok(RoundOutput {
            result,
            text,
            function_calls,
            thoughts,
            finish_reason,
        })
    }

    /// Executes the round's calls sequentially and builds the next
    /// outbound message from their responses.
    async fn execute_calls(&mut self, calls: &[FunctionCall], state: &mut LoopState) -> Message {
        let mut parts = Vec::with_capacity(calls.len());
        for call in calls {
            info!(tool = %call.name, "executing tool call");
            let outcome = self.executor.execute(call, state).await;
            parts.push(MessagePart::function_response(outcome.name, outcome.response));
        }
        Message {
            role: Role::Tool,
            parts,
        }
    }

    fn forced_text_message(&self, state: &LoopState) -> Message {
        let instruction = format!(
            "ნაპოვნია {} პროდუქტი. დაწერე მოკლე რეკომენდაცია ქართულად ახლავე. \
             აუცილებლად დაწერე ტექსტი, არა მხოლოდ პროდუქტების სია!",
            state.all_products.len()
        );
        Message {
            role: Role::Tool,
            parts: vec![MessagePart::function_response(
                "respond_now",
                json!({ "status": "RESPOND_NOW", "instruction": instruction }),
            )],
        }
    }

    /// Folds a round into the loop state and records the model's side of
    /// the exchange so the next round replays it, signatures intact.
    fn absorb(&mut self, state: &mut LoopState, output: &RoundOutput) {
        state.rounds_completed += 1;
        if output.finish_reason.is_some() {
            state.last_finish_reason = output.finish_reason.clone();
        }
        if !output.text.is_empty() {
            state.accumulated_text.push_str(&output.text);
        }

        let mut parts: Vec<MessagePart> = Vec::new();
        if !output.text.is_empty() {
            parts.push(MessagePart::text(output.text.clone()));
        }
        for call in &output.function_calls {
            parts.push(MessagePart::FunctionCall {
                name: call.name.clone(),
                args: call.args.clone(),
                thought_signature: call.thought_signature.clone(),
            });
        }
        if !parts.is_empty() {
            self.session.record_reply(Message {
                role: Role::Assistant,
                parts,
            });
        }
    }

    async fn flush(&mut self, pending: &mut String, flushed: &mut String) -> EngineResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(pending);
        self.buffer.append_chunk(&chunk);
        flushed.push_str(&chunk);
        self.emit(SseEvent::text(chunk)).await
    }

    async fn emit(&self, event: SseEvent) -> EngineResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| EngineError::Cancelled)
    }
}
