//! Scripted upstream for tests.
//!
//! Sessions replay queued rounds in order; each `send` pops the next
//! round. Opened models are recorded so tests can assert fallback paths.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use sb_core::error::UpstreamError;
use sb_core::types::{FinishReason, Message, MessagePart};

use super::{ChatSession, ChunkStream, StreamChunk, UpstreamClient};

/// What one `send` call should produce.
pub enum ScriptedRound {
    /// Chunks streamed in order; each may itself be a mid-stream error.
    Chunks(Vec<Result<StreamChunk, UpstreamError>>),
    /// The request itself fails before any chunk.
    Fail(UpstreamError),
}

impl ScriptedRound {
    /// A round streaming `text` split into chunk-sized pieces, then the
    /// finish marker.
    pub fn text(pieces: &[&str], finish: FinishReason) -> Self {
        let mut chunks: Vec<Result<StreamChunk, UpstreamError>> = pieces
            .iter()
            .map(|piece| {
                Ok(StreamChunk {
                    parts: Some(vec![MessagePart::text(*piece)]),
                    finish_reason: None,
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            parts: None,
            finish_reason: Some(finish),
        }));
        ScriptedRound::Chunks(chunks)
    }

    /// A round answering with function calls (optionally after a prelude).
    pub fn function_calls(prelude: Option<&str>, calls: Vec<MessagePart>) -> Self {
        let mut chunks: Vec<Result<StreamChunk, UpstreamError>> = Vec::new();
        if let Some(text) = prelude {
            chunks.push(Ok(StreamChunk {
                parts: Some(vec![MessagePart::text(text)]),
                finish_reason: None,
            }));
        }
        chunks.push(Ok(StreamChunk {
            parts: Some(calls),
            finish_reason: Some(FinishReason::ToolCall),
        }));
        ScriptedRound::Chunks(chunks)
    }

    /// A round with no parts at all.
    pub fn empty(finish: FinishReason) -> Self {
        ScriptedRound::Chunks(vec![Ok(StreamChunk {
            parts: None,
            finish_reason: Some(finish),
        })])
    }
}

/// Upstream double that hands out one scripted session per `open_session`
/// call, in order.
pub struct ScriptedUpstream {
    sessions: Mutex<VecDeque<Vec<ScriptedRound>>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new(sessions: Vec<Vec<ScriptedRound>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Models passed to `open_session`, in call order.
    pub fn opened_models(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn open_session(
        &self,
        model: &str,
        _system_instruction: &str,
        history: Vec<Message>,
    ) -> Result<Box<dyn ChatSession>, UpstreamError> {
        self.opened.lock().unwrap().push(model.to_string());
        let rounds = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedSession {
            rounds: rounds.into(),
            transcript: history,
        }))
    }
}

struct ScriptedSession {
    rounds: VecDeque<ScriptedRound>,
    transcript: Vec<Message>,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn send(&mut self, message: Message) -> Result<ChunkStream, UpstreamError> {
        self.transcript.push(message);
        match self.rounds.pop_front() {
            Some(ScriptedRound::Chunks(chunks)) => Ok(Box::pin(stream::iter(chunks))),
            Some(ScriptedRound::Fail(error)) => Err(error),
            None => Ok(Box::pin(stream::iter(vec![Ok(StreamChunk {
                parts: None,
                finish_reason: Some(FinishReason::Stop),
            })]))),
        }
    }

    fn record_reply(&mut self, message: Message) {
        self.transcript.push(message);
    }

    fn transcript(&self) -> &[Message] {
        &self.transcript
    }
}
