//! Upstream chat-session abstraction.
//!
//! The engine is written against these traits so the loop is testable
//! without the real model; the production implementation lives in
//! [`gemini`], the scripted test double in [`scripted`].

pub mod gemini;
pub mod scripted;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use sb_core::error::UpstreamError;
use sb_core::types::{FinishReason, Message, MessagePart};

/// One streaming chunk of a round's reply.
///
/// `parts` may be absent even on a nominally successful chunk; consumers
/// must substitute an empty sequence, never fail.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub parts: Option<Vec<MessagePart>>,
    pub finish_reason: Option<FinishReason>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, UpstreamError>> + Send>>;

/// A bound chat session against one model.
///
/// The session owns the transcript: `send` records the outbound message,
/// and the caller reports the assembled model reply with `record_reply`
/// once the round's stream has been drained, so the next round carries the
/// full exchange (thought signatures included, verbatim).
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send(&mut self, message: Message) -> Result<ChunkStream, UpstreamError>;

    fn record_reply(&mut self, message: Message);

    /// Everything exchanged in this session, seed history included.
    fn transcript(&self) -> &[Message];
}

/// Factory for chat sessions. Exactly one model is bound per session; a
/// fallback attempt opens a fresh session against the next model.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn open_session(
        &self,
        model: &str,
        system_instruction: &str,
        history: Vec<Message>,
    ) -> Result<Box<dyn ChatSession>, UpstreamError>;
}
