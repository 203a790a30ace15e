//! # Saubari Core
//!
//! Shared types and boundary traits for the saubari conversation engine.
//!
//! This crate provides:
//! - The conversation data model (messages, parts, finish reasons)
//! - Routing and fallback decision types shared by `inference` and `engine`
//! - Error types for the upstream model and the external stores
//! - Traits for the collaborators the core talks to but does not implement
//!   (history/profile stores, tool registry, memory hooks, thought
//!   translation)

pub mod error;
pub mod traits;
pub mod types;

pub use error::{StoreError, ToolError, UpstreamError};
pub use traits::{HistoryStore, MemoryHooks, ProfileStore, ThoughtTranslator, ToolRegistry};
pub use types::{
    FallbackDecision, FallbackReason, FinishReason, FunctionCall, LoopState, Message, MessagePart,
    ModelDescriptor, ModelRole, Profile, Role, RoundOutput, RoundResult, RouteReason,
    RoutingDecision, UserMessage,
};
