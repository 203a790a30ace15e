//! # Conversation Engine
//!
//! The streaming orchestration core: drives a multi-round function-calling
//! loop against an upstream generative model, buffers and tags the partial
//! output, and transparently fails over to an alternate model when the
//! primary blocks, errors, empties or truncates mid-stream.

pub mod buffer;
pub mod compactor;
pub mod engine;
pub mod error;
pub mod events;
pub mod function_loop;
pub mod presearch;
pub mod prompt_cache;
pub mod stores;
pub mod tools;
pub mod upstream;

pub use buffer::{BufferSnapshot, ParsedProduct, ResponseBuffer};
pub use compactor::ContextCompactor;
pub use engine::{ConversationEngine, EngineConfig};
pub use error::EngineError;
pub use events::SseEvent;
pub use function_loop::{FunctionCallingLoop, LoopConfig};
pub use presearch::PreSearch;
pub use prompt_cache::PromptCache;
pub use tools::ToolExecutor;
pub use upstream::{ChatSession, ChunkStream, StreamChunk, UpstreamClient};
