//! # Hybrid Inference
//!
//! Model selection and health tracking for the conversation engine:
//! per-model circuit breaking, heuristic token counting, fallback trigger
//! classification and the routing façade that ties them together.

pub mod breaker;
pub mod manager;
pub mod router;
pub mod tokens;
pub mod trigger;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitStatus};
pub use manager::{HybridConfig, HybridInferenceManager, InferenceMetrics};
pub use router::ModelRouter;
pub use tokens::TokenCounter;
pub use trigger::FallbackTrigger;
