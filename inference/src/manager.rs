use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

use sb_core::types::{Message, ModelDescriptor, ModelRole, RoutingDecision};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::router::ModelRouter;
use crate::tokens::TokenCounter;
use crate::trigger::FallbackTrigger;

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub primary: ModelDescriptor,
    pub extended: ModelDescriptor,
    pub fallback: ModelDescriptor,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery: Duration,
    pub extended_context_threshold: u64,
    pub safety_text_threshold: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            primary: ModelDescriptor {
                id: "gemini-3-flash-preview".into(),
                token_limit: 200_000,
                role: ModelRole::Primary,
            },
            extended: ModelDescriptor {
                id: "gemini-2.5-pro".into(),
                token_limit: 1_000_000,
                role: ModelRole::Extended,
            },
            fallback: ModelDescriptor {
                id: "gemini-2.5-flash".into(),
                token_limit: 1_000_000,
                role: ModelRole::Fallback,
            },
            circuit_failure_threshold: 5,
            circuit_recovery: Duration::from_secs(60),
            extended_context_threshold: 150_000,
            safety_text_threshold: 800,
        }
    }
}

/// Counters shared across all requests, read by the metrics endpoint.
#[derive(Debug, Default)]
pub struct InferenceMetrics {
    total_routes: AtomicU64,
    fallback_uses: AtomicU64,
    extended_uses: AtomicU64,
    failures_recorded: AtomicU64,
}

impl InferenceMetrics {
    pub fn total_routes(&self) -> u64 {
        self.total_routes.load(Ordering::Relaxed)
    }

    pub fn fallback_uses(&self) -> u64 {
        self.fallback_uses.load(Ordering::Relaxed)
    }

    pub fn extended_uses(&self) -> u64 {
        self.extended_uses.load(Ordering::Relaxed)
    }

    pub fn failures_recorded(&self) -> u64 {
        self.failures_recorded.load(Ordering::Relaxed)
    }
}

/// Façade over the routing components, shared process-wide.
///
/// The manager does not interpret failure semantics; callers classify
/// outcomes through [`FallbackTrigger`] and only report the verdict here.
pub struct HybridInferenceManager {
    breaker: CircuitBreaker,
    counter: TokenCounter,
    router: ModelRouter,
    trigger: FallbackTrigger,
    metrics: InferenceMetrics,
}

impl HybridInferenceManager {
    pub fn new(config: HybridConfig) -> Self {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            recovery: config.circuit_recovery,
        });
        let counter = TokenCounter::new(vec![
            config.primary.clone(),
            config.extended.clone(),
            config.fallback.clone(),
        ]);
        let router = ModelRouter::new(
            config.primary.clone(),
            config.extended.clone(),
            config.fallback.clone(),
            config.extended_context_threshold,
        );
        let trigger = FallbackTrigger::new(config.safety_text_threshold);

        info!(
            primary = %config.primary.id,
            extended = %config.extended.id,
            fallback = %config.fallback.id,
            threshold = config.extended_context_threshold,
            "hybrid inference manager initialized"
        );

        Self {
            breaker,
            counter,
            router,
            trigger,
            metrics: InferenceMetrics::default(),
        }
    }

    /// Picks a model for the request given its estimated context size and
    /// current breaker health.
    pub fn route_request(&self, message: &str, history: &[Message]) -> RoutingDecision {
        let token_count = self.counter.count(message) + self.counter.count_history(history);
        let decision = self.router.select(token_count, &self.breaker);

        self.metrics.total_routes.fetch_add(1, Ordering::Relaxed);
        match decision.reason {
            // Both of these land on the extended model.
            sb_core::types::RouteReason::OversizeContext
            | sb_core::types::RouteReason::PrimaryOpen => {
                self.metrics.extended_uses.fetch_add(1, Ordering::Relaxed);
            }
            sb_core::types::RouteReason::ForcedFallback => {
                self.metrics.fallback_uses.fetch_add(1, Ordering::Relaxed);
            }
            sb_core::types::RouteReason::PrimaryHealthy => {}
        }

        info!(
            model = %decision.model,
            reason = decision.reason.as_str(),
            token_count,
            "routed request"
        );
        decision
    }

    pub fn record_success(&self, model: &str) {
        self.breaker.record_success(model);
    }

    pub fn record_failure(&self, model: &str) {
        self.metrics.failures_recorded.fetch_add(1, Ordering::Relaxed);
        self.breaker.record_failure(model);
    }

    /// Next model in the fixed fallback hierarchy. The caller schedules at
    /// most one fallback attempt per request.
    pub fn get_fallback_model(&self, current: &str) -> Option<String> {
        self.router.next_fallback(current)
    }

    pub fn model_limit(&self, model: &str) -> Option<u64> {
        self.counter.model_limit(model)
    }

    pub fn trigger(&self) -> &FallbackTrigger {
        &self.trigger
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }
}

impl Default for HybridInferenceManager {
    fn default() -> Self {
        Self::new(HybridConfig::default())
    }
}
