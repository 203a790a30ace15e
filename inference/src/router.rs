use tracing::info;

use sb_core::types::{ModelDescriptor, ModelRole, RouteReason, RoutingDecision};

use crate::breaker::CircuitBreaker;

/// Picks a model for one streaming attempt.
///
/// Priority order: oversize context wins over breaker health, a healthy
/// primary wins over everything else, and the fallback model is the floor.
pub struct ModelRouter {
    primary: ModelDescriptor,
    extended: ModelDescriptor,
    fallback: ModelDescriptor,
    extended_context_threshold: u64,
}

impl ModelRouter {
    pub fn new(
        primary: ModelDescriptor,
        extended: ModelDescriptor,
        fallback: ModelDescriptor,
        extended_context_threshold: u64,
    ) -> Self {
        debug_assert_eq!(primary.role, ModelRole::Primary);
        debug_assert_eq!(extended.role, ModelRole::Extended);
        debug_assert_eq!(fallback.role, ModelRole::Fallback);
        Self {
            primary,
            extended,
            fallback,
            extended_context_threshold,
        }
    }

    pub fn select(&self, token_count: u64, breaker: &CircuitBreaker) -> RoutingDecision {
        if token_count >= self.extended_context_threshold {
            info!(
                token_count,
                threshold = self.extended_context_threshold,
                model = %self.extended.id,
                "oversize context, routing to extended model"
            );
            return self.decision(&self.extended, RouteReason::OversizeContext);
        }

        if breaker.is_allowed(&self.primary.id) {
            return self.decision(&self.primary, RouteReason::PrimaryHealthy);
        }

        if breaker.is_allowed(&self.extended.id) {
            info!(model = %self.extended.id, "primary circuit open, routing to extended");
            return self.decision(&self.extended, RouteReason::PrimaryOpen);
        }

        info!(model = %self.fallback.id, "primary and extended unavailable, routing to fallback");
        self.decision(&self.fallback, RouteReason::ForcedFallback)
    }

    /// Next model in the fixed hierarchy, or `None` at the bottom.
    pub fn next_fallback(&self, current: &str) -> Option<String> {
        if current == self.primary.id {
            Some(self.extended.id.clone())
        } else if current == self.extended.id {
            Some(self.fallback.id.clone())
        } else {
            None
        }
    }

    pub fn descriptor(&self, model: &str) -> Option<&ModelDescriptor> {
        [&self.primary, &self.extended, &self.fallback]
            .into_iter()
            .find(|d| d.id == model)
    }

    fn decision(&self, model: &ModelDescriptor, reason: RouteReason) -> RoutingDecision {
        let next_fallback = self.next_fallback(&model.id);
        RoutingDecision {
            model: model.id.clone(),
            reason,
            can_retry: next_fallback.is_some(),
            next_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use std::time::Duration;

    fn router() -> ModelRouter {
        ModelRouter::new(
            ModelDescriptor {
                id: "primary".into(),
                token_limit: 200_000,
                role: ModelRole::Primary,
            },
            ModelDescriptor {
                id: "extended".into(),
                token_limit: 1_000_000,
                role: ModelRole::Extended,
            },
            ModelDescriptor {
                id: "fallback".into(),
                token_limit: 1_000_000,
                role: ModelRole::Fallback,
            },
            150_000,
        )
    }

    fn open_breaker_for(breaker: &CircuitBreaker, model: &str) {
        for _ in 0..5 {
            breaker.record_failure(model);
        }
    }

    #[test]
    fn healthy_primary_is_default() {
        let breaker = CircuitBreaker::default();
        let d = router().select(1_000, &breaker);
        assert_eq!(d.model, "primary");
        assert_eq!(d.reason, RouteReason::PrimaryHealthy);
        assert_eq!(d.next_fallback.as_deref(), Some("extended"));
        assert!(d.can_retry);
    }

    #[test]
    fn oversize_context_routes_to_extended() {
        let breaker = CircuitBreaker::default();
        let d = router().select(150_000, &breaker);
        assert_eq!(d.model, "extended");
        assert_eq!(d.reason, RouteReason::OversizeContext);
        assert_eq!(d.next_fallback.as_deref(), Some("fallback"));
    }

    #[test]
    fn open_primary_routes_to_extended() {
        let breaker = CircuitBreaker::default();
        open_breaker_for(&breaker, "primary");
        let d = router().select(1_000, &breaker);
        assert_eq!(d.model, "extended");
        assert_eq!(d.reason, RouteReason::PrimaryOpen);
    }

    #[test]
    fn all_open_routes_to_fallback_with_no_retry() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery: Duration::from_secs(60),
        });
        open_breaker_for(&breaker, "primary");
        open_breaker_for(&breaker, "extended");
        let d = router().select(1_000, &breaker);
        assert_eq!(d.model, "fallback");
        assert_eq!(d.reason, RouteReason::ForcedFallback);
        assert!(d.next_fallback.is_none());
        assert!(!d.can_retry);
    }

    #[test]
    fn fallback_hierarchy_is_fixed() {
        let r = router();
        assert_eq!(r.next_fallback("primary").as_deref(), Some("extended"));
        assert_eq!(r.next_fallback("extended").as_deref(), Some("fallback"));
        assert_eq!(r.next_fallback("fallback"), None);
        assert_eq!(r.next_fallback("unknown"), None);
    }
}
