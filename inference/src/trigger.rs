use regex::Regex;
use tracing::warn;

use sb_core::error::UpstreamError;
use sb_core::types::{FallbackDecision, FallbackReason, FinishReason};

/// Replies shorter than this are never flagged incomplete; short answers
/// are legitimate.
const SHORT_REPLY_EXEMPTION_CHARS: usize = 50;

/// Stateless classifier of upstream outcomes into fallback decisions.
///
/// Circuit state is managed separately; this only says whether the
/// response or error warrants switching models.
pub struct FallbackTrigger {
    /// Curated, empirically tuned trailing-token patterns. A response that
    /// stops on one of these was cut off mid-structure.
    incomplete_patterns: Vec<Regex>,
    /// A SAFETY stop under this many characters is a block, over it a
    /// legitimate truncation. Tuned for Georgian, where a complete answer
    /// typically runs 1,000–2,500 characters.
    safety_text_threshold: usize,
}

impl FallbackTrigger {
    pub fn new(safety_text_threshold: usize) -> Self {
        let incomplete_patterns = [
            r":\s*$",
            r"(?:^|\s)და\s*$",
            r"(?:^|\s)მაგრამ\s*$",
            r"შემდეგი:\s*$",
            r"ვარიანტები:\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();

        Self {
            incomplete_patterns,
            safety_text_threshold,
        }
    }

    /// Classifies a finished response by its terminal marker and text.
    pub fn analyze_response(
        &self,
        finish_reason: Option<&FinishReason>,
        text: &str,
    ) -> FallbackDecision {
        let stripped = text.trim();

        match finish_reason {
            Some(FinishReason::Safety) => {
                if stripped.chars().count() < self.safety_text_threshold {
                    warn!(
                        chars = stripped.chars().count(),
                        "safety block on short output, falling back"
                    );
                    return FallbackDecision {
                        should_fallback: true,
                        reason: FallbackReason::SafetyBlock,
                        is_retryable: true,
                    };
                }
                // A long response cut by SAFETY is delivered as-is.
                return FallbackDecision::none();
            }
            Some(FinishReason::Recitation) => {
                return FallbackDecision {
                    should_fallback: true,
                    reason: FallbackReason::Recitation,
                    is_retryable: true,
                };
            }
            _ => {}
        }

        if stripped.is_empty() {
            return FallbackDecision {
                should_fallback: true,
                reason: FallbackReason::EmptyResponse,
                is_retryable: true,
            };
        }

        if matches!(finish_reason, Some(FinishReason::Stop)) {
            return self.analyze_text_completeness(text);
        }

        FallbackDecision::none()
    }

    /// Classifies a transport-level failure.
    pub fn analyze_exception(&self, error: &UpstreamError) -> FallbackDecision {
        let reason = match error {
            UpstreamError::Http { status, .. } if matches!(status, 500 | 503 | 429) => {
                FallbackReason::ServiceUnavailable
            }
            UpstreamError::ConnectionReset(_) => FallbackReason::ServiceUnavailable,
            UpstreamError::Timeout { .. } => FallbackReason::Timeout,
            _ => {
                return FallbackDecision::none();
            }
        };

        FallbackDecision {
            should_fallback: true,
            reason,
            is_retryable: true,
        }
    }

    /// Detects responses that stopped mid-structure (trailing colon or a
    /// dangling conjunction).
    pub fn analyze_text_completeness(&self, text: &str) -> FallbackDecision {
        let stripped = text.trim();
        if stripped.chars().count() < SHORT_REPLY_EXEMPTION_CHARS {
            return FallbackDecision::none();
        }

        for pattern in &self.incomplete_patterns {
            if pattern.is_match(stripped) {
                warn!(pattern = %pattern, "incomplete response detected");
                return FallbackDecision {
                    should_fallback: true,
                    reason: FallbackReason::IncompleteResponse,
                    is_retryable: true,
                };
            }
        }

        FallbackDecision::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> FallbackTrigger {
        FallbackTrigger::new(800)
    }

    fn long_text(suffix: &str) -> String {
        format!("{} {}", "სრული პასუხი ".repeat(10), suffix)
    }

    #[test]
    fn safety_with_short_text_falls_back() {
        let d = trigger().analyze_response(Some(&FinishReason::Safety), "მოკლე პასუხი");
        assert!(d.should_fallback);
        assert_eq!(d.reason, FallbackReason::SafetyBlock);
        assert!(d.is_retryable);
    }

    #[test]
    fn safety_with_long_text_passes_through() {
        let text = "ა".repeat(1400);
        let d = trigger().analyze_response(Some(&FinishReason::Safety), &text);
        assert!(!d.should_fallback);
    }

    #[test]
    fn recitation_always_falls_back() {
        let text = "ა".repeat(1400);
        let d = trigger().analyze_response(Some(&FinishReason::Recitation), &text);
        assert!(d.should_fallback);
        assert_eq!(d.reason, FallbackReason::Recitation);
    }

    #[test]
    fn empty_text_falls_back() {
        let d = trigger().analyze_response(Some(&FinishReason::Stop), "   ");
        assert_eq!(d.reason, FallbackReason::EmptyResponse);
        assert!(d.should_fallback);
    }

    #[test]
    fn stop_with_trailing_colon_is_incomplete() {
        let d = trigger().analyze_response(Some(&FinishReason::Stop), &long_text("ვარიანტები:"));
        assert!(d.should_fallback);
        assert_eq!(d.reason, FallbackReason::IncompleteResponse);
    }

    #[test]
    fn stop_with_dangling_conjunction_is_incomplete() {
        for suffix in ["და", "მაგრამ"] {
            let d = trigger().analyze_text_completeness(&long_text(suffix));
            assert!(d.should_fallback, "expected fallback for '{}'", suffix);
        }
    }

    #[test]
    fn conjunction_inside_a_word_is_not_flagged() {
        // Words merely ending in the same letters are not the conjunction.
        let d = trigger().analyze_text_completeness(&long_text("განდა"));
        assert!(!d.should_fallback);
    }

    #[test]
    fn short_replies_are_never_incomplete() {
        let d = trigger().analyze_text_completeness("კარგი და");
        assert!(!d.should_fallback);
    }

    #[test]
    fn terminal_punctuation_is_complete() {
        for suffix in ["დასასრული.", "მართლა!", "ასეა?", "(დიახ)", "45 ₾"] {
            let d = trigger().analyze_response(Some(&FinishReason::Stop), &long_text(suffix));
            assert!(!d.should_fallback, "'{}' wrongly flagged", suffix);
        }
    }

    #[test]
    fn service_errors_are_retryable() {
        let t = trigger();
        for status in [500u16, 503, 429] {
            let d = t.analyze_exception(&UpstreamError::Http {
                status,
                message: "outage".into(),
            });
            assert!(d.should_fallback);
            assert_eq!(d.reason, FallbackReason::ServiceUnavailable);
        }

        let d = t.analyze_exception(&UpstreamError::Timeout { seconds: 30 });
        assert_eq!(d.reason, FallbackReason::Timeout);

        let d = t.analyze_exception(&UpstreamError::ConnectionReset("peer".into()));
        assert!(d.should_fallback);
    }

    #[test]
    fn client_errors_do_not_fall_back() {
        let d = trigger().analyze_exception(&UpstreamError::Http {
            status: 400,
            message: "bad request".into(),
        });
        assert!(!d.should_fallback);
    }
}
