use std::time::Duration;

use proptest::prelude::*;

use inference::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
use inference::tokens::TokenCounter;
use inference::trigger::FallbackTrigger;
use sb_core::types::{FinishReason, Message, ModelDescriptor, ModelRole};

fn counter() -> TokenCounter {
    TokenCounter::new(vec![ModelDescriptor {
        id: "primary".into(),
        token_limit: 200_000,
        role: ModelRole::Primary,
    }])
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Success,
    Failure,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Success), Just(Op::Failure)]
}

proptest! {
    // With a recovery window no test run can outlive, the only legal
    // transitions are CLOSED -> OPEN (on the 5th consecutive failure) and
    // self-loops. The breaker must follow the reference machine exactly.
    #[test]
    fn breaker_follows_reference_machine(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery: Duration::from_secs(3600),
        });

        let mut expected_open = false;
        let mut streak = 0u32;

        for op in ops {
            match op {
                Op::Success => {
                    cb.record_success("m");
                    streak = 0;
                }
                Op::Failure => {
                    cb.record_failure("m");
                    streak += 1;
                    if !expected_open && streak >= 5 {
                        expected_open = true;
                    }
                }
            }

            let snapshot = cb.status("m");
            let expected = if expected_open {
                CircuitStatus::Open
            } else {
                CircuitStatus::Closed
            };
            prop_assert_eq!(snapshot.status, expected);
            prop_assert_eq!(cb.is_allowed("m"), !expected_open);
        }
    }

    // Appending a message can never shrink the history estimate.
    #[test]
    fn history_count_is_monotone(
        texts in prop::collection::vec("\\PC{0,200}", 0..20),
        extra in "\\PC{0,200}",
    ) {
        let c = counter();
        let history: Vec<Message> = texts.into_iter().map(Message::user_text).collect();

        let mut extended = history.clone();
        extended.push(Message::user_text(extra));

        prop_assert!(c.count_history(&extended) >= c.count_history(&history));
    }

    // A STOP response ending on terminal punctuation is never flagged
    // incomplete, no matter what precedes it.
    #[test]
    fn terminal_punctuation_is_never_incomplete(
        body in "\\PC{50,400}",
        terminal in prop::sample::select(vec!['.', '!', '?', ')', '₾']),
    ) {
        let trigger = FallbackTrigger::new(800);
        let text = format!("{}{}", body, terminal);
        let decision = trigger.analyze_response(Some(&FinishReason::Stop), &text);
        prop_assert!(!decision.should_fallback, "flagged: {:?}", decision.reason);
    }
}
