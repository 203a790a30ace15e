use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One part of a conversation message.
///
/// A message from the upstream model may interleave text, internal thoughts
/// and function calls; a message from us carries text or function responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    FunctionCall {
        name: String,
        args: serde_json::Value,
        /// Opaque reasoning blob attached by the upstream to the first
        /// function-call part of a round. Echoed back verbatim so the model
        /// can continue its reasoning thread.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
    /// Internal reasoning text. Never forwarded to the end user except as a
    /// translated status line.
    Thought {
        text: String,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    pub fn function_response(name: impl Into<String>, response: serde_json::Value) -> Self {
        MessagePart::FunctionResponse {
            name: name.into(),
            response,
        }
    }
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            parts: vec![MessagePart::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            parts: vec![MessagePart::text(text)],
        }
    }

    /// Concatenated text content of this message, thoughts excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// An inbound user message as received by the entrypoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Client-supplied session key. Rebound only when it matches a stored
    /// session for this user; otherwise a canonical id is minted.
    #[serde(default)]
    pub session_hint: Option<String>,
}

/// User attributes substituted into the system prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub daily_facts: Vec<String>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.height_cm.is_none()
            && self.weight_kg.is_none()
            && self.facts.is_empty()
            && self.daily_facts.is_empty()
    }
}

/// Position of a model in the fallback hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Primary,
    Extended,
    Fallback,
}

/// A configured upstream model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub token_limit: u64,
    pub role: ModelRole,
}

/// Terminal marker attached by the upstream to the last streaming chunk of
/// a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    Safety,
    Recitation,
    MaxTokens,
    ToolCall,
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "STOP" => FinishReason::Stop,
            "SAFETY" => FinishReason::Safety,
            "RECITATION" => FinishReason::Recitation,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "TOOL_CALL" => FinishReason::ToolCall,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Why the router picked a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    PrimaryHealthy,
    PrimaryOpen,
    OversizeContext,
    ForcedFallback,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::PrimaryHealthy => "primary_healthy",
            RouteReason::PrimaryOpen => "primary_open",
            RouteReason::OversizeContext => "oversize_context",
            RouteReason::ForcedFallback => "forced_fallback",
        }
    }
}

/// Result of model selection for one streaming attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub model: String,
    pub reason: RouteReason,
    pub can_retry: bool,
    pub next_fallback: Option<String>,
}

/// Categorized fallback trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    SafetyBlock,
    Recitation,
    ServiceUnavailable,
    Timeout,
    EmptyResponse,
    IncompleteResponse,
    None,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::SafetyBlock => "safety_block",
            FallbackReason::Recitation => "recitation",
            FallbackReason::ServiceUnavailable => "service_unavailable",
            FallbackReason::Timeout => "timeout",
            FallbackReason::EmptyResponse => "empty_response",
            FallbackReason::IncompleteResponse => "incomplete_response",
            FallbackReason::None => "none",
        }
    }
}

/// Result of fallback trigger analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackDecision {
    pub should_fallback: bool,
    pub reason: FallbackReason,
    pub is_retryable: bool,
}

impl FallbackDecision {
    pub fn none() -> Self {
        FallbackDecision {
            should_fallback: false,
            reason: FallbackReason::None,
            is_retryable: false,
        }
    }
}

/// Normalized function call extracted from an upstream response part.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
    pub thought_signature: Option<String>,
}

/// Outcome of a single round of the function-calling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundResult {
    /// Function calls requested, another round follows.
    Continue,
    /// User-facing text produced, the loop exits.
    Complete,
    /// Neither text nor function calls.
    Empty,
}

/// Everything one round of the loop produced.
#[derive(Debug, Clone)]
pub struct RoundOutput {
    pub result: RoundResult,
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
    pub thoughts: Vec<String>,
    pub finish_reason: Option<FinishReason>,
}

/// Mutable state accumulated across loop rounds.
#[derive(Debug, Default)]
pub struct LoopState {
    pub accumulated_text: String,
    pub all_products: Vec<serde_json::Value>,
    pub executed_queries: HashSet<String>,
    pub last_finish_reason: Option<FinishReason>,
    pub rounds_completed: u32,
    pub forced_round_used: bool,
    product_ids: HashSet<String>,
}

impl LoopState {
    /// Adds products with id-based deduplication. Products without any of
    /// the known id fields are kept as-is. Returns the number added.
    pub fn add_products(&mut self, products: &[serde_json::Value]) -> usize {
        let mut added = 0;
        for product in products {
            let pid = ["id", "_id", "product_id"]
                .iter()
                .find_map(|key| product.get(*key))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            match pid {
                Some(pid) => {
                    if self.product_ids.insert(pid) {
                        self.all_products.push(product.clone());
                        added += 1;
                    }
                }
                None => {
                    self.all_products.push(product.clone());
                    added += 1;
                }
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finish_reason_parses_known_and_unknown() {
        assert_eq!(FinishReason::parse("STOP"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("SAFETY"), FinishReason::Safety);
        assert_eq!(
            FinishReason::parse("BLOCKLIST"),
            FinishReason::Other("BLOCKLIST".to_string())
        );
    }

    #[test]
    fn message_text_content_skips_thoughts_and_calls() {
        let message = Message {
            role: Role::Assistant,
            parts: vec![
                MessagePart::Thought {
                    text: "pondering".into(),
                },
                MessagePart::text("Hello "),
                MessagePart::FunctionCall {
                    name: "search".into(),
                    args: json!({"query": "x"}),
                    thought_signature: None,
                },
                MessagePart::text("world"),
            ],
        };
        assert_eq!(message.text_content(), "Hello world");
    }

    #[test]
    fn add_products_dedupes_by_any_id_field() {
        let mut state = LoopState::default();
        let added = state.add_products(&[
            json!({"id": "p1", "name": "a"}),
            json!({"_id": "p1", "name": "a-again"}),
            json!({"product_id": "p2", "name": "b"}),
            json!({"name": "no id"}),
        ]);
        assert_eq!(added, 3);
        assert_eq!(state.all_products.len(), 3);

        // Re-adding the same ids is a no-op.
        assert_eq!(state.add_products(&[json!({"id": "p2"})]), 0);
    }

    #[test]
    fn message_part_round_trips_through_serde() {
        let part = MessagePart::FunctionCall {
            name: "search_products".into(),
            args: json!({"query": "პროტეინი"}),
            thought_signature: Some("c2ln".into()),
        };
        let encoded = serde_json::to_string(&part).unwrap();
        let decoded: MessagePart = serde_json::from_str(&encoded).unwrap();
        assert_eq!(part, decoded);
    }
}
