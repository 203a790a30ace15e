use sb_core::types::{Message, ModelDescriptor};

/// Per-message structural overhead (role, framing).
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Heuristic token counter for routing decisions.
///
/// Character-based, no API call, not billing-accurate. Georgian text packs
/// far fewer characters per token than ASCII, hence the script multiplier.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    script_multiplier: f64,
    safety_multiplier: f64,
    models: Vec<ModelDescriptor>,
}

impl TokenCounter {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            script_multiplier: 2.5,
            safety_multiplier: 1.1,
            models,
        }
    }

    /// Estimated token count for one text segment.
    pub fn count(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        let base = (text.len() as f64 / 4.0).ceil();
        let script = if has_georgian(text) {
            self.script_multiplier
        } else {
            1.0
        };
        (base * script * self.safety_multiplier).ceil() as u64
    }

    /// Estimated token count for a conversation history.
    pub fn count_history(&self, messages: &[Message]) -> u64 {
        messages
            .iter()
            .map(|m| self.count(&m.text_content()) + MESSAGE_OVERHEAD_TOKENS)
            .sum()
    }

    /// Configured context limit for a model, if known.
    pub fn model_limit(&self, model: &str) -> Option<u64> {
        self.models
            .iter()
            .find(|d| d.id == model)
            .map(|d| d.token_limit)
    }
}

/// Any code point in the Georgian blocks (Mkhedruli U+10A0–U+10FF or
/// Supplement U+2D00–U+2D2F).
fn has_georgian(text: &str) -> bool {
    text.chars().any(|c| {
        let cp = c as u32;
        (0x10A0..=0x10FF).contains(&cp) || (0x2D00..=0x2D2F).contains(&cp)
    })
}
