use std::sync::Arc;

use tracing::{info, warn};

use inference::TokenCounter;
use sb_core::traits::MemoryHooks;
use sb_core::types::Message;

/// Synchronous compaction gate on the request hot path.
///
/// Only runs when the estimated context crosses the ratio of the model's
/// limit. Facts are flushed out of the pruned messages first, then the
/// pruned prefix collapses into a single synthetic summary message.
pub struct ContextCompactor {
    ratio: f64,
    prune_ratio: f64,
}

impl ContextCompactor {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            prune_ratio: 0.5,
        }
    }

    /// `extra_tokens` covers the parts outside the stored history (the
    /// incoming message and any injected context).
    pub fn should_compact(
        &self,
        counter: &TokenCounter,
        history: &[Message],
        extra_tokens: u64,
        limit: u64,
    ) -> bool {
        let tokens = counter.count_history(history) + extra_tokens;
        tokens as f64 >= self.ratio * limit as f64
    }

    /// Compacts in place. Returns whether anything changed.
    pub async fn compact(
        &self,
        hooks: &Arc<dyn MemoryHooks>,
        user_id: &str,
        history: &mut Vec<Message>,
    ) -> bool {
        let split = (history.len() as f64 * self.prune_ratio) as usize;
        if split == 0 {
            return false;
        }

        let pruned: Vec<Message> = history.drain(..split).collect();
        info!(
            pruned = pruned.len(),
            kept = history.len(),
            "compacting conversation history"
        );

        // Fact pre-flush before the messages disappear.
        if let Err(error) = hooks.extract_facts(user_id, &pruned).await {
            warn!(%error, "fact extraction failed during compaction");
        }

        let summary = match hooks.summarize(&pruned).await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(%error, "summarization failed, keeping placeholder summary");
                format!("(წინა {} შეტყობინება შეჯამების გარეშე)", pruned.len())
            }
        };

        let summary_message =
            Message::user_text(format!("[წინა საუბრის შეჯამება]\n{}", summary));
        history.insert(0, summary_message);
        true
    }
}
