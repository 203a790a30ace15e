use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use sb_core::traits::ToolRegistry;

/// Sentinel heading for the inlined catalog block.
const CONTEXT_SENTINEL: &str = "[კატალოგის კონტექსტი — წინასწარი ძიების შედეგები]";

/// Lightweight intent classifier and catalog pre-search.
///
/// When a first-touch message clearly asks for a product, searching before
/// the model runs and inlining the top results saves one whole
/// function-calling round. Past-tense mentions and complaints are not
/// purchase intent, and deep conversations already carry their own
/// context, so both suppress the pre-search.
pub struct PreSearch {
    keywords: &'static [&'static str],
    negative_markers: &'static [&'static str],
    max_history_len: usize,
    max_items: usize,
    max_line_chars: usize,
}

/// Product-domain keyword stems (Georgian is agglutinative; stems match
/// the inflected forms).
const KEYWORDS: &[&str] = &[
    "პროტეინ",
    "კრეატინ",
    "ვიტამინ",
    "გეინერ",
    "ამინომჟავ",
    "კოლაგენ",
    "ომეგა",
    "მაგნიუმ",
    "ელექტროლიტ",
    "bcaa",
];

/// Past-tense verbs and complaint markers that negate purchase intent.
const NEGATIVE_MARKERS: &[&str] = &["ვიყიდე", "ვცადე", "ცუდი", "დაბრუნებ", "არ მომეწონა"];

impl PreSearch {
    pub fn new() -> Self {
        Self {
            keywords: KEYWORDS,
            negative_markers: NEGATIVE_MARKERS,
            max_history_len: 4,
            max_items: 5,
            max_line_chars: 120,
        }
    }

    /// Returns the matched keyword stem when the message warrants a
    /// pre-search.
    pub fn classify(&self, message: &str, history_len: usize) -> Option<&'static str> {
        if history_len > self.max_history_len {
            return None;
        }
        let lowered = message.to_lowercase();
        if self
            .negative_markers
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            debug!("negative marker present, skipping pre-search");
            return None;
        }
        self.keywords
            .iter()
            .find(|stem| lowered.contains(*stem))
            .copied()
    }

    /// Runs the search and renders a bounded context block, or `None` when
    /// the search fails or returns nothing. A pre-search failure is never
    /// a request failure.
    pub async fn context_block(
        &self,
        registry: &Arc<dyn ToolRegistry>,
        user_id: &str,
        message: &str,
    ) -> Option<String> {
        let result = registry
            .call("search_products", &json!({ "query": message }), user_id)
            .await
            .ok()?;

        let products = result.get("products")?.as_array()?;
        if products.is_empty() {
            return None;
        }

        let lines: Vec<String> = products
            .iter()
            .take(self.max_items)
            .map(|p| truncate_chars(&render_product_line(p), self.max_line_chars))
            .collect();

        info!(items = lines.len(), "pre-search context injected");
        Some(format!("{}\n{}", CONTEXT_SENTINEL, lines.join("\n")))
    }
}

impl Default for PreSearch {
    fn default() -> Self {
        Self::new()
    }
}

fn render_product_line(product: &Value) -> String {
    let name = product
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("პროდუქტი");
    let mut line = format!("- {}", name);
    if let Some(brand) = product.get("brand").and_then(Value::as_str) {
        line.push_str(&format!(" ({})", brand));
    }
    if let Some(price) = product.get("price").and_then(Value::as_f64) {
        line.push_str(&format!(" — {} ₾", price));
    }
    line
}

fn truncate_chars(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    line.chars().take(max_chars).collect()
}
