use regex::Regex;

/// Product line parsed from the model's markdown output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProduct {
    pub name: String,
    pub price: f64,
    pub brand: Option<String>,
}

/// Extraction over the accumulated buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub text: String,
    pub products: Vec<ParsedProduct>,
    /// The matched product lines verbatim, for the `products` event.
    pub products_markdown: Option<String>,
    pub tip: Option<String>,
    pub quick_replies: Vec<String>,
}

/// Accumulates streamed text and extracts the structured in-text markup
/// the model is prompted to emit.
///
/// Extraction always runs over the whole accumulated buffer, never a
/// single chunk: a tag may arrive split across chunk boundaries. Emitted
/// text is never retracted; on a retry the caller clears the buffer and
/// the `retry` event invalidates prior rendering client-side.
pub struct ResponseBuffer {
    text: String,
    tip_pattern: Regex,
    quick_replies_pattern: Regex,
    quick_replies_truncated: Regex,
    quick_replies_heading: Regex,
    product_line: Regex,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            tip_pattern: Regex::new(r"(?is)\[TIP\](.*?)\[/TIP\]").expect("static pattern"),
            quick_replies_pattern: Regex::new(r"(?is)\[QUICK_REPLIES\](.*?)\[/QUICK_REPLIES\]")
                .expect("static pattern"),
            // Tag closure may be cut off by upstream truncation.
            quick_replies_truncated: Regex::new(r"(?is)\[QUICK_REPLIES\](.*)$")
                .expect("static pattern"),
            quick_replies_heading: Regex::new(r"(?s)შემდეგი ნაბიჯი:\s*(.+)$")
                .expect("static pattern"),
            product_line: Regex::new(r"(?m)^\d+\.\s+(.+?)\s+—\s+(\d+(?:\.\d+)?)\s*₾")
                .expect("static pattern"),
        }
    }

    pub fn append_chunk(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let (products, products_markdown) = self.extract_products();
        BufferSnapshot {
            text: self.text.clone(),
            products,
            products_markdown,
            tip: self.extract_tip(),
            quick_replies: self.extract_quick_replies(),
        }
    }

    /// `[TIP]…[/TIP]`, closed tag only. An unclosed tip is dropped; a
    /// partial tip has no value to render.
    fn extract_tip(&self) -> Option<String> {
        self.tip_pattern
            .captures(&self.text)
            .map(|c| c[1].trim().to_string())
            .filter(|tip| !tip.is_empty())
    }

    fn extract_quick_replies(&self) -> Vec<String> {
        if let Some(captures) = self.quick_replies_pattern.captures(&self.text) {
            return parse_reply_lines(&captures[1]);
        }
        if let Some(captures) = self.quick_replies_truncated.captures(&self.text) {
            return parse_reply_lines(&captures[1]);
        }
        if let Some(captures) = self.quick_replies_heading.captures(&self.text) {
            return parse_reply_lines(&captures[1]);
        }
        Vec::new()
    }

    fn extract_products(&self) -> (Vec<ParsedProduct>, Option<String>) {
        let mut products = Vec::new();
        let mut lines = Vec::new();

        for captures in self.product_line.captures_iter(&self.text) {
            let raw_name = captures[1].trim();
            let price: f64 = captures[2].parse().unwrap_or(0.0);

            let (name, brand) = match raw_name.rsplit_once(" — ") {
                Some((name, brand)) => (name.trim().to_string(), Some(brand.trim().to_string())),
                None => (raw_name.to_string(), None),
            };

            products.push(ParsedProduct { name, price, brand });
            lines.push(captures[0].to_string());
        }

        let markdown = if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        };
        (products, markdown)
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_reply_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix('-')
                .or_else(|| line.strip_prefix('•'))
                .or_else(|| line.strip_prefix('*'))?;
            let line = line.trim();
            if line.is_empty() {
                None
            } else {
                Some(line.to_string())
            }
        })
        .take(4)
        .collect()
}
