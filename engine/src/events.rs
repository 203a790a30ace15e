use serde_json::json;

/// One server-sent event in the stream contract.
///
/// Every event carries a non-empty type discriminator in the SSE `event:`
/// field; payloads follow the wire grammar the frontend renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: &'static str,
    pub data: serde_json::Value,
}

impl SseEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            event_type: "thinking",
            data: json!({ "content": content.into() }),
        }
    }

    /// Append-only partial text. The payload repeats the discriminator
    /// because the frontend switches on `data.type` for text frames.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            event_type: "text",
            data: json!({ "type": "text", "content": content.into() }),
        }
    }

    pub fn products(markdown: impl Into<String>) -> Self {
        Self {
            event_type: "products",
            data: json!({ "content": markdown.into() }),
        }
    }

    pub fn tip(content: impl Into<String>) -> Self {
        Self {
            event_type: "tip",
            data: json!({ "content": content.into() }),
        }
    }

    pub fn quick_replies(replies: Vec<String>) -> Self {
        Self {
            event_type: "quick_replies",
            data: json!({ "replies": replies }),
        }
    }

    /// Instructs the client to discard prior `text`/`products` rendering.
    pub fn retry(reason: &str) -> Self {
        Self {
            event_type: "retry",
            data: json!({ "reason": reason }),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: "error",
            data: json!({ "code": code, "message": message.into() }),
        }
    }

    pub fn done(session_id: &str, model_used: &str) -> Self {
        Self {
            event_type: "done",
            data: json!({ "session_id": session_id, "model_used": model_used }),
        }
    }

    /// Wire encoding: `event: <type>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type, self.data)
    }
}
