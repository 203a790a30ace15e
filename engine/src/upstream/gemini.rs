//! Streaming client for the Gemini `streamGenerateContent` endpoint.
//!
//! Tool calls are always returned to the caller for manual execution;
//! nothing here runs a tool. Thought signatures arrive on function-call
//! parts and are carried through [`sb_core::types::MessagePart`] untouched.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use sb_core::error::UpstreamError;
use sb_core::types::{FinishReason, Message, MessagePart, Role};

use super::{ChatSession, ChunkStream, StreamChunk, UpstreamClient};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub enable_safety_settings: bool,
    /// Function declarations advertised to the model.
    pub tool_declarations: Vec<Value>,
}

impl GeminiConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
            enable_safety_settings: true,
            tool_declarations: Vec::new(),
        }
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, UpstreamError> {
        if config.api_key.is_empty() {
            return Err(UpstreamError::NotConfigured("missing API key".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            config,
        })
    }
}

#[async_trait]
impl UpstreamClient for GeminiClient {
    async fn open_session(
        &self,
        model: &str,
        system_instruction: &str,
        history: Vec<Message>,
    ) -> Result<Box<dyn ChatSession>, UpstreamError> {
        debug!(model, history_len = history.len(), "opening chat session");
        Ok(Box::new(GeminiSession {
            http: self.http.clone(),
            config: self.config.clone(),
            model: model.to_string(),
            system_instruction: system_instruction.to_string(),
            contents: history,
        }))
    }
}

struct GeminiSession {
    http: reqwest::Client,
    config: GeminiConfig,
    model: String,
    system_instruction: String,
    contents: Vec<Message>,
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send(&mut self, message: Message) -> Result<ChunkStream, UpstreamError> {
        self.contents.push(message);

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.config.api_base, self.model, self.config.api_key
        );

        let response = self
            .http
            .post(&url)
            .json(&self.request_body())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        Ok(sse_chunk_stream(response))
    }

    fn record_reply(&mut self, message: Message) {
        self.contents.push(message);
    }

    fn transcript(&self) -> &[Message] {
        &self.contents
    }
}

impl GeminiSession {
    fn request_body(&self) -> Value {
        let contents: Vec<Value> = self.contents.iter().map(message_to_wire).collect();

        let mut body = json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
                "topK": self.config.top_k,
                "maxOutputTokens": self.config.max_output_tokens,
            },
        });

        if !self.config.tool_declarations.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": self.config.tool_declarations }]);
        }

        if self.config.enable_safety_settings {
            body["safetySettings"] = safety_settings();
        }

        body
    }
}

fn safety_settings() -> Value {
    let categories = [
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ];
    Value::Array(
        categories
            .iter()
            .map(|c| json!({ "category": c, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect(),
    )
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "model",
        // Function responses ride in a user turn on the wire.
        Role::User | Role::Tool => "user",
    };

    let parts: Vec<Value> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { text } => Some(json!({ "text": text })),
            MessagePart::FunctionCall {
                name,
                args,
                thought_signature,
            } => {
                let mut wire = json!({ "functionCall": { "name": name, "args": args } });
                if let Some(signature) = thought_signature {
                    wire["thoughtSignature"] = json!(signature);
                }
                Some(wire)
            }
            MessagePart::FunctionResponse { name, response } => {
                Some(json!({ "functionResponse": { "name": name, "response": response } }))
            }
            // Model thoughts are not replayed.
            MessagePart::Thought { .. } => None,
        })
        .collect();

    json!({ "role": role, "parts": parts })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Option<Vec<WireCandidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Option<Vec<WirePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    function_call: Option<WireFunctionCall>,
    #[serde(default)]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

fn wire_to_chunk(wire: WireResponse) -> StreamChunk {
    let Some(candidate) = wire.candidates.and_then(|mut c| {
        if c.is_empty() {
            None
        } else {
            Some(c.swap_remove(0))
        }
    }) else {
        return StreamChunk::default();
    };

    let finish_reason = candidate
        .finish_reason
        .as_deref()
        .map(FinishReason::parse);

    let parts = candidate.content.and_then(|content| content.parts).map(|parts| {
        parts
            .into_iter()
            .filter_map(|part| {
                if part.thought.unwrap_or(false) {
                    return part.text.map(|text| MessagePart::Thought { text });
                }
                if let Some(call) = part.function_call {
                    return Some(MessagePart::FunctionCall {
                        name: call.name,
                        args: call.args.unwrap_or(Value::Null),
                        thought_signature: part.thought_signature,
                    });
                }
                part.text.map(|text| MessagePart::Text { text })
            })
            .collect()
    });

    StreamChunk {
        parts,
        finish_reason,
    }
}

/// Incrementally parses the `data:` lines of an SSE body into chunks.
///
/// Lines are reassembled from a byte buffer before UTF-8 decoding, because
/// the transport may split a multi-byte character across network reads.
fn sse_chunk_stream(response: reqwest::Response) -> ChunkStream {
    let state = (response.bytes_stream(), Vec::<u8>::new());
    let stream = futures_util::stream::try_unfold(state, |(mut bytes, mut buf)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end();
                if let Some(payload) = line.strip_prefix("data: ") {
                    let wire: WireResponse = serde_json::from_str(payload)
                        .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;
                    return Ok(Some((wire_to_chunk(wire), (bytes, buf))));
                }
                continue;
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(map_transport_error(e)),
                None => return Ok(None),
            }
        }
    });
    Box::pin(stream)
}

fn map_transport_error(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout { seconds: 0 }
    } else {
        UpstreamError::ConnectionReset(error.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
