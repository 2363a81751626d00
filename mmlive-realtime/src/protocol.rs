//! Wire format of the live protocol.
//!
//! Every frame is a UTF-8 JSON object whose single top-level key names the
//! message kind. Outbound messages are plain serde types using the
//! externally-tagged enum representation; inbound frames go through
//! [`decode`], which only accepts a kind when its defining field has the
//! expected shape and otherwise yields [`InboundMessage::Unknown`].

use crate::config::LiveConfig;
use crate::error::{RealtimeError, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mime type prefix identifying raw PCM audio parts.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Mime type used for frames produced by the media extractor.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

// ── Shared content types ────────────────────────────────────────────────

/// Base64 payload tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Mime type, e.g. `audio/pcm;rate=24000`.
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl Blob {
    /// Decode the base64 payload.
    pub fn decode_data(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| RealtimeError::protocol(format!("invalid base64 in inline data: {e}")))
    }

    /// Whether this blob carries raw PCM audio.
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with(PCM_MIME_PREFIX)
    }
}

/// One part of a turn.
///
/// Fields this crate does not interpret (executable code, function calls
/// echoed inside a turn, ...) are kept in `extra` so content events carry
/// them through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Any other part fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    /// Create an inline-data part.
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(Blob { mime_type: mime_type.into(), data: data.into() }),
            ..Default::default()
        }
    }

    /// Whether this part is PCM audio.
    pub fn is_audio(&self) -> bool {
        self.inline_data.as_ref().is_some_and(Blob::is_pcm_audio)
    }
}

/// A turn: an ordered list of parts with an optional role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Parts of the turn.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a user turn holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Some("user".to_string()), parts: vec![Part::text(text)] }
    }

    /// Create a role-less content holding a single text part.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { role: None, parts: vec![Part::text(text)] }
    }

    /// Separate PCM audio parts from everything else.
    ///
    /// Returns the audio blobs in order, and the remaining parts as a content
    /// value with the same role (or `None` when nothing but audio was present).
    pub fn split_audio(self) -> (Vec<Blob>, Option<Content>) {
        let mut audio = Vec::new();
        let mut rest = Vec::new();
        for part in self.parts {
            match part.inline_data {
                Some(blob) if blob.is_pcm_audio() => audio.push(blob),
                inline_data => rest.push(Part { inline_data, ..part }),
            }
        }
        let rest = if rest.is_empty() { None } else { Some(Content { role: self.role, parts: rest }) };
        (audio, rest)
    }
}

// ── Outbound messages ───────────────────────────────────────────────────

/// Chunk of captured media bound for `realtimeInput`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// Mime type, e.g. `audio/pcm;rate=16000` or `image/jpeg`.
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
    /// When the media was captured. Not sent on the wire.
    #[serde(skip)]
    pub captured_at: DateTime<Utc>,
}

impl MediaChunk {
    /// Create a chunk stamped with the current time.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into(), captured_at: Utc::now() }
    }

    /// Create a chunk by base64-encoding raw bytes.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Body of a `clientContent` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Turns appended to the conversation.
    pub turns: Vec<Content>,
    /// Whether the model should start generating.
    pub turn_complete: bool,
}

/// Body of a `realtimeInput` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Media chunks in capture order.
    pub media_chunks: Vec<MediaChunk>,
}

/// Result of one function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Result payload.
    pub response: Value,
    /// Id of the call being answered.
    pub id: String,
}

impl FunctionResponse {
    /// Create a new function response.
    pub fn new(id: impl Into<String>, response: impl Serialize) -> Self {
        Self { id: id.into(), response: serde_json::to_value(response).unwrap_or(Value::Null) }
    }

    /// Create a function response wrapping a plain string result.
    pub fn from_string(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { id: id.into(), response: serde_json::json!({ "result": output.into() }) }
    }
}

/// Body of a `toolResponse` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// One response per answered call.
    pub function_responses: Vec<FunctionResponse>,
}

/// Messages sent from the client to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Session setup, always the first frame on a new socket.
    Setup(LiveConfig),
    /// Conversation turns.
    ClientContent(ClientContent),
    /// Streamed audio/video.
    RealtimeInput(RealtimeInput),
    /// Answers to tool calls.
    ToolResponse(ToolResponse),
}

impl OutboundMessage {
    /// A user text turn.
    pub fn text(text: impl Into<String>, turn_complete: bool) -> Self {
        Self::ClientContent(ClientContent { turns: vec![Content::user_text(text)], turn_complete })
    }

    /// A realtime input message carrying the given chunks.
    pub fn media(media_chunks: Vec<MediaChunk>) -> Self {
        Self::RealtimeInput(RealtimeInput { media_chunks })
    }

    /// A tool response message.
    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse { function_responses })
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::ClientContent(_) => "clientContent",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

/// Encode an outbound message as a JSON text frame.
pub fn encode(message: &OutboundMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

// ── Inbound messages ────────────────────────────────────────────────────

/// A function the model asks the client to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Call id to echo back in the response.
    #[serde(default)]
    pub id: String,
    /// Arguments object.
    #[serde(default)]
    pub args: Value,
}

/// Body of a `toolCall` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Requested calls, in order.
    pub function_calls: Vec<FunctionCall>,
}

/// Body of a `toolCallCancellation` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    /// Ids of calls that should no longer be answered.
    pub ids: Vec<String>,
}

/// Body of a `serverContent` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// The user barged in; pending model audio should be dropped.
    #[serde(default)]
    pub interrupted: bool,
    /// The model finished its turn.
    #[serde(default)]
    pub turn_complete: bool,
    /// Generated content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
}

/// Messages received from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The setup frame was accepted.
    SetupComplete,
    /// Model output or turn signalling.
    ServerContent(ServerContent),
    /// Function calls to execute.
    ToolCall(ToolCall),
    /// Previously requested calls that were cancelled.
    ToolCallCancellation(ToolCallCancellation),
    /// Anything else. Carries the parsed JSON, or the raw text as a JSON
    /// string when the frame was not JSON at all.
    Unknown(Value),
}

impl InboundMessage {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setupComplete",
            Self::ServerContent(_) => "serverContent",
            Self::ToolCall(_) => "toolCall",
            Self::ToolCallCancellation(_) => "toolCallCancellation",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Decode an inbound text frame, falling back to [`InboundMessage::Unknown`].
///
/// Decode failures are logged and never returned.
pub fn decode(raw: &str) -> InboundMessage {
    match try_decode(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, len = raw.len(), "Dropping unrecognized inbound frame");
            InboundMessage::Unknown(
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            )
        }
    }
}

/// Decode an inbound text frame, reporting why it did not match.
pub fn try_decode(raw: &str) -> Result<InboundMessage> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| RealtimeError::protocol(format!("invalid JSON: {e}")))?;
    decode_value(&value)
}

fn decode_value(value: &Value) -> Result<InboundMessage> {
    let Some(frame) = value.as_object() else {
        return Err(RealtimeError::protocol("frame is not a JSON object"));
    };

    if let Some(body) = frame.get("setupComplete") {
        object_field("setupComplete", body)?;
        return Ok(InboundMessage::SetupComplete);
    }
    if let Some(body) = frame.get("serverContent") {
        return typed_field("serverContent", body).map(InboundMessage::ServerContent);
    }
    if let Some(body) = frame.get("toolCall") {
        return typed_field("toolCall", body).map(InboundMessage::ToolCall);
    }
    if let Some(body) = frame.get("toolCallCancellation") {
        return typed_field("toolCallCancellation", body).map(InboundMessage::ToolCallCancellation);
    }

    let keys: Vec<&str> = frame.keys().map(String::as_str).collect();
    Err(RealtimeError::protocol(format!("no known message field in {keys:?}")))
}

fn object_field<'a>(name: &str, body: &'a Value) -> Result<&'a Map<String, Value>> {
    body.as_object().ok_or_else(|| RealtimeError::protocol(format!("`{name}` must be an object")))
}

fn typed_field<'a, T: Deserialize<'a>>(name: &str, body: &'a Value) -> Result<T> {
    object_field(name, body)?;
    T::deserialize(body).map_err(|e| RealtimeError::protocol(format!("malformed `{name}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_client_content_shape() {
        let frame = encode(&OutboundMessage::text("hello", true)).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": "hello" }] }],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn test_encode_realtime_input_omits_timestamp() {
        let chunk = MediaChunk::new("audio/pcm;rate=16000", "AAAA");
        let value: Value = serde_json::from_str(&encode(&OutboundMessage::media(vec![chunk])).unwrap())
            .unwrap();
        assert_eq!(
            value,
            json!({ "realtimeInput": { "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAAA" }] } })
        );
    }

    #[test]
    fn test_encode_tool_response_shape() {
        let msg = OutboundMessage::tool_response(vec![FunctionResponse::new("call-1", json!({"ok": true}))]);
        let value: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "toolResponse": { "functionResponses": [{ "response": {"ok": true}, "id": "call-1" }] } })
        );
    }

    #[test]
    fn test_decode_setup_complete() {
        assert_eq!(decode(r#"{"setupComplete":{}}"#), InboundMessage::SetupComplete);
    }

    #[test]
    fn test_decode_server_content_flags() {
        let msg = decode(r#"{"serverContent":{"interrupted":true}}"#);
        let InboundMessage::ServerContent(content) = msg else { panic!("expected serverContent") };
        assert!(content.interrupted);
        assert!(!content.turn_complete);
        assert!(content.model_turn.is_none());
    }

    #[test]
    fn test_decode_model_turn_parts() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAE=" } },
                        { "text": "hi" },
                        { "executableCode": { "language": "PYTHON", "code": "print(1)" } }
                    ]
                }
            }
        })
        .to_string();
        let InboundMessage::ServerContent(content) = decode(&raw) else { panic!("expected serverContent") };
        let turn = content.model_turn.unwrap();
        assert_eq!(turn.parts.len(), 3);
        assert!(turn.parts[0].is_audio());
        assert!(turn.parts[2].extra.contains_key("executableCode"));
    }

    #[test]
    fn test_decode_tool_call_and_cancellation() {
        let raw = r#"{"toolCall":{"functionCalls":[{"name":"get_weather","id":"c1","args":{"city":"Paris"}}]}}"#;
        let InboundMessage::ToolCall(call) = decode(raw) else { panic!("expected toolCall") };
        assert_eq!(call.function_calls[0].name, "get_weather");
        assert_eq!(call.function_calls[0].args["city"], "Paris");

        let raw = r#"{"toolCallCancellation":{"ids":["c1","c2"]}}"#;
        assert_eq!(
            decode(raw),
            InboundMessage::ToolCallCancellation(ToolCallCancellation {
                ids: vec!["c1".to_string(), "c2".to_string()]
            })
        );
    }

    #[test]
    fn test_wrong_shapes_are_unknown() {
        for raw in [
            r#"{"serverContent":"nope"}"#,
            r#"{"serverContent":{"turnComplete":"yes"}}"#,
            r#"{"setupComplete":true}"#,
            r#"{"toolCall":{"functionCalls":{}}}"#,
            r#"{"toolCallCancellation":{"ids":"c1"}}"#,
            r#"{"somethingElse":{}}"#,
            r#"[1,2,3]"#,
        ] {
            assert!(matches!(decode(raw), InboundMessage::Unknown(_)), "{raw} should be unknown");
            assert!(try_decode(raw).is_err());
        }
    }

    #[test]
    fn test_invalid_json_is_unknown_string() {
        assert_eq!(decode("not json"), InboundMessage::Unknown(Value::String("not json".into())));
    }

    #[test]
    fn test_split_audio_keeps_other_parts_in_order() {
        let content = Content {
            role: Some("model".into()),
            parts: vec![
                Part::text("a"),
                Part::inline("audio/pcm;rate=24000", "AAAA"),
                Part::inline("image/png", "BBBB"),
            ],
        };
        let (audio, rest) = content.split_audio();
        assert_eq!(audio.len(), 1);
        let rest = rest.unwrap();
        assert_eq!(rest.role.as_deref(), Some("model"));
        assert_eq!(rest.parts, vec![Part::text("a"), Part::inline("image/png", "BBBB")]);
    }

    #[test]
    fn test_split_audio_only_audio() {
        let content = Content { role: None, parts: vec![Part::inline("audio/pcm", "AAAA")] };
        let (audio, rest) = content.split_audio();
        assert_eq!(audio.len(), 1);
        assert!(rest.is_none());
    }
}
