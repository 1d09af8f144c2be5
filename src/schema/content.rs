//! Multi-part message content: the tagged union every provider marshals to
//! and from its own wire format.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A native tool/function call emitted by an assistant turn.
///
/// `input` is kept as raw JSON bytes rather than a parsed `serde_json::Value`
/// so that a call round-tripped back to the provider (e.g. when the caller
/// resubmits the session) is byte-identical to what the provider produced —
/// re-serializing a parsed `Value` can reorder object keys or reformat
/// numbers, which some providers treat as a different call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the matching [`ToolResult`].
    pub id: String,
    /// Tool name, matching a [`crate::toolkit::Tool`] registered in the bound
    /// [`Toolkit`](crate::toolkit::Toolkit).
    pub name: String,
    /// Raw JSON object the model supplied as arguments.
    pub input: Box<RawValue>,
}

impl ToolCall {
    /// Construct a call from an already-serialized JSON argument blob.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Box<RawValue>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Parse `input` into a typed value.
    pub fn parse_input<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.input.get())
    }
}

/// The caller's answer to a previously emitted [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must equal the originating [`ToolCall::id`] so the provider can
    /// correlate the result with its request.
    pub id: String,
    /// Tool name; optional because some providers correlate purely by id.
    pub name: Option<String>,
    /// Raw JSON payload returned by the tool.
    pub content: Box<RawValue>,
    /// Set when the tool failed; `content` then carries the error message
    /// serialized as a JSON string, per [`Toolkit::run`](crate::toolkit::Toolkit::run).
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, name: Option<String>, content: Box<RawValue>) -> Self {
        Self {
            id: id.into(),
            name,
            content,
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, name: Option<String>, message: &str) -> Self {
        let content = serde_json::value::to_raw_value(&serde_json::Value::String(
            message.to_string(),
        ))
        .expect("string always serializes");
        Self {
            id: id.into(),
            name,
            content,
            is_error: true,
        }
    }
}

/// Where an [`Attachment`]'s bytes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentSource {
    /// Inline binary payload, base64-encoded on the wire by the generator.
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// A URL the provider is expected to fetch itself.
    Url(String),
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A non-text document or binary payload attached to a turn.
///
/// Invariant: exactly one of `bytes` or `url` is set; use the constructors
/// below rather than building this struct by hand to keep that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type, e.g. `"image/png"`, `"application/pdf"`, `"text/plain"`.
    pub media_type: String,
    pub source: AttachmentSource,
    pub filename: Option<String>,
}

impl Attachment {
    pub fn from_bytes(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            source: AttachmentSource::Bytes(bytes),
            filename: None,
        }
    }

    pub fn from_url(media_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            source: AttachmentSource::Url(url.into()),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// A `text/*` mime type denotes a decodable text document rather than an
    /// opaque binary blob (image/*, application/pdf, audio/*, ...).
    pub fn is_text(&self) -> bool {
        self.media_type.starts_with("text/")
    }
}

/// One element of a [`Message`](super::message::Message)'s content list.
///
/// This is a tagged union, not a struct of optionals: exactly one variant is
/// active, and a provider unmarshalling its wire response constructs one
/// `ContentBlock` per native content part rather than merging parts into a
/// shared struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Visible utterance fragment.
    Text(String),
    /// Model-internal reasoning. Kept separate from `Text` so implementers
    /// never silently fold it into the visible transcript.
    Thinking {
        text: String,
        /// Opaque provider signature that must be replayed verbatim when
        /// this turn is resubmitted. Never parsed or normalized.
        signature: Option<String>,
    },
    Attachment(Attachment),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text(s.into())
    }

    pub fn thinking(s: impl Into<String>) -> Self {
        ContentBlock::Thinking {
            text: s.into(),
            signature: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            ContentBlock::ToolCall(tc) => Some(tc),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_round_trips_bytes() {
        let a = Attachment::from_bytes("image/png", vec![1, 2, 3, 4]);
        let json = serde_json::to_string(&a).unwrap();
        let back: Attachment = serde_json::from_str(&json).unwrap();
        match back.source {
            AttachmentSource::Bytes(b) => assert_eq!(b, vec![1, 2, 3, 4]),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn text_mime_prefix_detects_decodable_documents() {
        let text_doc = Attachment::from_bytes("text/markdown", b"# hi".to_vec());
        let image = Attachment::from_bytes("image/jpeg", vec![0xff, 0xd8]);
        assert!(text_doc.is_text());
        assert!(!image.is_text());
    }

    #[test]
    fn tool_call_input_round_trips_verbatim() {
        let raw = RawValue::from_string(r#"{"city":"berlin","units":"metric"}"#.to_string())
            .unwrap();
        let call = ToolCall::new("call_1", "get_weather", raw);
        assert_eq!(call.input.get(), r#"{"city":"berlin","units":"metric"}"#);
        #[derive(Deserialize)]
        struct Args {
            city: String,
        }
        let args: Args = call.parse_input().unwrap();
        assert_eq!(args.city, "berlin");
    }
}
