//! The [`Message`] value type and the terminal [`GenerationResult`] it may
//! carry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::content::ContentBlock;
use super::role::Role;

/// Terminal status of the generation step that produced a [`Message`].
///
/// Absent (`None`) for messages the caller supplies as input (user/tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationResult {
    Stop,
    MaxTokens,
    ToolCall,
    Blocked,
    Error,
    Other,
}

/// Token accounting for a single generation step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A single turn in a [`Session`](super::session::Session).
///
/// Content is never mutated after the message is appended, except for the
/// one-time assignment of `tokens`/`input_tokens` on the most recently
/// appended user/assistant pair (see [`Session::append_turn`](super::session::Session::append_turn)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Terminal status of the generation step, `None` for caller-authored
    /// messages.
    pub result: Option<GenerationResult>,
    /// Output tokens billed for this message (assistant turns).
    pub tokens: Option<usize>,
    /// Input tokens billed for the turn this message started (user turns).
    pub input_tokens: Option<usize>,
    /// Provider-specific round-trip state, e.g. a `thought_signature` blob
    /// that must accompany a thinking block when the turn is replayed.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Build a message from a single visible-text block.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
            result: None,
            tokens: None,
            input_tokens: None,
            meta: HashMap::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Attach a non-text payload to an otherwise-text user turn.
    pub fn with_attachment(mut self, attachment: super::content::Attachment) -> Self {
        self.content.push(ContentBlock::Attachment(attachment));
        self
    }

    pub fn with_result(mut self, result: GenerationResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Concatenation of visible-text blocks, skipping thinking, attachments,
    /// and tool content. Returns an empty string for a pure tool-call
    /// message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Concatenation of thinking blocks, in order.
    pub fn thinking_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Thinking { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&super::content::ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_call).collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall(_)))
    }

    /// `content` must be non-empty for any message submitted to or returned
    /// from a generator, except a pure tool-call assistant message (which
    /// still carries at least one `ToolCall` block).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.content.is_empty() {
            return Err("message content must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_skips_thinking_and_attachments() {
        let mut m = Message::assistant("hello ");
        m.content.push(ContentBlock::thinking("secret reasoning"));
        m.content.push(ContentBlock::text("world"));
        assert_eq!(m.text(), "hello world");
        assert_eq!(m.thinking_text(), "secret reasoning");
    }

    #[test]
    fn empty_content_fails_validation() {
        let m = Message {
            role: Role::User,
            content: vec![],
            result: None,
            tokens: None,
            input_tokens: None,
            meta: HashMap::new(),
        };
        assert!(m.validate().is_err());
    }
}
