//! Conversation roles.

use serde::{Deserialize, Serialize};

/// The author of a [`Message`](super::message::Message).
///
/// `Thinking` is reserved for providers that, on replay, need to re-submit a
/// reasoning turn as its own role rather than folding it into `Assistant`
/// (most providers instead carry thinking as a content block on an
/// `Assistant` message — see [`ContentBlock::Thinking`](super::content::ContentBlock::Thinking)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Thinking,
}

impl Role {
    /// Short wire-format name used in provider-agnostic logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Thinking => "thinking",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
