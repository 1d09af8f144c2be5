//! Provider-independent conversation model (§3 of the design: roles,
//! multi-part content blocks, sessions, models, usage).
//!
//! Every entity here is a value type owned by its containing session or
//! request — there are no cross-entity back-pointers.

pub mod content;
pub mod message;
pub mod model;
pub mod role;
pub mod session;

pub use content::{Attachment, AttachmentSource, ContentBlock, ToolCall, ToolResult};
pub use message::{GenerationResult, Message, Usage};
pub use model::Model;
pub use role::Role;
pub use session::Session;

/// Build a user message carrying a single attachment alongside visible text.
///
/// Thin convenience wrapper mirroring the constructors the original design
/// calls out in §4.1 (`NewUserMessageWithAttachment`).
pub fn new_user_message_with_attachment(text: impl Into<String>, attachment: Attachment) -> Message {
    Message::user(text).with_attachment(attachment)
}
