//! [`Session`]: an append-only ordered conversation history.
//!
//! A session is single-owner per call: the core never locks it on the
//! caller's behalf, so callers sharing a session across concurrent calls
//! must serialize those calls themselves (see the crate-level concurrency
//! notes in [`crate::manager`]).

use super::message::Message;
use super::role::Role;

/// Ordered sequence of [`Message`]s representing one conversation.
///
/// Append-only from the caller's point of view. A generator appends the
/// assistant reply to a session it was handed via `WithSession`-style calls
/// (see [`crate::provider::Generator::with_session`]); the core never removes
/// or reorders entries.
#[derive(Debug, Clone, Default)]
pub struct Session {
    messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a caller-authored message (user or tool-result).
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent `system`-role message's visible text, if any.
    ///
    /// System messages may appear anywhere in the sequence; the most recent
    /// one wins, mirroring [`crate::options::OptionBag`]'s `system_prompt`
    /// override semantics.
    pub fn system_prompt(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(Message::text)
    }

    /// Non-system messages, in order, for projection into a provider's wire
    /// format (§4.3 step 1: system messages are extracted out-of-band).
    pub fn non_system_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Atomically append one generation step: the user/tool-result input
    /// (with its measured `input_tokens`, unless already set) and the
    /// generator's assistant reply (with `output_tokens`).
    ///
    /// Either both messages land or neither does — this is the only mutation
    /// path a generator uses, so a failed generation never leaves a partial
    /// turn in the session (§5 ordering guarantees).
    pub fn append_turn(&mut self, mut input: Message, mut reply: Message, usage: super::message::Usage) {
        if input.input_tokens.is_none() {
            input.input_tokens = Some(usage.input_tokens);
        }
        reply.tokens = Some(usage.output_tokens);
        self.messages.push(input);
        self.messages.push(reply);
    }

    /// Append only the assistant reply — used when the turn was a
    /// tool-result continuation and the triggering message was already
    /// present in the session.
    pub fn append_reply(&mut self, mut reply: Message, output_tokens: usize) {
        reply.tokens = Some(output_tokens);
        self.messages.push(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::message::Usage;

    #[test]
    fn append_turn_grows_session_by_two() {
        let mut s = Session::new();
        let before = s.len();
        s.append_turn(
            Message::user("hi"),
            Message::assistant("hello"),
            Usage { input_tokens: 2, output_tokens: 3 },
        );
        assert_eq!(s.len(), before + 2);
        assert_eq!(s.messages()[0].input_tokens, Some(2));
        assert_eq!(s.messages()[1].tokens, Some(3));
    }

    #[test]
    fn system_prompt_picks_most_recent() {
        let mut s = Session::new();
        s.push(Message::system("be terse"));
        s.push(Message::user("hi"));
        s.push(Message::system("be verbose"));
        assert_eq!(s.system_prompt().as_deref(), Some("be verbose"));
    }

    #[test]
    fn non_system_messages_excludes_system_role() {
        let mut s = Session::new();
        s.push(Message::system("sys"));
        s.push(Message::user("hi"));
        let kept: Vec<_> = s.non_system_messages().collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].role, Role::User);
    }
}
