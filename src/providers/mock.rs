//! Mock/ELIZA generator (C8): an in-process, deterministic [`Generator`]
//! exposing the same contract as a real wire-speaking provider, so callers
//! and tests never need network access.
//!
//! Pattern-matching is intentionally simple — the exact ELIZA rules are a
//! pluggable detail outside the core contract. What this module guarantees
//! is the shape of that contract: deterministic output for a given seed, a
//! `thinking` block that references the prior turn's memorable phrase when
//! `options.thinking` is set, and the same tool-calling surface real
//! providers expose.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::model_cache::ModelSource;
use crate::options::OptionBag;
use crate::provider::Generator;
use crate::schema::{ContentBlock, GenerationResult, Message, Model, Role, Session, ToolCall, Usage};
use crate::toolkit::ToolContext;

const MODEL_NAME: &str = "eliza-1966-en";

/// Split `text` into memorable phrases an ELIZA-style engine can echo back
/// on the next turn; takes the longest non-trivial word as a stand-in for a
/// real key-phrase extractor.
fn memorable_phrase(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() > 3)
        .max_by_key(|w| w.len())
        .map(|w| w.to_lowercase())
}

/// `ceil(len(text) / 4)`, at least 1 — a cheap token-count approximation
/// that avoids calling a real tokenizer.
fn approx_tokens(text: &str) -> usize {
    ((text.len() + 3) / 4).max(1)
}

fn reply_text(input: &str, seed: i64) -> String {
    let lower = input.to_lowercase();
    if lower.contains("sad") || lower.contains("unhappy") {
        "I'm sorry to hear that. Can you tell me more about why you feel this way?".to_string()
    } else if lower.contains("help") {
        "I'm here to help. What's on your mind?".to_string()
    } else if lower.ends_with('?') {
        format!("Why do you ask whether {}", input.trim_end_matches('?').to_lowercase())
    } else {
        format!("Tell me more about that. (session seed {seed})")
    }
}

/// Splits `text` into word-boundary chunks (each ending right after the
/// space that follows it, if any) and feeds them to `stream_fn` in order;
/// concatenating the chunks reproduces `text` exactly.
fn stream_word_chunks(stream_fn: &crate::options::StreamFn, role: Role, text: &str) {
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == ' ' {
            stream_fn(role, &text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        stream_fn(role, &text[start..]);
    }
}

/// Deterministic responses require a fixed seed; this engine holds no
/// process-wide state, so `without_session` is genuinely stateless — a
/// fresh engine per call, never a shared one.
pub struct MockGenerator {
    seed: Mutex<i64>,
}

impl MockGenerator {
    pub fn new(seed: i64) -> Self {
        Self { seed: Mutex::new(seed) }
    }

    fn respond(&self, seed: i64, prior_phrase: Option<String>, message: &Message, options: &OptionBag) -> (Message, Usage) {
        let input_text = message.text();
        let input_tokens = approx_tokens(&input_text);

        if let Some(toolkit) = &options.toolkit {
            if input_text.to_lowercase().contains("weather") {
                if let Some(tool) = toolkit.tools().into_iter().find(|t| t.name() == "get_weather") {
                    let city = input_text
                        .split_whitespace()
                        .last()
                        .unwrap_or("unknown")
                        .trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase();
                    let args = serde_json::json!({ "city": city });
                    let raw = serde_json::value::to_raw_value(&args).unwrap();
                    let call = ToolCall::new(uuid::Uuid::new_v4().to_string(), tool.name(), raw);
                    let reply = Message {
                        role: Role::Assistant,
                        content: vec![ContentBlock::ToolCall(call)],
                        result: Some(GenerationResult::ToolCall),
                        tokens: None,
                        input_tokens: None,
                        meta: HashMap::new(),
                    };
                    let output_tokens = approx_tokens(tool.description());
                    return (reply, Usage { input_tokens, output_tokens });
                }
            }
        }

        let mut reply = Message::assistant(reply_text(&input_text, seed)).with_result(GenerationResult::Stop);
        if options.thinking.unwrap_or(false) {
            let phrase = prior_phrase.unwrap_or_else(|| memorable_phrase(&input_text).unwrap_or_default());
            reply.content.insert(
                0,
                ContentBlock::thinking(format!(
                    "recalling the user's earlier mention of \"{phrase}\" while composing this reply"
                )),
            );
        }
        if let Some(stream_fn) = &options.stream {
            for block in &reply.content {
                match block {
                    ContentBlock::Thinking { text, .. } => stream_word_chunks(stream_fn, Role::Thinking, text),
                    ContentBlock::Text(text) => stream_word_chunks(stream_fn, Role::Assistant, text),
                    _ => {}
                }
            }
        }
        let output_tokens = approx_tokens(&reply.text());
        (reply, Usage { input_tokens, output_tokens })
    }
}

#[async_trait]
impl ModelSource for MockGenerator {
    async fn list_models(&self) -> Result<Vec<Model>, Error> {
        Ok(vec![Model::new(MODEL_NAME, "mock")])
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn without_session(
        &self,
        model: &str,
        message: Message,
        options: &OptionBag,
    ) -> Result<(Message, Usage), (Error, Option<Message>)> {
        if model != MODEL_NAME {
            return Err((Error::NotFound(format!("unknown mock model {model:?}")), None));
        }
        let seed = *self.seed.lock().await;
        Ok(self.respond(seed, None, &message, options))
    }

    async fn with_session(
        &self,
        model: &str,
        session: &mut Session,
        message: Message,
        options: &OptionBag,
    ) -> Result<Usage, (Error, Option<Message>)> {
        if model != MODEL_NAME {
            return Err((Error::NotFound(format!("unknown mock model {model:?}")), None));
        }
        let seed = *self.seed.lock().await;
        let prior_phrase = session
            .non_system_messages()
            .last()
            .and_then(|m| memorable_phrase(&m.text()));
        let (reply, usage) = self.respond(seed, prior_phrase, &message, options);
        session.append_turn(message, reply, usage);
        Ok(usage)
    }
}

/// `get_weather`-shaped mock tool used in tests and examples exercising the
/// tool-call round described in the concrete scenarios.
pub struct GetWeatherTool;

#[async_trait]
impl crate::toolkit::Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Look up the current weather for a city."
    }

    fn parameters_schema(&self) -> &serde_json::Value {
        static SCHEMA: once_cell::sync::Lazy<serde_json::Value> = once_cell::sync::Lazy::new(|| {
            serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"],
            })
        });
        &SCHEMA
    }

    async fn run(&self, _ctx: &ToolContext, input: &serde_json::Value) -> Result<serde_json::Value, String> {
        let city = input
            .get("city")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing city".to_string())?;
        Ok(serde_json::json!({ "city": city, "forecast": "sunny", "temp_c": 21 }))
    }
}

pub fn mock_toolkit_with_weather() -> Arc<crate::toolkit::Toolkit> {
    let mut tk = crate::toolkit::Toolkit::new();
    tk.register(Arc::new(GetWeatherTool)).expect("fresh toolkit");
    Arc::new(tk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionBag;

    #[tokio::test]
    async fn stateless_reply_is_deterministic_for_fixed_seed() {
        let gen_a = MockGenerator::new(42);
        let gen_b = MockGenerator::new(42);
        let options = OptionBag::default();

        let (msg_a, usage_a) = gen_a
            .without_session(MODEL_NAME, Message::user("Hello"), &options)
            .await
            .unwrap();
        let (msg_b, usage_b) = gen_b
            .without_session(MODEL_NAME, Message::user("Hello"), &options)
            .await
            .unwrap();

        assert_eq!(msg_a.text(), msg_b.text());
        assert_eq!(msg_a.role, Role::Assistant);
        assert_eq!(msg_a.result, Some(GenerationResult::Stop));
        assert_eq!(usage_a.input_tokens, 2);
        assert!(usage_a.output_tokens > 0);
        assert_eq!(usage_a.input_tokens, usage_b.input_tokens);
    }

    #[tokio::test]
    async fn session_memory_surfaces_prior_phrase_in_thinking() {
        let gen = MockGenerator::new(1);
        let mut session = Session::new();
        let options = OptionBag::apply(vec![crate::options::opt::thinking(true)]).unwrap();

        gen.with_session(MODEL_NAME, &mut session, Message::user("I need some help"), &OptionBag::default())
            .await
            .unwrap();
        gen.with_session(MODEL_NAME, &mut session, Message::user("I feel sad"), &options)
            .await
            .unwrap();

        assert_eq!(session.len(), 4);
        let last = session.last().unwrap();
        assert!(last.thinking_text().to_lowercase().contains("help"));
    }

    #[tokio::test]
    async fn streamed_chunks_reassemble_into_the_final_text() {
        use std::sync::Mutex as StdMutex;

        let gen = MockGenerator::new(3);
        let chunks = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = chunks.clone();
        let options = OptionBag::apply(vec![crate::options::opt::stream(move |role, text| {
            assert_eq!(role, Role::Assistant);
            sink.lock().unwrap().push(text.to_string());
        })])
        .unwrap();

        let (reply, _usage) = gen
            .without_session(MODEL_NAME, Message::user("Tell me about Rust"), &options)
            .await
            .unwrap();

        let joined: String = chunks.lock().unwrap().concat();
        assert_eq!(joined, reply.text());
    }

    #[tokio::test]
    async fn weather_tool_call_round_trips() {
        let gen = MockGenerator::new(7);
        let toolkit = mock_toolkit_with_weather();
        let options = OptionBag::apply(vec![crate::options::opt::toolkit(toolkit.clone())]).unwrap();

        let (reply, _usage) = gen
            .without_session(MODEL_NAME, Message::user("What's the weather in Berlin?"), &options)
            .await
            .unwrap();
        assert_eq!(reply.result, Some(GenerationResult::ToolCall));
        let calls = reply.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        #[derive(serde::Deserialize)]
        struct Args {
            city: String,
        }
        let args: Args = calls[0].parse_input().unwrap();
        assert_eq!(args.city, "berlin");

        let results = toolkit.run(&ToolContext::new(), &calls.into_iter().cloned().collect::<Vec<_>>()).await;
        assert!(!results[0].is_error);
    }
}
