//! Gemini generator (C6): `:generateContent` / `:streamGenerateContent?alt=sse`,
//! `x-goog-api-key` auth, `thought`/`thoughtSignature` parts for reasoning
//! round-trips.
//!
//! Wire shapes are grounded in the pack's `km-tools` Gemini client
//! (`GeminiContent`/`GeminiPart`/`thoughtSignature` handling); this module
//! swaps its provider-local history vector for this crate's [`Session`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{self, Error};
use crate::http_pool::get_shared_http_client;
use crate::model_cache::ModelSource;
use crate::options::OptionBag;
use crate::provider::Generator;
use crate::schema::{ContentBlock, Message, Model, Role, Session, ToolCall, Usage};
use crate::stream::{frame_sse, Frame};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, session_view: &[&Message], system: Option<String>, options: &OptionBag) -> Result<GenerateContentRequest, Error> {
        let mut contents = Vec::new();
        for m in session_view {
            contents.push(to_gemini_content(m)?);
        }

        let system_instruction = system.map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: Some(text), ..Default::default() }],
        });

        let tools = options.toolkit.as_ref().map(|tk| {
            vec![GeminiTool {
                function_declarations: tk
                    .tools()
                    .into_iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name().to_string(),
                        description: Some(t.description().to_string()),
                        parameters: t.parameters_schema().clone(),
                    })
                    .collect(),
            }]
        });

        let generation_config = GeminiGenerationConfig {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            max_output_tokens: options.max_tokens,
            stop_sequences: (!options.stop_sequences.is_empty()).then(|| options.stop_sequences.clone()),
            thinking_config: options.thinking.unwrap_or(false).then(|| GeminiThinkingConfig {
                thinking_budget: options.thinking_budget,
                include_thoughts: Some(true),
            }),
        };

        Ok(GenerateContentRequest {
            contents,
            tools,
            system_instruction,
            generation_config: Some(generation_config),
        })
    }

    async fn send_non_streaming(&self, model: &str, req: &GenerateContentRequest) -> Result<(Message, Usage), (Error, Option<Message>)> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = get_shared_http_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e: reqwest::Error| (Error::from(e), None))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if log::log_enabled!(log::Level::Error) {
                log::error!("GeminiProvider::send_non_streaming(...): {status}: {body}");
            }
            return Err((Error::InternalServerError(format!("gemini {status}: {body}")), None));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| (Error::from(e), None))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| (Error::internal("gemini response carried no candidates"), None))?;

        let usage = Usage {
            input_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.prompt_token_count).unwrap_or(0) as usize,
            output_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.candidates_token_count).unwrap_or(0) as usize,
        };
        let content = from_gemini_parts(candidate.content.map(|c| c.parts).unwrap_or_default());
        let (result, sentinel) = error::map_stop_reason(&gemini_finish_reason(candidate.finish_reason.as_deref()));
        let message = Message {
            role: Role::Assistant,
            content,
            result: Some(result),
            tokens: Some(usage.output_tokens),
            input_tokens: None,
            meta: HashMap::new(),
        };
        match sentinel {
            Some(e) if !e.is_non_fatal() => Err((e, None)),
            Some(e) => Err((e, Some(message))),
            None => Ok((message, usage)),
        }
    }

    async fn send_streaming(&self, model: &str, req: &GenerateContentRequest, stream_fn: &crate::options::StreamFn) -> Result<(Message, Usage), (Error, Option<Message>)> {
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model);
        let response = get_shared_http_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e: reqwest::Error| (Error::from(e), None))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if log::log_enabled!(log::Level::Error) {
                log::error!("GeminiProvider::send_streaming(...): {status}: {body}");
            }
            return Err((Error::InternalServerError(format!("gemini {status}: {body}")), None));
        }

        let framed = frame_sse(response.bytes_stream());
        futures::pin_mut!(framed);

        let mut text = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = Usage::default();
        let mut finish_reason: Option<String> = None;

        while let Some(frame) = framed.next().await {
            match frame.map_err(|e| (e, None))? {
                Frame::Done => break,
                Frame::Event { data, .. } => {
                    let chunk: GenerateContentResponse = match serde_json::from_str(&data) {
                        Ok(c) => c,
                        Err(_) => continue,
                    };
                    if let Some(u) = &chunk.usage_metadata {
                        usage.input_tokens = u.prompt_token_count.unwrap_or(0) as usize;
                        usage.output_tokens = u.candidates_token_count.unwrap_or(0) as usize;
                    }
                    if let Some(candidate) = chunk.candidates.into_iter().next() {
                        if candidate.finish_reason.is_some() {
                            finish_reason = candidate.finish_reason;
                        }
                        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                            if let Some(t) = part.text {
                                if part.thought.unwrap_or(false) {
                                    stream_fn(Role::Thinking, &t);
                                    thinking.push_str(&t);
                                } else {
                                    stream_fn(Role::Assistant, &t);
                                    text.push_str(&t);
                                }
                            }
                            if let Some(fc) = part.function_call {
                                tool_calls.push(ToolCall::new(uuid::Uuid::new_v4().to_string(), fc.name, fc.args));
                            }
                        }
                    }
                }
            }
        }

        let mut content = Vec::new();
        if !thinking.is_empty() {
            content.push(ContentBlock::thinking(thinking));
        }
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        content.extend(tool_calls.into_iter().map(ContentBlock::ToolCall));

        let (result, sentinel) = error::map_stop_reason(&gemini_finish_reason(finish_reason.as_deref()));
        let message = Message {
            role: Role::Assistant,
            content,
            result: Some(result),
            tokens: Some(usage.output_tokens),
            input_tokens: None,
            meta: HashMap::new(),
        };
        match sentinel {
            Some(e) if !e.is_non_fatal() => Err((e, None)),
            Some(e) => Err((e, Some(message))),
            None => Ok((message, usage)),
        }
    }

    async fn generate(&self, model: &str, session_view: &[&Message], system: Option<String>, options: &OptionBag) -> Result<(Message, Usage), (Error, Option<Message>)> {
        let req = self.build_request(session_view, system, options).map_err(|e| (e, None))?;
        if let Some(stream_fn) = &options.stream {
            self.send_streaming(model, &req, stream_fn).await
        } else {
            self.send_non_streaming(model, &req).await
        }
    }
}

fn gemini_finish_reason(reason: Option<&str>) -> String {
    match reason {
        Some("STOP") => "stop".to_string(),
        Some("MAX_TOKENS") => "max_tokens".to_string(),
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => "safety".to_string(),
        Some(other) => other.to_lowercase(),
        None => "stop".to_string(),
    }
}

fn to_gemini_content(message: &Message) -> Result<GeminiContent, Error> {
    match message.role {
        Role::User => Ok(GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart { text: Some(message.text()), ..Default::default() }],
        }),
        Role::Assistant | Role::Thinking => {
            let mut parts = Vec::new();
            let thinking = message.thinking_text();
            if !thinking.is_empty() {
                parts.push(GeminiPart {
                    text: Some(thinking),
                    thought: Some(true),
                    thought_signature: message.content.iter().find_map(|b| match b {
                        ContentBlock::Thinking { signature, .. } => signature.clone(),
                        _ => None,
                    }),
                    ..Default::default()
                });
            }
            let visible = message.text();
            if !visible.is_empty() {
                parts.push(GeminiPart { text: Some(visible), ..Default::default() });
            }
            for call in message.tool_calls() {
                parts.push(GeminiPart {
                    function_call: Some(GeminiFunctionCall { name: call.name.clone(), args: call.input.clone() }),
                    ..Default::default()
                });
            }
            Ok(GeminiContent { role: Some("model".to_string()), parts })
        }
        Role::Tool => {
            let result = message
                .content
                .iter()
                .find_map(|b| match b {
                    ContentBlock::ToolResult(r) => Some(r),
                    _ => None,
                })
                .ok_or_else(|| Error::internal("tool-role message carries no tool_result block"))?;
            let response: Value = serde_json::from_str(result.content.get()).unwrap_or_else(|_| serde_json::json!({ "result": result.content.get() }));
            Ok(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: result.name.clone().unwrap_or_default(),
                        response,
                    }),
                    ..Default::default()
                }],
            })
        }
        Role::System => Err(Error::internal("system message leaked into session projection")),
    }
}

fn from_gemini_parts(parts: Vec<GeminiPart>) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for part in parts {
        if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                blocks.push(ContentBlock::Thinking { text, signature: part.thought_signature });
            } else {
                blocks.push(ContentBlock::text(text));
            }
        }
        if let Some(fc) = part.function_call {
            blocks.push(ContentBlock::ToolCall(ToolCall::new(uuid::Uuid::new_v4().to_string(), fc.name, fc.args)));
        }
    }
    blocks
}

#[async_trait]
impl ModelSource for GeminiProvider {
    async fn list_models(&self) -> Result<Vec<Model>, Error> {
        let url = format!("{}/models", self.base_url);
        let response = get_shared_http_client()
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::InternalServerError(format!("gemini models list: {}", response.status())));
        }
        let body: ModelsListResponse = response.json().await?;
        Ok(body
            .models
            .into_iter()
            .map(|m| Model::new(m.name.trim_start_matches("models/"), "gemini"))
            .collect())
    }
}

#[async_trait]
impl Generator for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn without_session(&self, model: &str, message: Message, options: &OptionBag) -> Result<(Message, Usage), (Error, Option<Message>)> {
        message.validate().map_err(|e| (Error::BadParameter(e.to_string()), None))?;
        let system = options.system_prompt.clone();
        self.generate(model, &[&message], system, options).await
    }

    async fn with_session(&self, model: &str, session: &mut Session, message: Message, options: &OptionBag) -> Result<Usage, (Error, Option<Message>)> {
        message.validate().map_err(|e| (Error::BadParameter(e.to_string()), None))?;
        let system = options.system_prompt.clone().or_else(|| session.system_prompt());
        let mut view: Vec<&Message> = session.non_system_messages().collect();
        view.push(&message);
        let (reply, usage) = self.generate(model, &view, system, options).await?;
        session.append_turn(message, reply, usage);
        Ok(usage)
    }
}

// ============================== wire types ==============================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiFunctionCall {
    name: String,
    args: Box<serde_json::value::RawValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    top_k: Option<u64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
    #[serde(rename = "stopSequences", skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiThinkingConfig {
    #[serde(rename = "thinkingBudget", skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<u64>,
    #[serde(rename = "includeThoughts", skip_serializing_if = "Option::is_none")]
    include_thoughts: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelsListResponse {
    #[serde(default)]
    models: Vec<ModelsListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelsListEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_maps_safety_family_to_blocked() {
        assert_eq!(gemini_finish_reason(Some("SAFETY")), "safety");
        assert_eq!(gemini_finish_reason(Some("STOP")), "stop");
        assert_eq!(gemini_finish_reason(Some("MAX_TOKENS")), "max_tokens");
    }

    #[test]
    fn assistant_content_carries_thought_before_visible_text() {
        let mut msg = Message::assistant("the answer is 4");
        msg.content.insert(0, ContentBlock::thinking("carry the one"));
        let content = to_gemini_content(&msg).unwrap();
        assert!(content.parts[0].thought.unwrap_or(false));
        assert_eq!(content.parts[1].text.as_deref(), Some("the answer is 4"));
    }

    #[test]
    fn tool_role_without_result_block_is_rejected() {
        let msg = Message::new(Role::Tool, "oops");
        assert!(to_gemini_content(&msg).is_err());
    }

    #[test]
    fn function_call_args_preserve_key_order_verbatim() {
        let raw = serde_json::value::RawValue::from_string(r#"{"zip":"10001","city":"NYC"}"#.to_string()).unwrap();
        let msg = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolCall(ToolCall::new("call_1", "get_weather", raw))],
            result: None,
            tokens: None,
            input_tokens: None,
            meta: HashMap::new(),
        };
        let content = to_gemini_content(&msg).unwrap();
        let json = serde_json::to_string(&content.parts[0]).unwrap();
        assert!(json.contains(r#""args":{"zip":"10001","city":"NYC"}"#), "got {json}");

        let round_tripped = from_gemini_parts(content.parts);
        match &round_tripped[0] {
            ContentBlock::ToolCall(tc) => assert_eq!(tc.input.get(), r#"{"zip":"10001","city":"NYC"}"#),
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
