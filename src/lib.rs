// src/lib.rs

//! Provider-agnostic LLM conversation runtime: one schema, one option bag,
//! and a set of [`provider::Generator`] implementations (Anthropic, OpenAI,
//! Gemini, Mistral, plus an in-process mock) dispatched through a
//! [`manager::Manager`].

pub mod config;
pub mod embedder;
pub mod error;
pub mod http_pool;
pub mod manager;
pub mod model_cache;
pub mod options;
pub mod provider;
pub mod providers;
pub mod schema;
pub mod stream;
pub mod toolkit;

pub use error::Error;
pub use manager::{Manager, Request};
pub use options::{opt, OptionBag, ToolChoice};
pub use provider::{Downloader, Embedder, Generator};
pub use schema::{ContentBlock, GenerationResult, Message, Model, Role, Session, ToolCall, ToolResult, Usage};
pub use toolkit::{Tool, ToolContext, Toolkit};
