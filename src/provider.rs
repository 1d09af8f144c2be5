//! Provider/generator trait surface (§4.3, §9 design notes).
//!
//! Multi-provider polymorphism is deliberately a small capability set
//! exposed through one object-safe trait plus optional capabilities reached
//! by probing — not an inheritance hierarchy.

use async_trait::async_trait;

use crate::error::Error;
use crate::model_cache::ModelSource;
use crate::options::OptionBag;
use crate::schema::{Message, Session, Usage};

/// A concrete LLM backend: Anthropic, Gemini, OpenAI, Mistral, or the local
/// mock engine all implement this.
///
/// `as_embedder`/`as_downloader` are the capability-probe seams: a provider
/// that supports embeddings or model management overrides one of these to
/// return `Some(self)`; the manager probes at call time instead of
/// requiring every provider to implement every capability, per the
/// "runtime-checked optional capabilities, not inheritance" guidance.
#[async_trait]
pub trait Generator: ModelSource + Send + Sync {
    fn name(&self) -> &str;

    /// One-shot generation, stateless from the provider's point of view.
    async fn without_session(
        &self,
        model: &str,
        message: Message,
        options: &OptionBag,
    ) -> Result<(Message, Usage), (Error, Option<Message>)>;

    /// Append `message` to `session`, run one generation step, and append
    /// the reply. `session` is mutated in place; the caller owns
    /// serialization against concurrent use (§5).
    async fn with_session(
        &self,
        model: &str,
        session: &mut Session,
        message: Message,
        options: &OptionBag,
    ) -> Result<Usage, (Error, Option<Message>)>;

    fn as_embedder(&self) -> Option<&dyn Embedder> {
        None
    }

    fn as_downloader(&self) -> Option<&dyn Downloader> {
        None
    }
}

/// Optional embedding capability (§4.5), reached through
/// [`Generator::as_embedder`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embedding(&self, model: &str, text: &str, options: &OptionBag) -> Result<Vec<f64>, Error>;

    /// Fails if `texts` is empty; preserves input order in the output.
    async fn batch_embedding(
        &self,
        model: &str,
        texts: &[String],
        options: &OptionBag,
    ) -> Result<Vec<Vec<f64>>, Error>;
}

/// Optional model-download capability some providers expose for local/open
/// models, reached through [`Generator::as_downloader`]. `tag` is the
/// portion after a second `:` in a `provider:name[:tag]` path, kept attached
/// to `name` by the manager's path-splitting rule rather than parsed here.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download_model(&self, name_and_tag: &str) -> Result<(), Error>;
    async fn delete_model(&self, name_and_tag: &str) -> Result<(), Error>;
}
