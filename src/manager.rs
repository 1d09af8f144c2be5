//! Manager/Dispatcher (C7): aggregates registered providers behind one
//! `Ask` entry point, backed by a single [`ModelCache`] shared across every
//! provider.
//!
//! Holds providers in a list rather than a single boxed client so resolution
//! can fall through several candidates per the registration-order tie-break
//! rule.

use std::sync::Arc;

use crate::error::Error;
use crate::model_cache::ModelCache;
use crate::options::OptionBag;
use crate::provider::Generator;
use crate::schema::{Message, Session, Usage};

/// A user-facing generation request, translated into an [`OptionBag`] plus
/// provider/model selection before dispatch.
pub struct Request {
    pub provider: Option<String>,
    pub model: String,
    pub message: Message,
    pub options: OptionBag,
}

impl Request {
    pub fn new(model: impl Into<String>, message: Message) -> Self {
        Self {
            provider: None,
            model: model.into(),
            message,
            options: OptionBag::default(),
        }
    }

    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_options(mut self, options: OptionBag) -> Self {
        self.options = options;
        self
    }
}

struct Registration {
    name: String,
    generator: Arc<dyn Generator>,
    model_source: Arc<dyn crate::model_cache::ModelSource>,
}

/// Holds every registered provider plus the shared model cache spanning all
/// of them (§4.8). Registration order is the tie-breaker when more than one
/// provider's catalog contains the requested model (§4.4 rule 2).
pub struct Manager {
    providers: Vec<Registration>,
    cache: ModelCache,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cache: ModelCache::default(),
        }
    }

    /// Registers a concrete provider. Takes the generic `Arc<T>` rather than
    /// a pre-erased `Arc<dyn Generator>` so both the `Generator` and
    /// `ModelSource` trait objects can be coerced from the same allocation —
    /// erasing to `Arc<dyn Generator>` first and reaching `ModelSource`
    /// through it afterwards would require trait-object upcasting.
    pub fn register<T: Generator + 'static>(&mut self, name: impl Into<String>, generator: Arc<T>) {
        let model_source: Arc<dyn crate::model_cache::ModelSource> = generator.clone();
        let generator: Arc<dyn Generator> = generator;
        self.providers.push(Registration { name: name.into(), generator, model_source });
    }

    /// Resolves `provider`/`model` per §4.4's ordering and returns the
    /// winning generator, or `Error::NotFound` if nothing carries the model.
    ///
    /// `pub(crate)` rather than private: [`crate::embedder`] reuses this same
    /// resolution rule before probing the embedder capability.
    pub(crate) async fn resolve(&self, provider: Option<&str>, model: &str) -> Result<&Arc<dyn Generator>, Error> {
        let candidates: Vec<&Registration> = match provider {
            Some(p) => self.providers.iter().filter(|r| r.name == p).collect(),
            None => self.providers.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(Error::NotFound(format!("no provider registered for {provider:?}")));
        }

        for reg in candidates {
            let models = self.cache.list_models(&reg.name, reg.model_source.as_ref()).await?;
            if models.iter().any(|m| m.name == model) {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("Manager::resolve(...): routing model {model:?} to provider {:?}", reg.name);
                }
                return Ok(&reg.generator);
            }
        }
        Err(Error::NotFound(format!("model {model:?} not found in any candidate provider")))
    }

    /// User-facing synchronous entry point: resolve a provider for
    /// `request.model`, then run one generation step.
    pub async fn ask(&self, request: Request) -> Result<(Message, Usage), (Error, Option<Message>)> {
        let generator = self
            .resolve(request.provider.as_deref(), &request.model)
            .await
            .map_err(|e| (e, None))?;
        generator.without_session(&request.model, request.message, &request.options).await
    }

    /// Same resolution as [`Manager::ask`], but appends the turn to `session`
    /// via the generator's `with_session`.
    pub async fn ask_with_session(&self, request: Request, session: &mut Session) -> Result<Usage, (Error, Option<Message>)> {
        let generator = self
            .resolve(request.provider.as_deref(), &request.model)
            .await
            .map_err(|e| (e, None))?;
        generator.with_session(&request.model, session, request.message, &request.options).await
    }

    /// Splits `provider:name[:tag]` on the first `:`; a second `:tag` stays
    /// attached to the model name (§4.4).
    fn split_provider_path(path: &str) -> Result<(&str, &str), Error> {
        path.split_once(':')
            .ok_or_else(|| Error::BadParameter(format!("expected provider:name[:tag], got {path:?}")))
    }

    pub async fn download_model(&self, path: &str) -> Result<(), Error> {
        let (provider, name_and_tag) = Self::split_provider_path(path)?;
        let reg = self
            .providers
            .iter()
            .find(|r| r.name == provider)
            .ok_or_else(|| Error::NotFound(format!("no provider named {provider:?}")))?;
        let downloader = reg
            .generator
            .as_downloader()
            .ok_or_else(|| Error::NotImplemented(format!("provider {provider:?} does not support model downloads")))?;
        downloader.download_model(name_and_tag).await
    }

    pub async fn delete_model(&self, path: &str) -> Result<(), Error> {
        let (provider, name_and_tag) = Self::split_provider_path(path)?;
        let reg = self
            .providers
            .iter()
            .find(|r| r.name == provider)
            .ok_or_else(|| Error::NotFound(format!("no provider named {provider:?}")))?;
        let downloader = reg
            .generator
            .as_downloader()
            .ok_or_else(|| Error::NotImplemented(format!("provider {provider:?} does not support model deletion")))?;
        downloader.delete_model(name_and_tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockGenerator;

    #[tokio::test]
    async fn ask_routes_to_the_only_registered_provider() {
        let mut manager = Manager::new();
        manager.register("mock", Arc::new(MockGenerator::new(1)));

        let request = Request::new("eliza-1966-en", Message::user("hello"));
        let (reply, _usage) = manager.ask(request).await.unwrap();
        assert!(!reply.text().is_empty());
    }

    #[tokio::test]
    async fn unknown_model_across_all_providers_is_not_found() {
        let mut manager = Manager::new();
        manager.register("mock", Arc::new(MockGenerator::new(1)));

        let request = Request::new("no-such-model", Message::user("hello"));
        let (err, partial) = manager.ask(request).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(partial.is_none());
    }

    #[tokio::test]
    async fn explicit_provider_filter_skips_other_candidates() {
        let mut manager = Manager::new();
        manager.register("mock", Arc::new(MockGenerator::new(1)));

        let request = Request::new("eliza-1966-en", Message::user("hello")).for_provider("nonexistent");
        let (err, _) = manager.ask(request).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn download_model_rejects_malformed_path() {
        let manager = Manager::new();
        let err = manager.download_model("no-colon-here").await.unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[tokio::test]
    async fn download_model_on_capability_less_provider_is_not_implemented() {
        let mut manager = Manager::new();
        manager.register("mock", Arc::new(MockGenerator::new(1)));
        let err = manager.download_model("mock:some-model").await.unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }
}
