//! Mistral generator (C6): Mistral's chat API is OpenAI-compatible, so this
//! is a thin re-pointing of [`OpenAiProvider`] at Mistral's base URL rather
//! than a parallel wire implementation.

use async_trait::async_trait;

use crate::error::Error;
use crate::model_cache::ModelSource;
use crate::options::OptionBag;
use crate::provider::{Embedder, Generator};
use crate::providers::openai::OpenAiProvider;
use crate::schema::{Message, Model, Session, Usage};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";

pub struct MistralProvider {
    inner: OpenAiProvider,
}

impl MistralProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            inner: OpenAiProvider::new(api_key).with_base_url(DEFAULT_BASE_URL),
        }
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            inner: OpenAiProvider::new(api_key).with_base_url(base_url),
        }
    }
}

#[async_trait]
impl ModelSource for MistralProvider {
    async fn list_models(&self) -> Result<Vec<Model>, Error> {
        let models = self.inner.list_models().await?;
        Ok(models
            .into_iter()
            .map(|mut m| {
                m.owned_by = "mistral".to_string();
                m
            })
            .collect())
    }
}

#[async_trait]
impl Generator for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn without_session(&self, model: &str, message: Message, options: &OptionBag) -> Result<(Message, Usage), (Error, Option<Message>)> {
        self.inner.without_session(model, message, options).await
    }

    async fn with_session(&self, model: &str, session: &mut Session, message: Message, options: &OptionBag) -> Result<Usage, (Error, Option<Message>)> {
        self.inner.with_session(model, session, message, options).await
    }

    fn as_embedder(&self) -> Option<&dyn Embedder> {
        Some(self)
    }
}

#[async_trait]
impl Embedder for MistralProvider {
    async fn embedding(&self, model: &str, text: &str, options: &OptionBag) -> Result<Vec<f64>, Error> {
        self.inner.as_embedder().expect("openai provider always implements Embedder").embedding(model, text, options).await
    }

    async fn batch_embedding(&self, model: &str, texts: &[String], options: &OptionBag) -> Result<Vec<Vec<f64>>, Error> {
        self.inner
            .as_embedder()
            .expect("openai provider always implements Embedder")
            .batch_embedding(model, texts, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_points_at_mistral() {
        let provider = MistralProvider::new("key");
        assert_eq!(provider.name(), "mistral");
    }
}
