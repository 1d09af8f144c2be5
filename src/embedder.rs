//! Embedder surface (C9): reuses the option bag and provider registry,
//! adding the task-type/title/dimensionality knobs embeddings need.
//!
//! This module is a thin convenience layer over [`Manager`] and the
//! [`Generator::as_embedder`] capability probe — it holds no state of its
//! own, mirroring how [`crate::manager::Manager`] itself is a pure
//! dispatcher.

use crate::error::Error;
use crate::manager::Manager;
use crate::options::OptionBag;

impl Manager {
    /// Resolves `provider`/`model` exactly as [`Manager::ask`] does, then
    /// requires the winning generator to expose the embedder capability.
    async fn resolve_embedder(&self, provider: Option<&str>, model: &str) -> Result<&dyn crate::provider::Embedder, Error> {
        let generator = self.resolve(provider, model).await?;
        generator
            .as_embedder()
            .ok_or_else(|| Error::NotImplemented(format!("provider for model {model:?} does not support embeddings")))
    }

    pub async fn embedding(&self, provider: Option<&str>, model: &str, text: &str, options: &OptionBag) -> Result<Vec<f64>, Error> {
        let embedder = self.resolve_embedder(provider, model).await?;
        embedder.embedding(model, text, options).await
    }

    /// Fails on an empty `texts` slice; preserves input order in the output
    /// (enforced by each provider's own implementation, not re-sorted here).
    pub async fn batch_embedding(&self, provider: Option<&str>, model: &str, texts: &[String], options: &OptionBag) -> Result<Vec<Vec<f64>>, Error> {
        if texts.is_empty() {
            return Err(Error::BadParameter("batch_embedding requires at least one text".into()));
        }
        let embedder = self.resolve_embedder(provider, model).await?;
        embedder.batch_embedding(model, texts, options).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::providers::mock::MockGenerator;

    #[tokio::test]
    async fn embedding_on_capability_less_provider_is_not_implemented() {
        let mut manager = Manager::new();
        manager.register("mock", Arc::new(MockGenerator::new(1)));

        let err = manager
            .embedding(Some("mock"), "eliza-1966-en", "hello", &OptionBag::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn batch_embedding_rejects_empty_input_before_resolving_a_provider() {
        let manager = Manager::new();
        let err = manager
            .batch_embedding(None, "any-model", &[], &OptionBag::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }
}
