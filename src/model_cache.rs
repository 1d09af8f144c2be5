//! TTL-bounded, LRU-capped model cache (§4.8), shared by every provider
//! registered with a [`crate::manager::Manager`].
//!
//! Population is single-flighted: the Nth concurrent caller for a cold key
//! waits on the first caller's in-flight request rather than issuing its
//! own.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::Error;
use crate::schema::Model;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_CAPACITY: usize = 64;

struct Entry {
    models: Vec<Model>,
    expires_at: Instant,
    last_used: Instant,
}

/// Async closure a provider supplies to (re)populate its entry: fetches the
/// full model list from the provider's `/models` listing.
#[async_trait::async_trait]
pub trait ModelSource: Send + Sync {
    async fn list_models(&self) -> Result<Vec<Model>, Error>;
}

struct Inner {
    entries: HashMap<String, Entry>,
    ttl: Duration,
    capacity: usize,
}

/// Cache keyed by provider name. One instance is shared across every
/// provider a [`crate::manager::Manager`] holds.
pub struct ModelCache {
    inner: Mutex<Inner>,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl ModelCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                ttl,
                capacity,
            }),
        }
    }

    /// Return the cached model list for `provider`, populating it via
    /// `source` on a cold or expired entry.
    ///
    /// Holding the single lock across the whole populate call is what makes
    /// this single-flighted: a second caller blocked on the same mutex sees
    /// the freshly written entry once the first caller's fetch completes,
    /// and never issues its own request.
    pub async fn list_models(
        &self,
        provider: &str,
        source: &(dyn ModelSource + Sync),
    ) -> Result<Vec<Model>, Error> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = inner.entries.get(provider) {
            if entry.expires_at > now {
                let models = entry.models.clone();
                inner.entries.get_mut(provider).unwrap().last_used = now;
                return Ok(models);
            }
        }

        let models = source.list_models().await?;
        let ttl = inner.ttl;
        let capacity = inner.capacity;
        inner.entries.insert(
            provider.to_string(),
            Entry {
                models: models.clone(),
                expires_at: now + ttl,
                last_used: now,
            },
        );
        evict_lru(&mut inner.entries, capacity);
        Ok(models)
    }

    /// Look up one model by name, consulting the cache first and falling
    /// back to `source`'s full listing (the design does not assume a
    /// separate single-model endpoint at this layer — providers that have
    /// one call it from inside their own `ModelSource` impl).
    pub async fn get_model(
        &self,
        provider: &str,
        name: &str,
        source: &(dyn ModelSource + Sync),
    ) -> Result<Model, Error> {
        let models = self.list_models(provider, source).await?;
        models
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::NotFound(format!("model {name:?} not found for {provider:?}")))
    }

    /// Drop a provider's entry, forcing the next access to repopulate.
    pub async fn invalidate(&self, provider: &str) {
        self.inner.lock().await.entries.remove(provider);
    }
}

fn evict_lru(entries: &mut HashMap<String, Entry>, capacity: usize) {
    while entries.len() > capacity {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(k) => {
                entries.remove(&k);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        models: Vec<Model>,
    }

    #[async_trait::async_trait]
    impl ModelSource for CountingSource {
        async fn list_models(&self) -> Result<Vec<Model>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.models.clone())
        }
    }

    #[tokio::test]
    async fn concurrent_cold_callers_trigger_one_upstream_call() {
        let cache = Arc::new(ModelCache::default());
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            models: vec![Model::new("shared", "p1")],
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                cache.list_models("p1", source.as_ref()).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_repopulated() {
        let cache = ModelCache::new(Duration::from_millis(1), 64);
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            models: vec![Model::new("m", "p1")],
        };
        cache.list_models("p1", &source).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.list_models("p1", &source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_model_falls_back_to_full_listing() {
        let cache = ModelCache::default();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            models: vec![Model::new("shared", "p1")],
        };
        let m = cache.get_model("p1", "shared", &source).await.unwrap();
        assert_eq!(m.owned_by, "p1");
        assert!(cache.get_model("p1", "missing", &source).await.is_err());
    }
}
