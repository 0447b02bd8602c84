//!
//! Model catalogue: caller model names resolved to upstream identifiers.
//!
//! The vendor lists models under internal ids; callers address them by
//! name. The catalogue caches the listing for the process lifetime and is
//! populated lazily on first use. An unknown model name is a caller error,
//! not an upstream fault.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{HighlightError, Result};
use crate::upstream::UpstreamModel;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Seam for the vendor model listing.
///
/// Implemented by the upstream client; mocked in tests.
#[async_trait]
pub trait ModelSource: Send + Sync {
    ///
    /// Fetch all models the account can use.
    async fn list_models(
        &self,
        access_token: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<UpstreamModel>>;
}

///
/// One resolved model.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /** upstream model identifier used in chat requests */
    pub id: String,
    /** caller-facing model name */
    pub name: String,
    /** provider label reported as `owned_by` */
    pub provider: String,
    /** whether the vendor marks the model free */
    pub is_free: bool,
}

///
/// Lazily populated, process-lifetime model cache keyed by model name.
pub struct ModelCatalog {
    /** listing source */
    source: Arc<dyn ModelSource>,
    /** name → entry cache; empty until the first successful fetch */
    cache: RwLock<HashMap<String, ModelEntry>>,
}

/* --- start of code -------------------------------------------------------------------------- */

impl ModelCatalog {
    ///
    /// Create an empty catalogue backed by the given source.
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self { source, cache: RwLock::new(HashMap::new()) }
    }

    ///
    /// Resolve a caller-supplied model name.
    ///
    /// # Arguments
    ///  * `access_token` - bearer token for the listing call
    ///  * `proxy` - optional per-account proxy URL
    ///  * `name` - caller-facing model name
    ///
    /// # Returns
    ///  * Resolved entry
    ///  * `HighlightError::CallerInput` if the name is unknown
    pub async fn resolve(
        &self,
        access_token: &str,
        proxy: Option<&str>,
        name: &str,
    ) -> Result<ModelEntry> {
        self.ensure_loaded(access_token, proxy).await?;

        let cache = self.cache.read().await;
        cache
            .get(name)
            .cloned()
            .ok_or_else(|| HighlightError::CallerInput(format!("Model '{}' not found", name)))
    }

    ///
    /// All known models, fetching the listing on first use.
    ///
    /// # Arguments
    ///  * `access_token` - bearer token for the listing call
    ///  * `proxy` - optional per-account proxy URL
    pub async fn all(&self, access_token: &str, proxy: Option<&str>) -> Result<Vec<ModelEntry>> {
        self.ensure_loaded(access_token, proxy).await?;
        let cache = self.cache.read().await;
        Ok(cache.values().cloned().collect())
    }

    ///
    /// Populate the cache from upstream if it is still empty.
    async fn ensure_loaded(&self, access_token: &str, proxy: Option<&str>) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if !cache.is_empty() {
                return Ok(());
            }
        }

        let models = self.source.list_models(access_token, proxy).await?;
        let mut cache = self.cache.write().await;
        if !cache.is_empty() {
            // another request filled it while we fetched
            return Ok(());
        }

        for model in models {
            let is_free = model.pricing.as_ref().map(|p| p.is_free).unwrap_or(false);
            cache.insert(
                model.name.clone(),
                ModelEntry { id: model.id, name: model.name, provider: model.provider, is_free },
            );
        }
        info!(models = cache.len(), "model catalogue loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FakeSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelSource for FakeSource {
        async fn list_models(
            &self,
            _access_token: &str,
            _proxy: Option<&str>,
        ) -> Result<Vec<UpstreamModel>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_str(
                r#"[
                    {"id":"m-1","name":"gpt-4o","provider":"openai","pricing":{"isFree":false}},
                    {"id":"m-2","name":"claude-3-5-sonnet","provider":"anthropic","pricing":{"isFree":true}}
                ]"#,
            )
            .unwrap())
        }
    }

    #[tokio::test]
    async fn resolves_by_name_and_caches_the_listing() {
        let source = Arc::new(FakeSource { calls: AtomicU32::new(0) });
        let catalog = ModelCatalog::new(source.clone());

        let entry = catalog.resolve("at", None, "gpt-4o").await.unwrap();
        assert_eq!(entry.id, "m-1");
        assert_eq!(entry.provider, "openai");
        assert!(!entry.is_free);

        let entry = catalog.resolve("at", None, "claude-3-5-sonnet").await.unwrap();
        assert_eq!(entry.id, "m-2");
        assert!(entry.is_free);

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_model_is_a_caller_error() {
        let source = Arc::new(FakeSource { calls: AtomicU32::new(0) });
        let catalog = ModelCatalog::new(source);

        let err = catalog.resolve("at", None, "gpt-9").await.unwrap_err();
        assert!(matches!(err, HighlightError::CallerInput(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn all_lists_every_model() {
        let source = Arc::new(FakeSource { calls: AtomicU32::new(0) });
        let catalog = ModelCatalog::new(source);

        let models = catalog.all("at", None).await.unwrap();
        assert_eq!(models.len(), 2);
    }
}
