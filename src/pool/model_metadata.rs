//! Resolves `model_max_context` for a fleet of chat-completions agents.
//!
//! Resolution order: an explicit value from config wins outright; otherwise
//! the env override; otherwise a live `GET /v1/models` against the pool's
//! first endpoint; otherwise the hardcoded fallback. The result is cached
//! for the lifetime of the pool via [`OnceCell`] so concurrent callers
//! never race each other into issuing duplicate `/v1/models` calls.

use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub const DEFAULT_MODEL_MAX_CONTEXT: u32 = 131_072;
pub(crate) const ENV_MODEL_MAX_CONTEXT: &str = "AURORA_SWARM_MODEL_MAX_CONTEXT";

/// Resolves and caches `model_max_context` for one pool.
pub struct ModelMetadataResolver {
    explicit: Option<u32>,
    cached: OnceCell<u32>,
}

impl ModelMetadataResolver {
    pub fn new(explicit: Option<u32>) -> Self {
        ModelMetadataResolver {
            explicit,
            cached: OnceCell::new(),
        }
    }

    /// Resolve `model_max_context`, querying `anchor_url` at most once.
    ///
    /// `anchor_url` must be the issuing pool's own local-index-0 URL (the
    /// Rust equivalent of querying `endpoints[0]` directly), so that the
    /// cached value doesn't depend on which agent happened to trigger the
    /// first chat-adapter call. `model` is the model id to match against
    /// `/v1/models`' `data[].id` field; entries for other models on the
    /// same server are ignored.
    pub async fn resolve(&self, client: &Client, anchor_url: &str, model: &str) -> u32 {
        *self
            .cached
            .get_or_init(|| async { self.resolve_uncached(client, anchor_url, model).await })
            .await
    }

    async fn resolve_uncached(&self, client: &Client, anchor_url: &str, model: &str) -> u32 {
        if let Some(explicit) = self.explicit {
            debug!(explicit, "model_max_context from explicit config");
            return explicit;
        }

        if let Ok(value) = std::env::var(ENV_MODEL_MAX_CONTEXT) {
            if let Ok(parsed) = value.parse::<u32>() {
                debug!(parsed, "model_max_context from env override");
                return parsed;
            }
            warn!(value, "ignoring unparseable {ENV_MODEL_MAX_CONTEXT}");
        }

        match fetch_model_max_context(client, anchor_url, model).await {
            Some(value) => {
                debug!(value, "model_max_context from /v1/models");
                value
            }
            None => {
                debug!(
                    DEFAULT_MODEL_MAX_CONTEXT,
                    "model_max_context falling back to default"
                );
                DEFAULT_MODEL_MAX_CONTEXT
            }
        }
    }
}

async fn fetch_model_max_context(client: &Client, anchor_url: &str, model: &str) -> Option<u32> {
    let resp = client
        .get(format!("{anchor_url}/v1/models"))
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let body: serde_json::Value = resp.json().await.ok()?;
    body["data"]
        .as_array()?
        .iter()
        .find(|entry| entry.get("id").and_then(|v| v.as_str()) == Some(model))
        .and_then(|entry| entry.get("max_model_len"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_wins_without_network() {
        let resolver = ModelMetadataResolver::new(Some(4096));
        let client = Client::new();
        let value = resolver.resolve(&client, "http://127.0.0.1:1", "some-model").await;
        assert_eq!(value, 4096);
    }

    #[tokio::test]
    async fn test_cached_after_first_resolve() {
        let resolver = ModelMetadataResolver::new(Some(2048));
        let client = Client::new();
        assert_eq!(resolver.resolve(&client, "http://a", "m").await, 2048);
        assert_eq!(resolver.resolve(&client, "http://b", "m").await, 2048);
    }
}
