//! Protocol adapters: the seam between `Pool` dispatch and the wire format
//! a particular agent server speaks.
//!
//! `Pool` never builds a request body or parses a response itself; it
//! hands a prompt (or a batch of prompts) to the adapter and gets back
//! plain text. Two adapters ship here: a minimal `/generate` endpoint with
//! no batching, and an OpenAI-compatible chat/completions endpoint with
//! single-prompt chat and batched legacy completions.

use crate::error::{Error, Result};
use crate::pool::model_metadata::ModelMetadataResolver;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;

/// Per-request token budget, when the caller doesn't pin one explicitly.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget(pub u32);

/// Wire-level contract an agent server implements.
///
/// Implementors own request construction and response parsing; `Pool`
/// owns routing, concurrency, and result assembly.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Whether [`ProtocolAdapter::call_batch`] is meaningful for this adapter.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Send a single prompt to `base_url`, returning the generated text.
    ///
    /// `anchor_url` is the issuing pool's own local-index-0 URL, constant
    /// for the pool's lifetime regardless of which agent `base_url` points
    /// at; adapters that need a single stable endpoint to query fleet-wide
    /// metadata from (e.g. model context length) use `anchor_url` instead
    /// of `base_url` for that.
    async fn call(
        &self,
        client: &Client,
        base_url: &str,
        anchor_url: &str,
        prompt: &str,
        token_budget: Option<u32>,
    ) -> Result<String>;

    /// Send many prompts to `base_url` in one request, returning one
    /// generated text per prompt in the same order.
    ///
    /// The default implementation rejects batching; adapters that support
    /// it override this method and also return `true` from
    /// [`ProtocolAdapter::supports_batch`].
    async fn call_batch(
        &self,
        _client: &Client,
        _base_url: &str,
        _anchor_url: &str,
        _prompts: &[String],
        _token_budget: Option<u32>,
    ) -> Result<Vec<String>> {
        Err(Error::protocol("this adapter does not support batched calls"))
    }
}

/// Estimate a prompt's token count as one token per four characters,
/// matching the heuristic the agent servers themselves use for admission.
fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 4.0).ceil() as u32
}

/// `POST {base_url}/generate` with `{"prompt": ...}`.
///
/// The response is read from a `response` field, falling back to `text`
/// if `response` is absent. No batching support.
#[derive(Debug, Default, Clone)]
pub struct SimpleGenerateAdapter;

#[async_trait]
impl ProtocolAdapter for SimpleGenerateAdapter {
    async fn call(
        &self,
        client: &Client,
        base_url: &str,
        _anchor_url: &str,
        prompt: &str,
        _token_budget: Option<u32>,
    ) -> Result<String> {
        let resp = client
            .post(format!("{base_url}/generate"))
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::protocol(format!("HTTP {status}: {body}")));
        }

        let body: serde_json::Value = resp.json().await?;
        body["response"]
            .as_str()
            .or_else(|| body["text"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::protocol("invalid response structure"))
    }
}

/// Configuration for [`ChatCompletionsAdapter`].
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_tokens_aggregation: u32,
    pub model_max_context: Option<u32>,
    pub context_safety_buffer: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            model: "default".to_string(),
            max_tokens: 512,
            max_tokens_aggregation: 1024,
            model_max_context: None,
            context_safety_buffer: 512,
        }
    }
}

const ENV_MAX_TOKENS: &str = "AURORA_SWARM_MAX_TOKENS";
const ENV_MAX_TOKENS_AGGREGATION: &str = "AURORA_SWARM_MAX_TOKENS_AGGREGATION";

impl ChatConfig {
    /// Apply `AURORA_SWARM_MAX_TOKENS` / `AURORA_SWARM_MAX_TOKENS_AGGREGATION`
    /// / `AURORA_SWARM_MODEL_MAX_CONTEXT` environment overrides on top of
    /// this config, leaving already-set fields untouched.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(ENV_MAX_TOKENS) {
            if let Ok(parsed) = v.parse() {
                self.max_tokens = parsed;
            }
        }
        if let Ok(v) = std::env::var(ENV_MAX_TOKENS_AGGREGATION) {
            if let Ok(parsed) = v.parse() {
                self.max_tokens_aggregation = parsed;
            }
        }
        if self.model_max_context.is_none() {
            if let Ok(v) = std::env::var(super::model_metadata::ENV_MODEL_MAX_CONTEXT) {
                if let Ok(parsed) = v.parse() {
                    self.model_max_context = Some(parsed);
                }
            }
        }
        self
    }
}

/// `POST {base_url}/v1/chat/completions` (single prompt) or
/// `POST {base_url}/v1/completions` (batched prompts); OpenAI compatible.
pub struct ChatCompletionsAdapter {
    config: ChatConfig,
    resolver: ModelMetadataResolver,
}

impl ChatCompletionsAdapter {
    pub fn new(config: ChatConfig) -> Self {
        let resolver = ModelMetadataResolver::new(config.model_max_context);
        ChatCompletionsAdapter { config, resolver }
    }

    pub fn max_tokens_aggregation(&self) -> u32 {
        self.config.max_tokens_aggregation
    }

    async fn budget_for(&self, client: &Client, anchor_url: &str, estimate: u32) -> u32 {
        let model_max_context = self.resolver.resolve(client, anchor_url, &self.config.model).await;
        let headroom = model_max_context
            .saturating_sub(estimate)
            .saturating_sub(self.config.context_safety_buffer);
        self.config.max_tokens.min(headroom.max(128))
    }
}

#[async_trait]
impl ProtocolAdapter for ChatCompletionsAdapter {
    fn supports_batch(&self) -> bool {
        true
    }

    async fn call(
        &self,
        client: &Client,
        base_url: &str,
        anchor_url: &str,
        prompt: &str,
        token_budget: Option<u32>,
    ) -> Result<String> {
        let budget = match token_budget {
            Some(b) => b,
            None => self.budget_for(client, anchor_url, estimate_tokens(prompt)).await,
        };

        let resp = client
            .post(format!("{base_url}/v1/chat/completions"))
            .json(&json!({
                "model": self.config.model,
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": budget,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(Error::protocol(msg));
        }

        let message = &body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| Error::protocol("invalid response structure"))?["message"];
        message["content"]
            .as_str()
            .or_else(|| message["reasoning_content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::protocol("invalid response structure"))
    }

    async fn call_batch(
        &self,
        client: &Client,
        base_url: &str,
        anchor_url: &str,
        prompts: &[String],
        token_budget: Option<u32>,
    ) -> Result<Vec<String>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let budget = match token_budget {
            Some(b) => b,
            None => {
                let mean_estimate = prompts.iter().map(|p| estimate_tokens(p)).sum::<u32>()
                    / prompts.len() as u32;
                self.budget_for(client, anchor_url, mean_estimate).await
            }
        };

        let resp = client
            .post(format!("{base_url}/v1/completions"))
            .json(&json!({
                "model": self.config.model,
                "prompt": prompts,
                "max_tokens": budget,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(Error::protocol(msg));
        }

        let choices = body["choices"]
            .as_array()
            .ok_or_else(|| Error::protocol("invalid response structure"))?;
        if choices.len() != prompts.len() {
            return Err(Error::protocol(format!(
                "expected {} choices, got {}",
                prompts.len(),
                choices.len()
            )));
        }

        choices
            .iter()
            .map(|choice| {
                choice["text"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::protocol("invalid response structure"))
            })
            .collect()
    }
}

/// Shared ownership of an adapter, as held by a [`crate::pool::Pool`].
pub type SharedAdapter<A> = Arc<A>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_default_chat_config() {
        let cfg = ChatConfig::default();
        assert_eq!(cfg.max_tokens, 512);
        assert_eq!(cfg.max_tokens_aggregation, 1024);
    }
}
