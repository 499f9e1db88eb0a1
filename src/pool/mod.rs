//! Concurrency-controlled client pool over a fleet of agent endpoints.
//!
//! A `Pool` owns a flat list of endpoints plus the infrastructure shared
//! across every view derived from it: a semaphore capping global in-flight
//! requests, a single `reqwest::Client` reusing connections per host, and a
//! protocol adapter. Views (subpools) are cheap to create and always carry
//! enough of the parent to route back to the *original* agent index, which
//! is what the proxy needs to build `/agent/{i}/...` URLs regardless of how
//! many times a pool has been filtered down.

pub mod model_metadata;
pub mod protocol;

use crate::error::{Error, Result};
use crate::hostfile::Endpoint;
use futures::future::join_all;
use protocol::ProtocolAdapter;
use rand::seq::SliceRandom;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Result of dispatching a single prompt to a single agent.
#[derive(Debug, Clone)]
pub struct Response {
    pub success: bool,
    pub text: String,
    pub error: Option<String>,
    /// Global index of the agent that produced (or failed to produce) this
    /// response, or `-1` when no agent could be attributed (e.g. an empty
    /// pool was asked to reduce).
    pub agent_index: i32,
}

impl Response {
    fn ok(agent_index: i32, text: String) -> Self {
        Response {
            success: true,
            text,
            error: None,
            agent_index,
        }
    }

    fn err(agent_index: i32, error: impl Into<String>) -> Self {
        Response {
            success: false,
            text: String::new(),
            error: Some(error.into()),
            agent_index,
        }
    }

    /// Synthesize a successful response not attributable to any single
    /// agent call, e.g. the final value of a reduction over several calls.
    pub fn success(text: impl Into<String>) -> Self {
        Response::ok(-1, text.into())
    }

    /// Synthesize a failure response not attributable to any single agent
    /// call, e.g. "every agent in the reduction failed".
    pub fn failure(error: impl Into<String>) -> Self {
        Response::err(-1, error)
    }
}

/// Tunable knobs for a root [`Pool`]; see the crate-level docs for defaults.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub connector_limit: usize,
    pub timeout: Duration,
    /// When set, agents are reached through a reverse proxy at
    /// `{proxy_url}/agent/{global_index}` rather than directly.
    pub proxy_url: Option<String>,
    /// Whether `send_all` should use the adapter's batched call when
    /// available. Adapters that don't support batching ignore this.
    pub batch_mode: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            concurrency: 512,
            connector_limit: 1024,
            timeout: Duration::from_secs(120),
            proxy_url: None,
            batch_mode: true,
        }
    }
}

const ENV_PROXY_URL: &str = "AURORA_SWARM_PROXY_URL";

impl PoolConfig {
    /// Apply the `AURORA_SWARM_PROXY_URL` environment override on top of
    /// this config, when `proxy_url` wasn't already set explicitly.
    pub fn with_env_overrides(mut self) -> Self {
        if self.proxy_url.is_none() {
            if let Ok(url) = std::env::var(ENV_PROXY_URL) {
                self.proxy_url = Some(url);
            }
        }
        self
    }
}

/// A concurrency-gated view over some set of agent endpoints.
///
/// Cloning a `Pool` is not supported directly; instead use one of the
/// subpool constructors (`by_tag`, `select`, `slice`, `sample`), all of
/// which share this pool's semaphore, transport, and adapter.
pub struct Pool<A: ProtocolAdapter> {
    endpoints: Vec<Endpoint>,
    global_indices: Vec<usize>,
    timeout: Duration,
    proxy_url: Option<Arc<str>>,
    batch_mode: bool,
    limiter: Arc<Semaphore>,
    client: Client,
    adapter: Arc<A>,
    is_root: bool,
    closed: Arc<AtomicBool>,
}

impl<A: ProtocolAdapter> Pool<A> {
    /// Build a root pool over every endpoint in `endpoints`.
    pub fn new(endpoints: Vec<Endpoint>, config: PoolConfig, adapter: A) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::config("pool requires at least one endpoint"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.connector_limit)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        let global_indices = (0..endpoints.len()).collect();
        Ok(Pool {
            endpoints,
            global_indices,
            timeout: config.timeout,
            proxy_url: config.proxy_url.map(Arc::from),
            batch_mode: config.batch_mode,
            limiter: Arc::new(Semaphore::new(config.concurrency)),
            client,
            adapter: Arc::new(adapter),
            is_root: true,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn derive(&self, endpoints: Vec<Endpoint>, global_indices: Vec<usize>) -> Self {
        Pool {
            endpoints,
            global_indices,
            timeout: self.timeout,
            proxy_url: self.proxy_url.clone(),
            batch_mode: self.batch_mode,
            limiter: self.limiter.clone(),
            client: self.client.clone(),
            adapter: self.adapter.clone(),
            is_root: false,
            closed: self.closed.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Global index (agent position in the original fleet) for local index
    /// `local`, the number the reverse proxy exposes at `/agent/{i}/...`.
    pub fn global_index(&self, local: usize) -> Option<usize> {
        self.global_indices.get(local).copied()
    }

    /// Base URL to reach agent `local` — either the endpoint directly, or
    /// through the configured reverse proxy by global index.
    fn base_url(&self, local: usize) -> Result<String> {
        let global = self
            .global_index(local)
            .ok_or_else(|| Error::internal(format!("local index {local} out of range")))?;
        Ok(match &self.proxy_url {
            Some(proxy) => format!("{proxy}/agent/{global}"),
            None => self.endpoints[local].url(),
        })
    }

    /// Subpool of agents carrying `key=value` among their hostfile tags,
    /// preserving source order.
    pub fn by_tag(&self, key: &str, value: &str) -> Self {
        let mut endpoints = Vec::new();
        let mut global_indices = Vec::new();
        for (local, ep) in self.endpoints.iter().enumerate() {
            if ep.tags.get(key).map(String::as_str) == Some(value) {
                endpoints.push(ep.clone());
                global_indices.push(self.global_indices[local]);
            }
        }
        self.derive(endpoints, global_indices)
    }

    /// Subpool consisting of exactly the given local indices, in the order
    /// given.
    pub fn select(&self, indices: &[usize]) -> Self {
        let endpoints = indices.iter().map(|&i| self.endpoints[i].clone()).collect();
        let global_indices = indices.iter().map(|&i| self.global_indices[i]).collect();
        self.derive(endpoints, global_indices)
    }

    /// Subpool over the half-open local-index range `[start, stop)`.
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        let stop = stop.min(self.endpoints.len());
        let start = start.min(stop);
        self.derive(
            self.endpoints[start..stop].to_vec(),
            self.global_indices[start..stop].to_vec(),
        )
    }

    /// Subpool of `n` agents chosen uniformly at random without
    /// replacement (capped at this pool's size).
    pub fn sample(&self, n: usize) -> Self {
        let n = n.min(self.endpoints.len());
        let mut indices: Vec<usize> = (0..self.endpoints.len()).collect();
        indices.shuffle(&mut rand::thread_rng());
        indices.truncate(n);
        self.select(&indices)
    }

    /// Send `prompt` to agent `local`, honoring the global concurrency
    /// cap. `token_budget` overrides the adapter's own budget heuristic
    /// when set (used by patterns that need a larger reduction budget).
    pub async fn send(&self, local: usize, prompt: &str, token_budget: Option<u32>) -> Response {
        let global = match self.global_index(local) {
            Some(g) => g as i32,
            None => return Response::err(-1, format!("local index {local} out of range")),
        };

        let base_url = match self.base_url(local) {
            Ok(u) => u,
            Err(e) => return Response::err(global, e.to_string()),
        };

        // Fleet-wide metadata (e.g. model context length) is always resolved
        // against this pool's own local index 0, never whichever agent the
        // request itself targets — otherwise the cached value ends up
        // pinned to whatever agent happened to issue the first call.
        let anchor_url = match self.base_url(0) {
            Ok(u) => u,
            Err(e) => return Response::err(global, e.to_string()),
        };

        let _permit = match self.limiter.acquire().await {
            Ok(p) => p,
            Err(_) => return Response::err(global, "pool semaphore closed"),
        };

        match self.adapter.call(&self.client, &base_url, &anchor_url, prompt, token_budget).await {
            Ok(text) => Response::ok(global, text),
            Err(e) => {
                debug!(agent = global, error = %e, "agent call failed");
                Response::err(global, e.to_string())
            }
        }
    }

    /// Send `prompt` to every agent in this pool concurrently.
    pub async fn broadcast(&self, prompt: &str) -> Vec<Response> {
        join_all((0..self.len()).map(|i| self.send(i, prompt, None))).await
    }

    /// Send `prompts[i]` to agent `i mod len()`, preserving the original
    /// order of `prompts` in the returned `Vec<Response>`.
    ///
    /// When the adapter supports batching and batch mode is enabled,
    /// prompts are grouped by destination agent and sent as one batched
    /// call per agent; a batch failure fails every prompt in that batch
    /// identically. Otherwise each prompt is dispatched independently.
    pub async fn send_all(&self, prompts: &[String]) -> Vec<Response> {
        if prompts.is_empty() || self.is_empty() {
            return Vec::new();
        }

        if self.batch_mode && self.adapter.supports_batch() {
            return self.send_all_batched(prompts).await;
        }

        join_all(
            prompts
                .iter()
                .enumerate()
                .map(|(i, prompt)| self.send(i % self.len(), prompt, None)),
        )
        .await
    }

    async fn send_all_batched(&self, prompts: &[String]) -> Vec<Response> {
        let n = self.len();
        let mut groups: Vec<Vec<(usize, String)>> = vec![Vec::new(); n];
        for (i, prompt) in prompts.iter().enumerate() {
            groups[i % n].push((i, prompt.clone()));
        }

        // Resolved once up front rather than per-group: every group must
        // anchor fleet-wide metadata lookups to the same endpoint, not
        // whichever group happens to dispatch first.
        let anchor_url = match self.base_url(0) {
            Ok(u) => u,
            Err(e) => {
                let err = e.to_string();
                return prompts.iter().map(|_| Response::err(-1, err.clone())).collect();
            }
        };

        let batch_results = join_all(groups.into_iter().enumerate().filter(|(_, g)| !g.is_empty()).map(
            |(local, group)| {
                let anchor_url = anchor_url.clone();
                async move {
                    let global = self.global_index(local).unwrap_or(usize::MAX) as i32;
                    let base_url = match self.base_url(local) {
                        Ok(u) => u,
                        Err(e) => {
                            let err = e.to_string();
                            return group
                                .into_iter()
                                .map(|(pos, _)| (pos, Err(err.clone())))
                                .collect::<Vec<_>>();
                        }
                    };

                    let _permit = match self.limiter.acquire().await {
                        Ok(p) => p,
                        Err(_) => {
                            return group
                                .into_iter()
                                .map(|(pos, _)| (pos, Err("pool semaphore closed".to_string())))
                                .collect::<Vec<_>>()
                        }
                    };

                    let prompts: Vec<String> = group.iter().map(|(_, p)| p.clone()).collect();
                    match self
                        .adapter
                        .call_batch(&self.client, &base_url, &anchor_url, &prompts, None)
                        .await
                    {
                        Ok(texts) => group
                            .into_iter()
                            .zip(texts)
                            .map(|((pos, _), text)| (pos, Ok((global, text))))
                            .collect(),
                        Err(e) => {
                            warn!(agent = global, error = %e, "batched call failed");
                            let err = e.to_string();
                            group
                                .into_iter()
                                .map(|(pos, _)| (pos, Err(err.clone())))
                                .collect()
                        }
                    }
                }
            },
        ))
        .await;

        let mut out: Vec<Option<Response>> = vec![None; prompts.len()];
        for result in batch_results.into_iter().flatten() {
            let (pos, outcome) = result;
            out[pos] = Some(match outcome {
                Ok((global, text)) => Response::ok(global, text),
                Err(msg) => Response::err(-1, msg),
            });
        }
        out.into_iter()
            .map(|r| r.unwrap_or_else(|| Response::err(-1, "prompt not dispatched")))
            .collect()
    }

    /// Mark this pool closed. Idempotent; the underlying `reqwest::Client`
    /// tears down its connections on drop regardless, so this exists to
    /// give callers an explicit, auditable lifecycle hook and to guard
    /// against reuse after shutdown in calling code.
    pub fn close(&self) {
        if self.is_root {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

impl Pool<protocol::ChatCompletionsAdapter> {
    /// Token budget for reduction/aggregation-style calls, where the
    /// prompt itself (containing several agents' responses) needs more
    /// headroom than an ordinary leaf call.
    pub fn aggregation_max_tokens(&self) -> u32 {
        self.adapter.max_tokens_aggregation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::protocol::SimpleGenerateAdapter;
    use std::collections::BTreeMap;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::new(format!("host{i}"), 8000)).collect()
    }

    #[test]
    fn test_new_rejects_empty() {
        let result = Pool::new(Vec::new(), PoolConfig::default(), SimpleGenerateAdapter);
        assert!(result.is_err());
    }

    #[test]
    fn test_subpool_preserves_global_index() {
        let pool = Pool::new(endpoints(5), PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        let sub = pool.select(&[3, 1]);
        assert_eq!(sub.global_index(0), Some(3));
        assert_eq!(sub.global_index(1), Some(1));
    }

    #[test]
    fn test_by_tag_preserves_order_and_global_index() {
        let mut eps = endpoints(4);
        eps[1].tags.insert("role".to_string(), "worker".to_string());
        eps[3].tags.insert("role".to_string(), "worker".to_string());
        let pool = Pool::new(eps, PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        let workers = pool.by_tag("role", "worker");
        assert_eq!(workers.len(), 2);
        assert_eq!(workers.global_index(0), Some(1));
        assert_eq!(workers.global_index(1), Some(3));
    }

    #[test]
    fn test_slice_bounds_are_clamped() {
        let pool = Pool::new(endpoints(3), PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        let sub = pool.slice(1, 100);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.global_index(0), Some(1));
    }

    #[test]
    fn test_sample_caps_at_pool_size() {
        let pool = Pool::new(endpoints(3), PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        let sub = pool.sample(10);
        assert_eq!(sub.len(), 3);
    }

    #[test]
    fn test_base_url_uses_proxy_when_configured() {
        let config = PoolConfig {
            proxy_url: Some("http://proxy:9000".to_string()),
            ..Default::default()
        };
        let pool = Pool::new(endpoints(2), config, SimpleGenerateAdapter).unwrap();
        let sub = pool.select(&[1]);
        assert_eq!(sub.base_url(0).unwrap(), "http://proxy:9000/agent/1");
    }

    #[test]
    fn test_base_url_direct_without_proxy() {
        let pool = Pool::new(endpoints(2), PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        assert_eq!(pool.base_url(1).unwrap(), "http://host1:8000");
    }

    #[test]
    fn test_close_is_idempotent() {
        let pool = Pool::new(endpoints(1), PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        pool.close();
        pool.close();
        assert!(pool.is_closed());
    }

    #[test]
    fn test_endpoint_tags_preserved() {
        let mut tags = BTreeMap::new();
        tags.insert("node".to_string(), "a0".to_string());
        let eps = vec![Endpoint::with_tags("h", 8000, tags)];
        let pool = Pool::new(eps, PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        assert_eq!(pool.endpoints()[0].tags.get("node").map(String::as_str), Some("a0"));
    }
}
