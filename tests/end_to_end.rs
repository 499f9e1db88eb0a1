//! End-to-end tests driving the Pool and Proxy against a real in-process
//! echo backend: broadcast, scatter, tree-reduce, blackboard, and proxy
//! forwarding (success + out-of-range).

use aurora_swarm::hostfile::Endpoint;
use aurora_swarm::patterns::{blackboard::Blackboard, broadcast, scatter_gather, tree_reduce};
use aurora_swarm::pool::protocol::{ChatCompletionsAdapter, ChatConfig, SimpleGenerateAdapter};
use aurora_swarm::pool::{Pool, PoolConfig};
use aurora_swarm::proxy::{create_router, AppState};
use axum::extract::Json as JsonExtract;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Spin up `n` echo backends (`POST /generate` -> `{"response": "echo: "+prompt}`,
/// `GET /headers` -> the request's headers as JSON) on ephemeral ports and
/// return the endpoints that reach them.
async fn spawn_echo_backends(n: usize) -> Vec<Endpoint> {
    let mut endpoints = Vec::with_capacity(n);
    for _ in 0..n {
        let addr = spawn_one_echo_backend().await;
        endpoints.push(Endpoint::new(addr.ip().to_string(), addr.port()));
    }
    endpoints
}

async fn spawn_one_echo_backend() -> SocketAddr {
    let router = Router::new()
        .route("/generate", post(echo_generate))
        .route("/headers", get(echo_headers));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn echo_generate(JsonExtract(body): JsonExtract<Value>) -> JsonExtract<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default();
    JsonExtract(json!({ "response": format!("echo: {prompt}") }))
}

async fn echo_headers(headers: HeaderMap) -> JsonExtract<Value> {
    let seen: Vec<String> = headers.keys().map(|k| k.as_str().to_lowercase()).collect();
    JsonExtract(json!({ "headers": seen }))
}

/// Spin up a chat-completions backend: `POST /v1/chat/completions` echoes
/// back the `max_tokens` it was sent (so tests can tell which headroom
/// calculation produced it), and `GET /v1/models` reports `max_model_len`
/// for `model_max_len` under id `"model-a"` when `Some`, or 404s when
/// `None` (simulating an agent with no discovery endpoint).
async fn spawn_chat_backend(model_max_len: Option<u64>) -> SocketAddr {
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(v1_models))
        .with_state(model_max_len);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn chat_completions(JsonExtract(body): JsonExtract<Value>) -> JsonExtract<Value> {
    let max_tokens = body["max_tokens"].as_u64().unwrap_or(0);
    JsonExtract(json!({
        "choices": [{ "message": { "content": format!("max_tokens={max_tokens}") } }]
    }))
}

async fn v1_models(
    axum::extract::State(model_max_len): axum::extract::State<Option<u64>>,
) -> (StatusCode, JsonExtract<Value>) {
    match model_max_len {
        Some(max_len) => (
            StatusCode::OK,
            JsonExtract(json!({ "data": [{ "id": "model-a", "max_model_len": max_len }] })),
        ),
        None => (StatusCode::NOT_FOUND, JsonExtract(json!({}))),
    }
}

fn test_pool_config() -> PoolConfig {
    PoolConfig {
        concurrency: 64,
        connector_limit: 64,
        timeout: Duration::from_secs(5),
        proxy_url: None,
        batch_mode: false,
    }
}

#[tokio::test]
async fn scenario_broadcast() {
    let endpoints = spawn_echo_backends(4).await;
    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();

    let responses = broadcast(&pool, "hi").await;

    assert_eq!(responses.len(), 4);
    for (i, r) in responses.iter().enumerate() {
        assert!(r.success, "agent {i} failed: {:?}", r.error);
        assert_eq!(r.text, "echo: hi");
        assert_eq!(r.agent_index, i as i32);
    }
}

#[tokio::test]
async fn scenario_scatter() {
    let endpoints = spawn_echo_backends(4).await;
    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();

    let prompts: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
    let responses = scatter_gather(&pool, &prompts).await;

    let texts: Vec<&str> = responses.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["echo: a", "echo: b", "echo: c", "echo: d", "echo: e"]);

    let agent_indices: Vec<i32> = responses.iter().map(|r| r.agent_index).collect();
    assert_eq!(agent_indices, vec![0, 1, 2, 3, 0]);
}

#[tokio::test]
async fn scenario_scatter_empty_prompts() {
    let endpoints = spawn_echo_backends(2).await;
    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();
    let responses = scatter_gather(&pool, &[]).await;
    assert!(responses.is_empty());
}

#[tokio::test]
async fn scenario_tree_reduce() {
    let endpoints = spawn_echo_backends(8).await;
    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();

    let result = tree_reduce(&pool, "leaf", "Summarise level {level}: {responses}", 4, None).await;

    assert!(result.success, "tree-reduce failed: {:?}", result.error);
    assert!(
        result.text.contains("Summarise level 2"),
        "expected final supervisor prompt at level 2, got: {}",
        result.text
    );
}

#[tokio::test]
async fn scenario_tree_reduce_single_round_when_fanin_covers_all_leaves() {
    let endpoints = spawn_echo_backends(3).await;
    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();

    let result = tree_reduce(&pool, "leaf", "Summarise level {level}: {responses}", 10, None).await;

    assert!(result.success);
    assert!(result.text.contains("Summarise level 1"));
}

#[tokio::test]
async fn scenario_blackboard() {
    let mut endpoints = spawn_echo_backends(4).await;
    endpoints[0].tags.insert("role".to_string(), "hypotheses".to_string());
    endpoints[1].tags.insert("role".to_string(), "hypotheses".to_string());
    endpoints[2].tags.insert("role".to_string(), "critiques".to_string());
    endpoints[3].tags.insert("role".to_string(), "critiques".to_string());

    let pool = Pool::new(endpoints, test_pool_config(), SimpleGenerateAdapter).unwrap();
    let mut board = Blackboard::new(vec!["hypotheses".to_string(), "critiques".to_string()]);

    board
        .run(
            &pool,
            2,
            |section, _board| format!("contribute to {section}"),
            None::<fn(&aurora_swarm::patterns::blackboard::BoardState) -> bool>,
        )
        .await;

    assert_eq!(board.round(), 2);
    assert_eq!(board.board()["hypotheses"].len(), 4);
    assert_eq!(board.board()["critiques"].len(), 4);
}

#[tokio::test]
async fn scenario_chat_budget_anchors_to_local_index_zero() {
    // Agent 0 (the anchor) advertises a small model context; agent 1 has no
    // /v1/models at all. A request dispatched to agent 1 must still size
    // its token budget off agent 0's advertised context, not fall back to
    // the default as if no agent anywhere could answer the discovery call.
    let addr_a = spawn_chat_backend(Some(600)).await;
    let addr_b = spawn_chat_backend(None).await;
    let endpoints = vec![
        Endpoint::new(addr_a.ip().to_string(), addr_a.port()),
        Endpoint::new(addr_b.ip().to_string(), addr_b.port()),
    ];

    let adapter = ChatCompletionsAdapter::new(ChatConfig {
        model: "model-a".to_string(),
        ..ChatConfig::default()
    });
    let pool = Pool::new(endpoints, test_pool_config(), adapter).unwrap();

    let response = pool.send(1, "hi", None).await;
    assert!(response.success, "dispatch to agent 1 failed: {:?}", response.error);
    // headroom = 600 - estimate_tokens("hi") - 512 = 600 - 1 - 512 = 87,
    // clamped to max(87, 128) = 128, so budget = min(512, 128) = 128.
    assert_eq!(response.text, "max_tokens=128");
}

#[tokio::test]
async fn scenario_proxy_forward_success() {
    let endpoints = spawn_echo_backends(1).await;
    let state = AppState::new(endpoints, 64, Duration::from_secs(5)).unwrap();
    let router = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{proxy_addr}/agent/0/generate"))
        .json(&json!({ "prompt": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "echo: x");

    let resp = client
        .get(format!("http://{proxy_addr}/agent/0/headers"))
        .header("X-Timeout", "9.5")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let headers: Vec<String> = body["headers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(!headers.contains(&"x-timeout".to_string()));
}

#[tokio::test]
async fn scenario_proxy_index_out_of_range() {
    let endpoints = spawn_echo_backends(1).await;
    let state = AppState::new(endpoints, 64, Duration::from_secs(5)).unwrap();
    let router = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{proxy_addr}/agent/99/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    let resp = client
        .get(format!("http://{proxy_addr}/agent/-1/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn scenario_proxy_health_and_status() {
    let endpoints = spawn_echo_backends(2).await;
    let state = AppState::new(endpoints, 64, Duration::from_secs(5)).unwrap();
    let router = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    let resp = client.get(format!("http://{proxy_addr}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = client.get(format!("http://{proxy_addr}/status")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["agents"], 2);
    assert_eq!(body["endpoints"].as_array().unwrap().len(), 2);
}
