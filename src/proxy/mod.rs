//! Streaming reverse HTTP proxy multiplexing every agent endpoint behind
//! one TCP port.
//!
//! Routes:
//!
//! - `GET /health` — liveness check
//! - `GET /status` — agent roster and uptime
//! - `*   /agent/{index}/{path...}` — forward to `endpoints[index]`
//!
//! This lets a caller reach any compute-node agent through a single SSH
//! tunnel or load balancer without per-agent network exposure.

use crate::hostfile::Endpoint;
use crate::Result;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const STRIP_RESPONSE_HEADERS: &[&str] = &["content-encoding", "transfer-encoding", "content-length"];

fn is_hop_by_hop_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

/// Shared state handed to every proxy route.
#[derive(Clone)]
pub struct AppState {
    endpoints: Arc<Vec<Endpoint>>,
    client: reqwest::Client,
    default_timeout: Duration,
    start_time: Instant,
}

impl AppState {
    pub fn new(endpoints: Vec<Endpoint>, connector_limit: usize, default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(connector_limit)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(AppState {
            endpoints: Arc::new(endpoints),
            client,
            default_timeout,
            start_time: Instant::now(),
        })
    }
}

/// Build the router: `/health`, `/status`, `/agent/:index/*rest`, wrapped
/// in tracing and permissive CORS.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/agent/:index/*rest", any(forward))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Bind `addr` and serve the proxy router until the process is killed.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<()> {
    let endpoint_count = state.endpoints.len();
    let router = create_router(state);
    info!(%addr, agents = endpoint_count, "starting reverse proxy");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::Error::config(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::Error::internal(e.to_string()))?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed().as_secs_f64();
    let agents: Vec<serde_json::Value> = state
        .endpoints
        .iter()
        .enumerate()
        .map(|(i, ep)| {
            json!({
                "index": i,
                "host": ep.host,
                "port": ep.port,
                "tags": ep.tags,
            })
        })
        .collect();

    Json(json!({
        "agents": state.endpoints.len(),
        "uptime_seconds": (uptime * 100.0).round() / 100.0,
        "endpoints": agents,
    }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn forward(
    State(state): State<AppState>,
    Path((index, rest)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    let index: i64 = match index.parse() {
        Ok(i) => i,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid agent index"),
    };

    if index < 0 || index as usize >= state.endpoints.len() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("agent index {index} out of range [0, {})", state.endpoints.len()),
        );
    }
    let index = index as usize;
    let endpoint = &state.endpoints[index];

    let mut downstream_url = format!("{}/{}", endpoint.url(), rest);
    if let Some(query) = req.uri().query() {
        downstream_url.push('?');
        downstream_url.push_str(query);
    }

    let timeout = req
        .headers()
        .get("x-timeout")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(state.default_timeout);

    let method = req.method().clone();
    let forward_headers = forward_request_headers(req.headers());

    let body_bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let upstream_result = state
        .client
        .request(reqwest_method, &downstream_url)
        .headers(forward_headers)
        .timeout(timeout)
        .body(body_bytes)
        .send()
        .await;

    let upstream = match upstream_result {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            error!(agent = index, %downstream_url, "upstream timeout after {:?}", timeout);
            return error_response(
                StatusCode::GATEWAY_TIMEOUT,
                format!("upstream timeout after {:.1}s", timeout.as_secs_f64()),
            );
        }
        Err(e) if e.is_connect() => {
            error!(agent = index, %downstream_url, error = %e, "connection error forwarding to agent");
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("cannot connect to {}:{}", endpoint.host, endpoint.port),
            );
        }
        Err(e) => {
            error!(agent = index, %downstream_url, error = %e, "unexpected error forwarding to agent");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal proxy error");
        }
    };

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if is_hop_by_hop_header(name.as_str()) || STRIP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        response_headers.insert(name.clone(), value.clone());
    }

    debug!(agent = index, %method, %downstream_url, status = status.as_u16(), "forwarded");

    let stream = upstream.bytes_stream();
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response_headers;
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"))
}

/// Build the outbound header set: drop hop-by-hop headers and the
/// `X-Timeout` control header the proxy itself consumes.
fn forward_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_lowercase();
        if is_hop_by_hop_header(name.as_str()) || lower == "x-timeout" {
            continue;
        }
        if let (Ok(name), val) = (HeaderName::try_from(name.as_str()), value.clone()) {
            out.insert(name, val);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hop_by_hop_header() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Proxy-Connection"));
        assert!(!is_hop_by_hop_header("Content-Type"));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let resp = health().await;
        assert_eq!(resp.0["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_handler_lists_endpoints() {
        let state = AppState::new(
            vec![Endpoint::new("h0", 8000), Endpoint::new("h1", 8000)],
            1024,
            Duration::from_secs(120),
        )
        .unwrap();
        let resp = status(State(state)).await;
        assert_eq!(resp.0["agents"], 2);
        assert_eq!(resp.0["endpoints"][1]["host"], "h1");
    }
}
