//! Aurora-Swarm — concurrency-controlled client pool, collective
//! communication patterns, and a streaming reverse HTTP proxy for a fleet
//! of co-located text-generation agent endpoints.
//!
//! # Architecture
//!
//! ```text
//!  hostfile ──▶ Vec<Endpoint> ──▶ Pool<A> ──┬──▶ patterns:: (broadcast,
//!                                           │     scatter_gather, tree_reduce,
//!                                           │     pipeline, blackboard)
//!                                           │
//!                                           └──▶ proxy:: (reverse HTTP proxy,
//!                                                 one TCP port for every
//!                                                 agent address)
//! ```
//!
//! `Pool` is generic over a [`pool::protocol::ProtocolAdapter`], the seam
//! that separates "how do I call this agent's HTTP API" from "how do I
//! route to / rate-limit / fan out across the fleet". Two adapters ship
//! here: a minimal `/generate` endpoint and an OpenAI-compatible
//! chat/completions endpoint.

pub mod error;
pub mod hostfile;
pub mod patterns;
pub mod pool;
pub mod proxy;

pub use error::{Error, Result};
pub use hostfile::{parse_hostfile, parse_hostfile_str, Endpoint};
pub use pool::protocol::{ChatCompletionsAdapter, ProtocolAdapter, SimpleGenerateAdapter};
pub use pool::{Pool, PoolConfig, Response};

/// Crate version, surfaced on `/status` and in startup logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
