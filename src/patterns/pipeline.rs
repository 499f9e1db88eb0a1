//! Pattern: multi-stage pipeline (DAG). A sequence of stages, each served
//! by a pool of agents; the output of one stage flows into the next.

use crate::pool::protocol::ProtocolAdapter;
use crate::pool::{Pool, Response};

/// One step of a pipeline.
///
/// `prompt_template` must contain `{input}`, replaced with the previous
/// stage's output (or the initial input, for the first stage).
pub struct Stage {
    pub name: String,
    pub prompt_template: String,
    pub n_agents: usize,
    /// Reshapes this stage's responses into the string fed to the next
    /// stage. Defaults to joining successful response texts with `\n`.
    pub output_transform: Option<Box<dyn Fn(&[Response]) -> String + Send + Sync>>,
    /// Drops responses before the transform step when it returns `false`.
    pub output_filter: Option<Box<dyn Fn(&Response) -> bool + Send + Sync>>,
}

impl Stage {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>, n_agents: usize) -> Self {
        Stage {
            name: name.into(),
            prompt_template: prompt_template.into(),
            n_agents,
            output_transform: None,
            output_filter: None,
        }
    }
}

fn default_transform(responses: &[Response]) -> String {
    responses
        .iter()
        .filter(|r| r.success)
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Execute `stages` sequentially against `pool`, threading the
/// (transformed) output of each stage into the `{input}` placeholder of
/// the next, starting from `initial_input`.
///
/// When `reuse_agents` is `true`, every stage draws its agents from the
/// front of the same pool (up to `n_agents`). When `false`, the pool is
/// partitioned so each stage gets a dedicated, non-overlapping subset in
/// order.
pub async fn run_pipeline<A: ProtocolAdapter>(
    pool: &Pool<A>,
    stages: &[Stage],
    initial_input: &str,
    reuse_agents: bool,
) -> String {
    let mut current_input = initial_input.to_string();
    let mut offset = 0usize;

    for stage in stages {
        let stage_pool = if reuse_agents {
            let end = stage.n_agents.min(pool.len());
            pool.select(&(0..end).collect::<Vec<_>>())
        } else {
            let end = (offset + stage.n_agents).min(pool.len());
            let sub = pool.slice(offset, end);
            offset = end;
            sub
        };

        let prompt = stage.prompt_template.replace("{input}", &current_input);
        let mut responses = stage_pool.broadcast(&prompt).await;

        if let Some(filter) = &stage.output_filter {
            responses.retain(|r| filter(r));
        }

        current_input = match &stage.output_transform {
            Some(transform) => transform(&responses),
            None => default_transform(&responses),
        };
    }

    current_input
}

/// Convenience two-stage pipeline: broadcast `prompt` to `n_workers`
/// agents (default: all), then feed the joined successful responses into
/// `collect_prompt`'s `{responses}` placeholder and send to agent 0.
pub async fn fan_out_fan_in<A: ProtocolAdapter>(
    pool: &Pool<A>,
    prompt: &str,
    collect_prompt: &str,
    n_workers: Option<usize>,
) -> Response {
    let worker_pool;
    let workers: &Pool<A> = match n_workers {
        Some(n) => {
            let end = n.min(pool.len());
            worker_pool = pool.select(&(0..end).collect::<Vec<_>>());
            &worker_pool
        }
        None => pool,
    };

    let responses = workers.broadcast(prompt).await;
    let combined = responses
        .iter()
        .filter(|r| r.success)
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    let filled = collect_prompt.replace("{responses}", &combined);
    pool.send(0, &filled, None).await
}
