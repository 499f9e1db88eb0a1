//! Pattern: hierarchical tree-reduce.
//!
//! Leaf agents produce initial responses (either a broadcast prompt, or
//! one item per agent round-robin). Groups of `fanin` responses are then
//! fed to supervisor agents that summarize them, recursively, until a
//! single response remains.

use crate::pool::protocol::ProtocolAdapter;
use crate::pool::{Pool, Response};

/// Run a hierarchical tree-reduce over `pool`.
///
/// `prompt` is the leaf-level task; when `items` is given it should
/// contain an `{item}` placeholder and one prompt is built per item,
/// scattered round-robin across agents. When `items` is `None`, `prompt`
/// is broadcast unchanged to every agent.
///
/// `reduce_prompt` is the supervisor summarization template; it must
/// contain `{responses}` and may contain `{level}`. `fanin` controls how
/// many responses each supervisor call handles per group.
pub async fn tree_reduce<A: ProtocolAdapter>(
    pool: &Pool<A>,
    prompt: &str,
    reduce_prompt: &str,
    fanin: usize,
    items: Option<&[String]>,
) -> Response {
    let leaf_responses = match items {
        Some(items) => {
            let leaf_prompts: Vec<String> = items
                .iter()
                .map(|item| prompt.replace("{item}", item))
                .collect();
            pool.send_all(&leaf_prompts).await
        }
        None => pool.broadcast(prompt).await,
    };

    let mut current: Vec<String> = leaf_responses
        .into_iter()
        .filter(|r| r.success)
        .map(|r| r.text)
        .collect();

    if current.is_empty() {
        return Response::failure("no successful leaf responses");
    }

    let mut level = 1usize;
    while current.len() > 1 {
        let supervisor_prompts: Vec<String> = current
            .chunks(fanin.max(1))
            .map(|group| {
                let combined = group.join("\n---\n");
                reduce_prompt
                    .replace("{responses}", &combined)
                    .replace("{level}", &level.to_string())
            })
            .collect();

        let sup_responses = pool.send_all(&supervisor_prompts).await;
        current = sup_responses
            .into_iter()
            .filter(|r| r.success)
            .map(|r| r.text)
            .collect();
        level += 1;
    }

    match current.into_iter().next() {
        Some(text) => Response::success(text),
        None => Response::failure("all agents failed during tree-reduce"),
    }
}
