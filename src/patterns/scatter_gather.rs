//! Pattern: distribute distinct work items across agents and gather
//! results back in input order.

use crate::pool::protocol::ProtocolAdapter;
use crate::pool::{Pool, Response};

/// Send `prompts[i]` to agent `i mod pool.len()`, gathering responses in
/// input order. Wraps round-robin when there are more prompts than
/// agents.
pub async fn scatter_gather<A: ProtocolAdapter>(
    pool: &Pool<A>,
    prompts: &[String],
) -> Vec<Response> {
    pool.send_all(prompts).await
}

/// Format `prompt_template`'s `{item}` placeholder with each of `items`
/// (via `Display`) and scatter the resulting prompts.
pub async fn map_gather<A: ProtocolAdapter, T: std::fmt::Display>(
    pool: &Pool<A>,
    items: &[T],
    prompt_template: &str,
) -> Vec<Response> {
    let prompts: Vec<String> = items
        .iter()
        .map(|item| prompt_template.replace("{item}", &item.to_string()))
        .collect();
    scatter_gather(pool, &prompts).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_template_substitution() {
        let filled = "summarize {item}".replace("{item}", &42.to_string());
        assert_eq!(filled, "summarize 42");
    }
}
