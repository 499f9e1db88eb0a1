//! Pattern: broadcast the same prompt to every agent, optionally followed
//! by a one-agent reduction step over the gathered responses.

use crate::pool::protocol::ProtocolAdapter;
use crate::pool::{Pool, Response};

/// Send `prompt` to every agent in `pool`, returning responses in agent
/// order.
pub async fn broadcast<A: ProtocolAdapter>(pool: &Pool<A>, prompt: &str) -> Vec<Response> {
    pool.broadcast(prompt).await
}

/// Broadcast `prompt`, then feed the successful responses (joined with
/// `\n---\n`) into `reduce_prompt`'s `{responses}` placeholder and send the
/// result to agent `reducer_agent_index`.
pub async fn broadcast_and_reduce<A: ProtocolAdapter>(
    pool: &Pool<A>,
    prompt: &str,
    reduce_prompt: &str,
    reducer_agent_index: usize,
) -> Response {
    let responses = pool.broadcast(prompt).await;
    let combined = responses
        .iter()
        .filter(|r| r.success)
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    let filled = reduce_prompt.replace("{responses}", &combined);
    pool.send(reducer_agent_index, &filled, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostfile::Endpoint;
    use crate::pool::protocol::SimpleGenerateAdapter;
    use crate::pool::PoolConfig;

    #[test]
    fn test_broadcast_and_reduce_template_substitution() {
        let combined = "a\n---\nb";
        let filled = "summarize: {responses}".replace("{responses}", combined);
        assert_eq!(filled, "summarize: a\n---\nb");
    }

    #[test]
    fn test_pool_construction_for_pattern_tests() {
        let eps = vec![Endpoint::new("h0", 8000), Endpoint::new("h1", 8000)];
        let pool = Pool::new(eps, PoolConfig::default(), SimpleGenerateAdapter).unwrap();
        assert_eq!(pool.len(), 2);
    }
}
