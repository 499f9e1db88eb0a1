//! Pattern: shared-state swarm. Agents collaborate through a mutable
//! workspace divided into named sections, running in rounds. Agent roles
//! are determined by the `role` hostfile tag: an agent with `role=critiques`
//! contributes to the `critiques` section and no other.

use crate::pool::protocol::ProtocolAdapter;
use crate::pool::Pool;
use std::collections::HashMap;

pub type BoardState = HashMap<String, Vec<String>>;

/// Shared-state workspace for multi-round agent collaboration.
pub struct Blackboard {
    sections: Vec<String>,
    board: BoardState,
    round: usize,
}

impl Blackboard {
    pub fn new(sections: Vec<String>) -> Self {
        let board = sections.iter().map(|s| (s.clone(), Vec::new())).collect();
        Blackboard {
            sections,
            board,
            round: 0,
        }
    }

    /// Current board contents.
    pub fn board(&self) -> &BoardState {
        &self.board
    }

    /// Number of completed rounds.
    pub fn round(&self) -> usize {
        self.round
    }

    /// A deep-cloned, serializable snapshot of `(round, board)`.
    pub fn snapshot(&self) -> (usize, BoardState) {
        (self.round, self.board.clone())
    }

    /// Run rounds until `max_rounds` or `convergence_fn` returns `true`.
    ///
    /// `prompt_fn(section, board)` builds the prompt sent to every agent
    /// tagged with that section's role, given the board as of the start of
    /// the round.
    pub async fn run<A, F, C>(&mut self, pool: &Pool<A>, max_rounds: usize, mut prompt_fn: F, mut convergence_fn: Option<C>)
    where
        A: ProtocolAdapter,
        F: FnMut(&str, &BoardState) -> String,
        C: FnMut(&BoardState) -> bool,
    {
        for _ in 0..max_rounds {
            for section in self.sections.clone() {
                let sub = pool.by_tag("role", &section);
                if sub.is_empty() {
                    continue;
                }

                let prompt = prompt_fn(&section, &self.board);
                let responses = sub.broadcast(&prompt).await;

                for r in responses.into_iter().filter(|r| r.success) {
                    self.board.get_mut(&section).expect("section always present").push(r.text);
                }
            }

            self.round += 1;

            if let Some(convergence_fn) = convergence_fn.as_mut() {
                if convergence_fn(&self.board) {
                    break;
                }
            }
        }
    }
}
