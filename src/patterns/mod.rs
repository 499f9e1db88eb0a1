//! Collective communication patterns built thinly over [`crate::pool::Pool`].
//!
//! Every pattern here is plain orchestration: select agents, dispatch
//! through `Pool::send`/`send_all`/`broadcast`, reassemble. None of them
//! hold state of their own except [`blackboard::Blackboard`], which
//! persists a shared workspace across rounds.

pub mod blackboard;
pub mod broadcast;
pub mod pipeline;
pub mod scatter_gather;
pub mod tree_reduce;

pub use blackboard::Blackboard;
pub use broadcast::{broadcast, broadcast_and_reduce};
pub use pipeline::{fan_out_fan_in, run_pipeline, Stage};
pub use scatter_gather::{map_gather, scatter_gather};
pub use tree_reduce::tree_reduce;
