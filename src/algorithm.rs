//! The pluggable per-round behavior of a node.
//!
//! The runtime in [crate::node] owns the round counter, the round buffer and the delivery of
//! messages. An [Algorithm] only decides what a node does when a round begins and when a
//! response of the current round arrives, and tells the runtime when the round is over.

use std::sync::Arc;

use crate::{message::Message, node::NodeContext, node::NodeId};

mod neighbor_average;
mod stochastic_descent;

pub use self::{neighbor_average::NeighborAverage, stochastic_descent::StochasticDescent};

/// Whether the current round is over after a hook returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundProgress {
    Pending,
    /// The runtime moves on to the next round and calls [Algorithm::on_start] again
    Complete,
}

pub trait Algorithm: Send {
    /// Called when the node enters a round, starting with round 0 upon receiving Start
    fn on_start(&mut self, context: &mut NodeContext<'_>) -> RoundProgress;

    /// Called for every response tagged with the current round
    fn on_response(&mut self, context: &mut NodeContext<'_>, message: &Message)
        -> RoundProgress;
}

/// Creates the algorithm instance of each local node
pub type AlgorithmFactory = Arc<dyn Fn(NodeId) -> Box<dyn Algorithm> + Send + Sync>;

/// An [AlgorithmFactory] giving every node a [NeighborAverage] over `key`
pub fn neighbor_average(key: impl Into<String>) -> AlgorithmFactory {
    let key = key.into();
    Arc::new(move |_| -> Box<dyn Algorithm> {
        Box::new(NeighborAverage::new(key.clone()))
    })
}

/// An [AlgorithmFactory] giving every node a [StochasticDescent] toward its default target
pub fn stochastic_descent() -> AlgorithmFactory {
    Arc::new(|id| -> Box<dyn Algorithm> { Box::new(StochasticDescent::for_node(id)) })
}
