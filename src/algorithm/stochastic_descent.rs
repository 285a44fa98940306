use super::{Algorithm, RoundProgress};
use crate::{
    message::Message,
    node::{NodeContext, NodeId},
};

const VALUE_KEY: &str = "x";
const STEP_KEY: &str = "t";
const CORRECTION_KEY: &str = "y";
const SHARED_KEY: &str = "xMinusy";

/// Distributed descent toward the average of the nodes' targets.
///
/// Every round a node does `t <- t + 1`, `y <- (x - target) / t`, sends `x - y` to its
/// neighbors, and once all of them answered sets `x` to the average of what it received.
pub struct StochasticDescent {
    target: f64,
    received: Vec<f64>,
}

impl StochasticDescent {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            received: Vec::new(),
        }
    }

    /// Targets `2 * id + 1`
    pub fn for_node(id: NodeId) -> Self {
        Self::new(2.0 * id.to_u32() as f64 + 1.0)
    }
}

impl Algorithm for StochasticDescent {
    fn on_start(&mut self, context: &mut NodeContext<'_>) -> RoundProgress {
        self.received.clear();

        let t = context.get(STEP_KEY).unwrap_or(0.0) + 1.0;
        let x = context.get(VALUE_KEY).unwrap_or(0.0);
        let y = (x - self.target) / t;
        context.set(STEP_KEY, t);
        context.set(CORRECTION_KEY, y);

        if context.neighbors().is_empty() {
            context.set(VALUE_KEY, x - y);
            return RoundProgress::Complete;
        }
        context.send_to_neighbors(SHARED_KEY, x - y);
        RoundProgress::Pending
    }

    fn on_response(&mut self, context: &mut NodeContext<'_>, message: &Message) -> RoundProgress {
        let Some(value) = message.parse::<f64>(SHARED_KEY) else {
            log::warn!(
                "node {} ignored a response without a numeric {:?}",
                context.id(),
                SHARED_KEY
            );
            return RoundProgress::Pending;
        };
        self.received.push(value);
        if self.received.len() < context.neighbors().len() {
            return RoundProgress::Pending;
        }

        let average = self.received.iter().sum::<f64>() / self.received.len() as f64;
        context.set(VALUE_KEY, average);
        self.received.clear();
        RoundProgress::Complete
    }
}
