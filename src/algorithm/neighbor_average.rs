use super::{Algorithm, RoundProgress};
use crate::{message::Message, node::NodeContext};

/// Every round, replaces a variable with the average of the neighbors' values of that
/// variable at the beginning of the round.
pub struct NeighborAverage {
    key: String,
    received: Vec<f64>,
}

impl NeighborAverage {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            received: Vec::new(),
        }
    }
}

impl Algorithm for NeighborAverage {
    fn on_start(&mut self, context: &mut NodeContext<'_>) -> RoundProgress {
        self.received.clear();
        if context.neighbors().is_empty() {
            return RoundProgress::Complete;
        }
        let value = context.get(&self.key).unwrap_or(0.0);
        context.send_to_neighbors(&self.key, value);
        RoundProgress::Pending
    }

    fn on_response(&mut self, context: &mut NodeContext<'_>, message: &Message) -> RoundProgress {
        let Some(value) = message.parse::<f64>(&self.key) else {
            log::warn!(
                "node {} ignored a response without a numeric {:?}",
                context.id(),
                self.key
            );
            return RoundProgress::Pending;
        };
        self.received.push(value);
        if self.received.len() < context.neighbors().len() {
            return RoundProgress::Pending;
        }

        let average = self.received.iter().sum::<f64>() / self.received.len() as f64;
        context.set(&self.key, average);
        self.received.clear();
        RoundProgress::Complete
    }
}
