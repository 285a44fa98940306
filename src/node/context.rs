use std::collections::BTreeMap;

use super::NodeId;
use crate::{
    message::Message,
    output::{Event, EventSink},
};

/// What a node owns for the lifetime of its main task
pub(crate) struct NodeState {
    pub(crate) id: NodeId,
    pub(crate) round: u32,
    pub(crate) max_rounds: u32,
    pub(crate) neighbors: Vec<NodeId>,
    pub(crate) data: BTreeMap<String, f64>,
    pub(crate) started: bool,
}

/// The view of a node handed to an [Algorithm](crate::algorithm::Algorithm) hook.
///
/// Outgoing messages are tagged with the round current at the time of the call, and are
/// delivered once the hook returns.
pub struct NodeContext<'a> {
    state: &'a mut NodeState,
    outbox: &'a mut Vec<(NodeId, Message)>,
    sink: &'a dyn EventSink,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        state: &'a mut NodeState,
        outbox: &'a mut Vec<(NodeId, Message)>,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            state,
            outbox,
            sink,
        }
    }

    pub fn id(&self) -> NodeId {
        self.state.id
    }

    pub fn round(&self) -> u32 {
        self.state.round
    }

    pub fn max_rounds(&self) -> u32 {
        self.state.max_rounds
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.state.neighbors
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.state.data.get(key).copied()
    }

    /// Updates a state variable and reports the change to the event sink
    pub fn set(&mut self, key: &str, value: f64) {
        self.state.data.insert(key.to_owned(), value);
        self.sink.emit(Event::StateChanged {
            node: self.state.id,
            round: self.state.round,
            key: key.to_owned(),
            value,
        });
    }

    /// A Response message from this node, tagged with the current round
    pub fn response(&self) -> Message {
        Message::response(self.state.id, self.state.round)
    }

    pub fn send(&mut self, destination: NodeId, message: Message) {
        self.outbox.push((destination, message));
    }

    pub fn send_message_to_neighbors(&mut self, message: Message) {
        for neighbor in &self.state.neighbors {
            self.outbox.push((*neighbor, message.clone()));
        }
    }

    /// Sends a single key and value to every neighbor
    pub fn send_to_neighbors(&mut self, key: &str, value: impl ToString) {
        let message = self.response().with(key, value);
        self.send_message_to_neighbors(message);
    }
}
