use std::{collections::BTreeMap, sync::Arc};

use tokio::{sync::oneshot, task::JoinHandle};

use self::round_buffer::{round_buffer, RoundReader, RoundWriter};
use crate::{
    algorithm::{Algorithm, RoundProgress},
    error::NodeError,
    message::{codec, Message, MessageKind},
    output::{Event, EventSink},
    router::Router,
    topology::NodeDescriptor,
};

mod context;
pub mod round_buffer;

pub(crate) use self::context::NodeState;
pub use self::{context::NodeContext, id::NodeId};

pub mod id {
    use std::{fmt::Display, num::ParseIntError, str::FromStr};

    #[cfg(test)]
    use quickcheck::Arbitrary;
    use serde::{Deserialize, Serialize};

    /// A [NodeId] uniquely identifies a node across the whole topology, not just within its cluster
    #[repr(transparent)]
    #[derive(
        Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Debug, Hash, Default, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct NodeId(u32);

    impl NodeId {
        pub const fn new(id: u32) -> Self {
            Self(id)
        }

        pub fn to_u32(&self) -> u32 {
            self.0
        }
    }

    impl Display for NodeId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for NodeId {
        type Err = ParseIntError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            s.trim().parse().map(Self)
        }
    }

    #[cfg(test)]
    impl Arbitrary for NodeId {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            NodeId(u32::arbitrary(g))
        }
    }
}

/// What a node leaves behind once it has run all of its rounds
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub id: NodeId,
    pub rounds_completed: u32,
    pub state: BTreeMap<String, f64>,
}

/// A running node: an inbox task that sorts incoming messages by round, and a main
/// task that feeds one round at a time to the node's [Algorithm].
///
/// The node moves from "not started" to round 0 when it receives a Start message, and
/// from round `r` to `r + 1` when the algorithm reports the round complete. It finishes
/// once the round counter reaches `max_rounds`, so rounds span `0..max_rounds`.
pub struct NodeRuntime {
    id: NodeId,
    main: JoinHandle<Result<NodeOutcome, NodeError>>,
    inbox: JoinHandle<()>,
}

impl NodeRuntime {
    /// Spawns both tasks of a node. Must be called from within a Tokio runtime.
    pub fn spawn(
        id: NodeId,
        descriptor: &NodeDescriptor,
        max_rounds: u32,
        algorithm: Box<dyn Algorithm>,
        router: Arc<Router>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (writer, reader) = round_buffer(max_rounds);
        let (stop_sender, stop_receiver) = oneshot::channel();

        let inbox = tokio::spawn(run_inbox(id, Arc::clone(&router), writer, stop_receiver));

        let main_loop = MainLoop {
            state: NodeState {
                id,
                round: 0,
                max_rounds,
                neighbors: descriptor.neighbors.clone(),
                data: descriptor.initial_state.clone(),
                started: false,
            },
            algorithm,
            reader,
            router,
            sink,
            held_back: Vec::new(),
        };
        let main = tokio::spawn(main_loop.run(stop_sender));

        Self { id, main, inbox }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Waits for the node to finish. Failures, including a panicking algorithm, stay
    /// confined to this node.
    pub async fn join(self) -> Result<NodeOutcome, NodeError> {
        let result = match self.main.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(NodeError::Panicked(reason))
            }
            Err(_) => Err(NodeError::Cancelled(self.id)),
        };
        // the inbox stops as soon as the main task is gone
        if let Err(e) = self.inbox.await {
            log::error!("inbox of node {} failed: {}", self.id, e);
        }
        result
    }
}

/// Reads the node's raw queue and files every message under its declared round.
/// It never touches the node's state.
async fn run_inbox(
    id: NodeId,
    router: Arc<Router>,
    writer: RoundWriter,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let raw = tokio::select! {
            _ = &mut stop => break,
            raw = router.receive(id) => raw,
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("inbox of node {} cannot receive: {}", id, e);
                break;
            }
        };
        if let Some((round, message)) = classify(id, writer.horizon(), &raw) {
            if !writer.push(round, message) {
                log::debug!("node {} no longer consumes round {}", id, round);
            }
        }
    }
    log::debug!("inbox of node {} stopped", id);
}

/// Decodes a raw message and works out the round it belongs to.
/// Malformed messages and rounds outside `0..horizon` are logged and dropped.
pub(crate) fn classify(id: NodeId, horizon: u32, raw: &str) -> Option<(u32, Message)> {
    let message = match codec::decode(raw) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("node {} dropped a message: {}", id, e);
            return None;
        }
    };
    let round = match message.kind() {
        Some(MessageKind::Start) => message.round().unwrap_or(0),
        Some(MessageKind::Response) => match message.round() {
            Some(round) => round,
            None => {
                log::warn!("node {} dropped a response without a valid round tag", id);
                return None;
            }
        },
        other => {
            log::warn!("node {} dropped a message of unexpected type {:?}", id, other);
            return None;
        }
    };
    if round >= horizon {
        log::debug!(
            "node {} dropped a message for round {} beyond its last round",
            id,
            round
        );
        return None;
    }
    Some((round, message))
}

struct MainLoop {
    state: NodeState,
    algorithm: Box<dyn Algorithm>,
    reader: RoundReader,
    router: Arc<Router>,
    sink: Arc<dyn EventSink>,
    /// Responses that arrived before the Start message
    held_back: Vec<Message>,
}

impl MainLoop {
    async fn run(mut self, stop: oneshot::Sender<()>) -> Result<NodeOutcome, NodeError> {
        let result = self.run_rounds().await;
        let _ = stop.send(());
        if let Err(e) = &result {
            log::error!(
                "node {} stopped in round {}: {}",
                self.state.id,
                self.state.round,
                e
            );
        }
        result?;

        log::debug!("node {} finished", self.state.id);
        self.sink.emit(Event::NodeFinished {
            node: self.state.id,
            rounds: self.state.round,
        });
        Ok(NodeOutcome {
            id: self.state.id,
            rounds_completed: self.state.round,
            state: self.state.data,
        })
    }

    async fn run_rounds(&mut self) -> Result<(), NodeError> {
        while self.state.round < self.state.max_rounds {
            let message = self
                .reader
                .take(self.state.round)
                .await
                .ok_or(NodeError::InboxClosed(self.state.id))?;
            self.dispatch(message).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, message: Message) -> Result<(), NodeError> {
        match message.kind() {
            Some(MessageKind::Start) if self.state.started => {
                log::warn!("node {} ignored a second Start message", self.state.id);
            }
            Some(MessageKind::Start) => {
                log::debug!("node {} started", self.state.id);
                self.state.started = true;
                self.begin_rounds().await?;
                for message in std::mem::take(&mut self.held_back) {
                    self.respond(message).await?;
                }
            }
            Some(MessageKind::Response) if !self.state.started => self.held_back.push(message),
            Some(MessageKind::Response) => self.respond(message).await?,
            other => log::warn!(
                "node {} ignored a message of unexpected type {:?}",
                self.state.id,
                other
            ),
        }
        Ok(())
    }

    async fn respond(&mut self, message: Message) -> Result<(), NodeError> {
        if self.state.round >= self.state.max_rounds {
            return Ok(());
        }
        if message.round() != Some(self.state.round) {
            log::warn!(
                "node {} dropped a response for round {:?} while in round {}",
                self.state.id,
                message.round(),
                self.state.round
            );
            return Ok(());
        }

        let mut outbox = Vec::new();
        let progress = {
            let mut context = NodeContext::new(&mut self.state, &mut outbox, self.sink.as_ref());
            self.algorithm.on_response(&mut context, &message)
        };
        flush(&self.router, outbox).await?;

        if progress == RoundProgress::Complete {
            self.advance();
            self.begin_rounds().await?;
        }
        Ok(())
    }

    /// Opens the current round, and keeps opening rounds for as long as the
    /// algorithm completes them on the spot.
    async fn begin_rounds(&mut self) -> Result<(), NodeError> {
        while self.state.round < self.state.max_rounds {
            let mut outbox = Vec::new();
            let progress = {
                let mut context =
                    NodeContext::new(&mut self.state, &mut outbox, self.sink.as_ref());
                self.algorithm.on_start(&mut context)
            };
            flush(&self.router, outbox).await?;

            match progress {
                RoundProgress::Pending => break,
                RoundProgress::Complete => self.advance(),
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.sink.emit(Event::RoundCompleted {
            node: self.state.id,
            round: self.state.round,
        });
        self.state.round += 1;
    }
}

/// Routes what an algorithm sent. Borrows only the router so the main task stays `Send`
/// with an algorithm that is not `Sync`.
async fn flush(router: &Router, outbox: Vec<(NodeId, Message)>) -> Result<(), NodeError> {
    for (destination, message) in outbox {
        router.route(destination, message).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
