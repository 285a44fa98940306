use tokio::sync::mpsc;

use crate::message::Message;

/// Creates the round buffer of a node: one FIFO queue per round in `0..max_rounds`.
///
/// The buffer reorders asynchronously arriving messages into round order. A fast
/// neighbor may already send round `r + 1` traffic while this node still consumes
/// round `r`; that traffic waits in its own queue instead of being mistaken for
/// round `r` data.
///
/// The [writer](RoundWriter) belongs to the node's inbox task and the
/// [reader](RoundReader) to its main task, so each queue has exactly one producer
/// and one consumer.
pub fn round_buffer(max_rounds: u32) -> (RoundWriter, RoundReader) {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..max_rounds).map(|_| mpsc::unbounded_channel()).unzip();
    (
        RoundWriter { queues: senders },
        RoundReader { queues: receivers },
    )
}

pub struct RoundWriter {
    queues: Vec<mpsc::UnboundedSender<Message>>,
}

impl RoundWriter {
    /// Number of rounds the buffer holds
    pub fn horizon(&self) -> u32 {
        self.queues.len() as u32
    }

    /// Appends `message` to the queue of `round`.
    /// Returns `false` when the round is beyond the horizon or the reader is gone.
    pub fn push(&self, round: u32, message: Message) -> bool {
        match self.queues.get(round as usize) {
            Some(queue) => queue.send(message).is_ok(),
            None => false,
        }
    }
}

pub struct RoundReader {
    queues: Vec<mpsc::UnboundedReceiver<Message>>,
}

impl RoundReader {
    pub fn horizon(&self) -> u32 {
        self.queues.len() as u32
    }

    /// Waits for the next message of `round`.
    /// Returns `None` for rounds beyond the horizon, or once the writer is gone and the queue is drained.
    pub async fn take(&mut self, round: u32) -> Option<Message> {
        self.queues.get_mut(round as usize)?.recv().await
    }

    /// Returns the next message of `round` if one is already buffered
    pub fn try_take(&mut self, round: u32) -> Option<Message> {
        self.queues.get_mut(round as usize)?.try_recv().ok()
    }
}
