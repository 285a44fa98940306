use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
    thread::JoinHandle,
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{node::NodeId, topology::ClusterId};

/// Observable things that happen while a simulation runs
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged {
        node: NodeId,
        round: u32,
        key: String,
        value: f64,
    },
    RoundCompleted {
        node: NodeId,
        round: u32,
    },
    NodeFinished {
        node: NodeId,
        rounds: u32,
    },
    ClusterReady {
        cluster: ClusterId,
    },
    WorkComplete {
        cluster: ClusterId,
        elapsed: Duration,
    },
}

/// Receives [events](Event) from the simulation. Implementations must not block the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Processes events on the [OutputWriter]'s worker thread
pub trait EventHandler: Send + 'static {
    fn handle(&mut self, event: Event);

    fn flush(&mut self) {}
}

/// Writes every event through the `log` facade
pub struct LogHandler;

impl EventHandler for LogHandler {
    fn handle(&mut self, event: Event) {
        match event {
            Event::StateChanged {
                node,
                round,
                key,
                value,
            } => log::debug!("round {} - node {} set {} to {}", round, node, key, value),
            Event::RoundCompleted { node, round } => {
                log::debug!("round {} - node {} completed the round", round, node)
            }
            Event::NodeFinished { node, rounds } => {
                log::info!("node {} finished after {} rounds", node, rounds)
            }
            Event::ClusterReady { cluster } => log::info!("cluster {} is ready", cluster),
            Event::WorkComplete { cluster, elapsed } => log::info!(
                "work complete on cluster {} in {:.3} seconds",
                cluster,
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Appends one `round,node,key,value` line per state change to a file, and forwards
/// every event to an inner handler.
pub struct CsvHandler<H: EventHandler = LogHandler> {
    out: BufWriter<File>,
    inner: H,
}

impl CsvHandler<LogHandler> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_inner(path, LogHandler)
    }
}

impl<H: EventHandler> CsvHandler<H> {
    pub fn with_inner(path: impl AsRef<Path>, inner: H) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            inner,
        })
    }
}

impl<H: EventHandler> EventHandler for CsvHandler<H> {
    fn handle(&mut self, event: Event) {
        if let Event::StateChanged {
            node,
            round,
            key,
            value,
        } = &event
        {
            if let Err(e) = writeln!(self.out, "{},{},{},{}", round, node, key, value) {
                log::warn!("unable to write state change to output file: {}", e);
            }
        }
        self.inner.handle(event);
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            log::warn!("unable to flush output file: {}", e);
        }
        self.inner.flush();
    }
}

/// An [EventSink] backed by its own queue and worker thread, so that nodes
/// never wait on console or file output.
pub struct OutputWriter {
    sender: mpsc::UnboundedSender<Option<Event>>,
    worker: JoinHandle<()>,
}

impl OutputWriter {
    pub fn spawn<H: EventHandler>(mut handler: H) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name("output-writer".to_owned())
            .spawn(move || {
                // `None` marks the end of the stream
                while let Some(Some(event)) = receiver.blocking_recv() {
                    handler.handle(event);
                }
                handler.flush();
            })?;
        Ok(Self { sender, worker })
    }

    /// Returns a cheap handle that can be shared with the simulation
    pub fn sink(&self) -> OutputSink {
        OutputSink {
            sender: self.sender.clone(),
        }
    }

    /// Waits for the worker to drain every event emitted so far and flushes the handler.
    /// Events emitted afterwards through [sinks](OutputSink) are dropped.
    pub fn shutdown(self) {
        let _ = self.sender.send(None);
        if self.worker.join().is_err() {
            log::error!("output writer thread panicked");
        }
    }
}

#[derive(Clone)]
pub struct OutputSink {
    sender: mpsc::UnboundedSender<Option<Event>>,
}

impl EventSink for OutputSink {
    fn emit(&self, event: Event) {
        // the worker is gone once the writer has been shut down
        let _ = self.sender.send(Some(event));
    }
}
