use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;

use crate::{
    algorithm::AlgorithmFactory,
    output::{EventSink, NullSink},
    router::TransportSettings,
    topology::Topology,
    Simulation,
};

pub struct SimulationBuilder {
    topology: Topology,
    algorithms: AlgorithmFactory,
    max_rounds: u32,
    transport: TransportSettings,
    listener: Option<TcpListener>,
    sink: Arc<dyn EventSink>,
}

impl SimulationBuilder {
    pub fn new(topology: Topology, algorithms: AlgorithmFactory) -> Self {
        Self {
            topology,
            algorithms,
            max_rounds: 1000,
            transport: TransportSettings::default(),
            listener: None,
            sink: Arc::new(NullSink),
        }
    }
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.transport.retry_backoff = backoff;
        self
    }
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.transport.max_frame_size = max_frame_size;
        self
    }
    /// Uses an already bound socket instead of binding the running cluster's configured port
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
    pub fn build(self) -> Simulation {
        Simulation {
            topology: self.topology,
            algorithms: self.algorithms,
            max_rounds: self.max_rounds,
            transport: self.transport,
            listener: self.listener,
            sink: self.sink,
        }
    }
}
