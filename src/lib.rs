//! Lockstep simulates round-based distributed algorithms.
//!
//! Nodes are grouped into clusters. Every cluster runs in its own process, listens on its own
//! socket, and talks to the other clusters exclusively by message passing. Within a cluster,
//! each node runs its [Algorithm](algorithm::Algorithm) one round at a time: messages sent
//! during round `r` are only ever consumed by their receiver during its round `r`, however
//! they are delayed or reordered on the way.
//!
//! A [Simulation] wires the pieces together for the running cluster:
//! load the [Topology](topology::Topology), build the [Router](router::Router), pass the
//! [BarrierProtocol](barrier::BarrierProtocol) with every peer cluster, then let the
//! [ClusterCoordinator](cluster::ClusterCoordinator) start the local nodes and wait for them.

use std::sync::Arc;

use tokio::net::TcpListener;

use algorithm::AlgorithmFactory;
use barrier::{BarrierProtocol, NetworkListener};
use cluster::{ClusterCoordinator, WorkReport};
use error::Error;
use output::{Event, EventSink};
use router::{Router, TransportSettings};
use topology::Topology;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod builder;

pub mod algorithm;
pub mod barrier;
pub mod cluster;
pub mod error;
pub mod message;
pub mod node;
pub mod output;
pub mod router;
pub mod topology;

#[cfg(test)]
mod testing;

pub use self::builder::*;

/// The running cluster's share of a simulation
pub struct Simulation {
    topology: Topology,
    algorithms: AlgorithmFactory,
    max_rounds: u32,
    transport: TransportSettings,
    listener: Option<TcpListener>,
    sink: Arc<dyn EventSink>,
}

impl Simulation {
    pub fn builder(topology: Topology, algorithms: AlgorithmFactory) -> SimulationBuilder {
        SimulationBuilder::new(topology, algorithms)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Runs the running cluster's nodes to completion.
    ///
    /// Failing to bind the listening socket aborts before any node starts. Once the barrier
    /// is passed, failures are confined to the node they happen on and are listed in the
    /// returned [WorkReport].
    pub async fn run(self) -> Result<WorkReport, Error> {
        for (node, neighbor) in self.topology.dangling_neighbors() {
            log::warn!("node {} lists neighbor {} which does not exist", node, neighbor);
        }
        let mismatches = self.topology.degree_mismatches();
        if !mismatches.is_empty() {
            log::warn!(
                "nodes {:?} are not listed as a neighbor by as many nodes as they list, rounds waiting for every neighbor may never complete",
                mismatches
            );
        }

        let cluster = self.topology.self_cluster_id().clone();
        let router = Arc::new(Router::new(&self.topology, self.transport));
        let listener = match self.listener {
            Some(listener) => listener,
            None => bind(&self.topology).await?,
        };

        let listener = BarrierProtocol::for_topology(&self.topology, Arc::clone(&router))
            .synchronize(listener)
            .await?;
        self.sink.emit(Event::ClusterReady {
            cluster: cluster.clone(),
        });
        NetworkListener::spawn(listener, Arc::clone(&router));

        let coordinator = ClusterCoordinator::new(
            &self.topology,
            router,
            self.max_rounds,
            &self.algorithms,
            self.sink,
        );
        log::info!(
            "cluster {} runs {} rounds on nodes {:?}",
            cluster,
            self.max_rounds,
            coordinator.local_nodes()
        );
        coordinator.start_work().await
    }
}

async fn bind(topology: &Topology) -> Result<TcpListener, Error> {
    let addr = format!("0.0.0.0:{}", topology.self_cluster().address.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
    log::info!("listening on {}", addr);
    Ok(listener)
}
