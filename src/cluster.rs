use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    algorithm::AlgorithmFactory,
    error::{Error, NodeError},
    message::Message,
    node::{NodeId, NodeOutcome, NodeRuntime},
    output::{Event, EventSink},
    router::Router,
    topology::{ClusterId, Topology},
};

/// What a cluster reports once all of its nodes are done
#[derive(Debug)]
pub struct WorkReport {
    pub cluster: ClusterId,
    pub elapsed: Duration,
    pub outcomes: BTreeMap<NodeId, NodeOutcome>,
    /// Nodes that stopped early. They never take other nodes down with them.
    pub failures: BTreeMap<NodeId, NodeError>,
}

impl WorkReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the nodes of the running cluster, starts them, and waits for all of them to finish
pub struct ClusterCoordinator {
    cluster: ClusterId,
    router: Arc<Router>,
    nodes: Vec<NodeRuntime>,
    sink: Arc<dyn EventSink>,
}

impl ClusterCoordinator {
    /// Spawns a [NodeRuntime] for every node of the running cluster. The nodes stay idle
    /// until [ClusterCoordinator::start_work] sends them the Start message.
    pub fn new(
        topology: &Topology,
        router: Arc<Router>,
        max_rounds: u32,
        algorithms: &AlgorithmFactory,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let nodes = topology
            .self_cluster()
            .nodes
            .iter()
            .map(|(id, descriptor)| {
                NodeRuntime::spawn(
                    *id,
                    descriptor,
                    max_rounds,
                    algorithms(*id),
                    Arc::clone(&router),
                    Arc::clone(&sink),
                )
            })
            .collect();
        Self {
            cluster: topology.self_cluster_id().clone(),
            router,
            nodes,
            sink,
        }
    }

    pub fn local_nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(NodeRuntime::id).collect()
    }

    /// Sends Start to every local node through the [Router], the same way any other message
    /// travels, then waits for every node to finish.
    pub async fn start_work(self) -> Result<WorkReport, Error> {
        let started = Instant::now();
        log::info!(
            "cluster {} starts {} nodes",
            self.cluster,
            self.nodes.len()
        );
        for node in &self.nodes {
            self.router.route(node.id(), Message::start()).await?;
        }

        let mut outcomes = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for node in self.nodes {
            let id = node.id();
            match node.join().await {
                Ok(outcome) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => {
                    log::error!("node {} failed: {}", id, e);
                    failures.insert(id, e);
                }
            }
        }

        let elapsed = started.elapsed();
        log::info!(
            "cluster {} completed its work in {:?} ({} nodes failed)",
            self.cluster,
            elapsed,
            failures.len()
        );
        self.sink.emit(Event::WorkComplete {
            cluster: self.cluster.clone(),
            elapsed,
        });
        Ok(WorkReport {
            cluster: self.cluster,
            elapsed,
            outcomes,
            failures,
        })
    }
}
