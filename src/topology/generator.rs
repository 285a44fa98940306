//! Builds regular topologies, mostly useful to produce input documents for experiments.

use std::collections::BTreeMap;

use super::{ClusterAddress, ClusterDescriptor, ClusterId, NodeDescriptor, Topology};
use crate::{error::TopologyError, node::NodeId};

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub nodes: u32,
    /// Number of neighbors of every node. Node `i` is linked to `i+1 .. i+neighbors` (mod nodes).
    pub neighbors: u32,
    pub clusters: u32,
    pub variables: Vec<String>,
    pub host: String,
    pub base_port: u16,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            nodes: 5,
            neighbors: 2,
            clusters: 1,
            variables: vec!["x".to_owned()],
            host: "localhost".to_owned(),
            base_port: 2005,
        }
    }
}

/// Initial value of `variable` on `node`: `x` starts at `2 * node + 2`, everything else at 0.
pub fn initial_value(variable: &str, node: NodeId) -> f64 {
    if variable == "x" {
        f64::from(node.to_u32()) * 2.0 + 2.0
    } else {
        0.0
    }
}

/// Generates a circulant topology split into contiguous blocks of nodes, one per cluster.
/// `Cluster0` is marked as the running process' own cluster.
pub fn generate(options: &GeneratorOptions) -> Result<Topology, TopologyError> {
    let clusters = options.clusters.max(1);
    let per_cluster = (options.nodes + clusters - 1) / clusters;
    let neighbors = options.neighbors.min(options.nodes.saturating_sub(1));

    let mut descriptors = (0..clusters)
        .map(|c| -> Result<ClusterDescriptor, TopologyError> {
            let port = u16::try_from(c)
                .ok()
                .and_then(|c| options.base_port.checked_add(c))
                .ok_or(TopologyError::PortOutOfRange {
                    cluster: c,
                    base_port: options.base_port,
                })?;
            Ok(ClusterDescriptor {
                id: ClusterId::new(format!("Cluster{}", c)),
                is_self: c == 0,
                address: ClusterAddress::new(options.host.clone(), port),
                nodes: BTreeMap::new(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let last = descriptors.len() - 1;

    for i in 0..options.nodes {
        let id = NodeId::new(i);
        let node = NodeDescriptor {
            neighbors: (0..neighbors)
                .map(|j| NodeId::new((i + 1 + j) % options.nodes))
                .collect(),
            initial_state: options
                .variables
                .iter()
                .map(|v| (v.clone(), initial_value(v, id)))
                .collect(),
        };
        let cluster = (i / per_cluster.max(1)) as usize;
        descriptors[cluster.min(last)]
            .nodes
            .insert(id, node);
    }

    Topology::from_clusters(descriptors)
}
