use std::{
    collections::{BTreeMap, BTreeSet},
    convert::Infallible,
    fmt::Display,
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::{error::TopologyError, node::NodeId};

pub mod generator;

/// Identifies a cluster, i.e. one independently addressable group of nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// The endpoint a cluster listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterAddress {
    pub host: String,
    pub port: u16,
}

impl ClusterAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for ClusterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub neighbors: Vec<NodeId>,
    #[serde(default, rename = "data")]
    pub initial_state: BTreeMap<String, f64>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    #[serde(skip)]
    pub id: ClusterId,
    #[serde(rename = "isSelf", default)]
    pub is_self: bool,
    pub address: ClusterAddress,
    #[serde_as(as = "BTreeMap<PickFirst<(_, DisplayFromStr)>, _>")]
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeDescriptor>,
}

/// An immutable description of every cluster and node taking part in a simulation.
///
/// Exactly one cluster is marked as the running process' own cluster, and node ids
/// are unique across the whole topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    self_cluster: ClusterId,
    clusters: BTreeMap<ClusterId, ClusterDescriptor>,
    owners: BTreeMap<NodeId, ClusterId>,
}

impl Topology {
    /// Builds a topology from cluster descriptors, checking its invariants.
    pub fn from_clusters(
        clusters: impl IntoIterator<Item = ClusterDescriptor>,
    ) -> Result<Self, TopologyError> {
        let mut self_cluster: Option<ClusterId> = None;
        let mut owners = BTreeMap::new();
        let mut by_id = BTreeMap::new();

        for cluster in clusters {
            if cluster.is_self {
                if let Some(existing) = &self_cluster {
                    return Err(TopologyError::MultipleSelfClusters(
                        existing.clone(),
                        cluster.id.clone(),
                    ));
                }
                self_cluster = Some(cluster.id.clone());
            }
            for node in cluster.nodes.keys() {
                if let Some(first) = owners.insert(*node, cluster.id.clone()) {
                    return Err(TopologyError::DuplicateNode {
                        node: *node,
                        first,
                        second: cluster.id.clone(),
                    });
                }
            }
            by_id.insert(cluster.id.clone(), cluster);
        }

        let self_cluster = self_cluster.ok_or(TopologyError::NoSelfCluster)?;
        Ok(Self {
            self_cluster,
            clusters: by_id,
            owners,
        })
    }

    /// Parses a YAML document mapping cluster ids to cluster descriptors
    pub fn from_yaml_str(document: &str) -> Result<Self, TopologyError> {
        let clusters: BTreeMap<ClusterId, ClusterDescriptor> = serde_yaml::from_str(document)?;
        Self::from_clusters(clusters.into_iter().map(|(id, mut cluster)| {
            cluster.id = id;
            cluster
        }))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| TopologyError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&document)
    }

    pub fn to_yaml_string(&self) -> Result<String, TopologyError> {
        Ok(serde_yaml::to_string(&self.clusters)?)
    }

    pub fn self_cluster_id(&self) -> &ClusterId {
        &self.self_cluster
    }

    pub fn self_cluster(&self) -> &ClusterDescriptor {
        // from_clusters guarantees the self cluster is part of the map
        &self.clusters[&self.self_cluster]
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ClusterDescriptor> {
        self.clusters.values()
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<&ClusterDescriptor> {
        self.clusters.get(id)
    }

    /// All clusters except the running process' own
    pub fn peers(&self) -> impl Iterator<Item = &ClusterDescriptor> {
        self.clusters.values().filter(|c| !c.is_self)
    }

    pub fn owner_of(&self, node: NodeId) -> Option<&ClusterId> {
        self.owners.get(&node)
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeDescriptor> {
        self.owner_of(node)
            .and_then(|cluster| self.clusters.get(cluster))
            .and_then(|cluster| cluster.nodes.get(&node))
    }

    pub fn node_count(&self) -> usize {
        self.owners.len()
    }

    /// Neighbor links `(node, neighbor)` whose neighbor is not declared anywhere
    pub fn dangling_neighbors(&self) -> Vec<(NodeId, NodeId)> {
        self.links()
            .filter(|(_, neighbor)| !self.owners.contains_key(neighbor))
            .collect()
    }

    /// Nodes that are listed as a neighbor by a different number of nodes than
    /// they list themselves. Strategies that wait for one response per neighbor
    /// never complete a round on such nodes.
    pub fn degree_mismatches(&self) -> BTreeSet<NodeId> {
        let mut in_degree: BTreeMap<NodeId, usize> = BTreeMap::new();
        for (_, neighbor) in self.links() {
            *in_degree.entry(neighbor).or_default() += 1;
        }
        self.clusters
            .values()
            .flat_map(|c| c.nodes.iter())
            .filter(|(id, node)| in_degree.get(id).copied().unwrap_or(0) != node.neighbors.len())
            .map(|(id, _)| *id)
            .collect()
    }

    fn links(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.clusters.values().flat_map(|c| {
            c.nodes
                .iter()
                .flat_map(|(id, node)| node.neighbors.iter().map(move |n| (*id, *n)))
        })
    }
}
