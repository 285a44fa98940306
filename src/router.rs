use std::{collections::HashMap, time::Duration};

use tokio::sync::{mpsc, Mutex};

use self::connection_cache::ConnectionCache;
use crate::{
    error::RouteError,
    message::{
        codec::{self, DEFAULT_MAX_FRAME_SIZE},
        Message, RECEIVER_KEY, SENDING_CLUSTER_KEY,
    },
    node::NodeId,
    topology::{ClusterAddress, ClusterId, Topology},
};

mod connection_cache;

/// Transport knobs shared by every remote send
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    /// Pause between two attempts to reach an unreachable peer
    pub retry_backoff: Duration,
    pub max_frame_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// The inbound queue of one local node: many producers, a single consumer.
struct LocalQueue {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl LocalQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

/// The [Router] delivers messages to nodes, wherever they run.
///
/// Messages addressed to a node of the running cluster are encoded and appended to that
/// node's queue. Messages addressed to a node of another cluster are annotated with the
/// sending cluster and written as one frame on a cached connection to the owning cluster.
///
/// Routing tables are computed once from the [Topology] and never change afterwards.
pub struct Router {
    self_cluster: ClusterId,
    local_index: HashMap<NodeId, usize>,
    local_queues: Vec<LocalQueue>,
    remote_owners: HashMap<NodeId, ClusterId>,
    cluster_addresses: HashMap<ClusterId, ClusterAddress>,
    connections: ConnectionCache,
    settings: TransportSettings,
}

impl Router {
    pub fn new(topology: &Topology, settings: TransportSettings) -> Self {
        let self_cluster = topology.self_cluster_id().clone();

        let mut local_index = HashMap::new();
        let mut local_queues = Vec::new();
        for node in topology.self_cluster().nodes.keys() {
            local_index.insert(*node, local_queues.len());
            local_queues.push(LocalQueue::new());
        }

        let mut remote_owners = HashMap::new();
        let mut cluster_addresses = HashMap::new();
        for cluster in topology.peers() {
            cluster_addresses.insert(cluster.id.clone(), cluster.address.clone());
            for node in cluster.nodes.keys() {
                remote_owners.insert(*node, cluster.id.clone());
            }
        }

        Self {
            self_cluster,
            local_index,
            local_queues,
            remote_owners,
            cluster_addresses,
            connections: ConnectionCache::new(settings.retry_backoff, settings.max_frame_size),
            settings,
        }
    }

    pub fn self_cluster(&self) -> &ClusterId {
        &self.self_cluster
    }

    pub fn settings(&self) -> TransportSettings {
        self.settings
    }

    pub fn is_local(&self, node: NodeId) -> bool {
        self.local_index.contains_key(&node)
    }

    /// Delivers `message` to `destination`, tagging it with the receiver id.
    ///
    /// Remote deliveries wait until the frame is written, retrying indefinitely while the
    /// owning cluster is unreachable.
    pub async fn route(&self, destination: NodeId, mut message: Message) -> Result<(), RouteError> {
        message.insert(RECEIVER_KEY, destination);
        if self.is_local(destination) {
            return self.enqueue(destination, &message);
        }
        let cluster = self
            .remote_owners
            .get(&destination)
            .ok_or(RouteError::UnknownNode(destination))?;
        log::debug!("routing message for node {} to cluster {}", destination, cluster);
        self.send_to_cluster(cluster, message).await
    }

    /// Writes `message` to a peer cluster, annotated with the running cluster's id
    pub async fn send_to_cluster(
        &self,
        cluster: &ClusterId,
        mut message: Message,
    ) -> Result<(), RouteError> {
        let address = self
            .cluster_addresses
            .get(cluster)
            .ok_or_else(|| RouteError::UnknownCluster(cluster.clone()))?;
        message.insert(SENDING_CLUSTER_KEY, &self.self_cluster);
        self.connections
            .send(cluster, address, &codec::encode(&message))
            .await?;
        Ok(())
    }

    /// Enqueues a message that arrived from another cluster. Never forwards it further.
    pub fn deliver_local(&self, destination: NodeId, message: &Message) -> Result<(), RouteError> {
        if self.is_local(destination) {
            self.enqueue(destination, message)
        } else if self.remote_owners.contains_key(&destination) {
            Err(RouteError::NotLocal(destination))
        } else {
            Err(RouteError::UnknownNode(destination))
        }
    }

    /// Waits for the next raw message addressed to a local node.
    /// Only that node's inbox task is expected to call this.
    pub async fn receive(&self, node: NodeId) -> Result<String, RouteError> {
        let queue = self.queue(node)?;
        let mut receiver = queue.receiver.lock().await;
        receiver.recv().await.ok_or(RouteError::QueueClosed(node))
    }

    fn enqueue(&self, destination: NodeId, message: &Message) -> Result<(), RouteError> {
        self.queue(destination)?
            .sender
            .send(codec::encode(message))
            .map_err(|_| RouteError::QueueClosed(destination))
    }

    fn queue(&self, node: NodeId) -> Result<&LocalQueue, RouteError> {
        match self.local_index.get(&node) {
            Some(index) => Ok(&self.local_queues[*index]),
            None if self.remote_owners.contains_key(&node) => Err(RouteError::NotLocal(node)),
            None => Err(RouteError::UnknownNode(node)),
        }
    }
}
