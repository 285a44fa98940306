//! Helpers shared by the unit tests of several modules.

use std::{collections::BTreeMap, sync::Mutex, time::Duration};

use tokio::net::TcpListener;

use crate::{
    message::Message,
    node::{NodeContext, NodeId, NodeState},
    output::{Event, EventSink},
    router::TransportSettings,
    topology::{ClusterAddress, ClusterDescriptor, ClusterId, NodeDescriptor, Topology},
};

/// Keeps every event in memory
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Describes a cluster from `(node, neighbors, x)` triples
pub(crate) fn cluster(
    id: &str,
    is_self: bool,
    port: u16,
    nodes: &[(u32, &[u32], f64)],
) -> ClusterDescriptor {
    ClusterDescriptor {
        id: ClusterId::new(id),
        is_self,
        address: ClusterAddress::new("127.0.0.1", port),
        nodes: nodes
            .iter()
            .map(|(id, neighbors, x)| {
                (
                    NodeId::new(*id),
                    NodeDescriptor {
                        neighbors: neighbors.iter().copied().map(NodeId::new).collect(),
                        initial_state: BTreeMap::from([("x".to_owned(), *x)]),
                    },
                )
            })
            .collect(),
    }
}

pub(crate) fn topology(clusters: Vec<ClusterDescriptor>) -> Topology {
    Topology::from_clusters(clusters).unwrap()
}

/// The same clusters as seen from the process running `self_id`
pub(crate) fn topology_as(clusters: &[ClusterDescriptor], self_id: &str) -> Topology {
    topology(
        clusters
            .iter()
            .cloned()
            .map(|mut c| {
                c.is_self = c.id.as_str() == self_id;
                c
            })
            .collect(),
    )
}

pub(crate) async fn bind_local() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub(crate) fn fast_transport() -> TransportSettings {
    TransportSettings {
        retry_backoff: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Owns everything a [NodeContext] borrows, so algorithm hooks can be called directly
pub(crate) struct ContextHarness {
    pub(crate) state: NodeState,
    pub(crate) outbox: Vec<(NodeId, Message)>,
    pub(crate) sink: RecordingSink,
}

impl ContextHarness {
    pub(crate) fn new(id: u32, neighbors: &[u32], data: &[(&str, f64)]) -> Self {
        Self {
            state: NodeState {
                id: NodeId::new(id),
                round: 0,
                max_rounds: 10,
                neighbors: neighbors.iter().copied().map(NodeId::new).collect(),
                data: data.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                started: true,
            },
            outbox: Vec::new(),
            sink: RecordingSink::default(),
        }
    }

    pub(crate) fn context(&mut self) -> NodeContext<'_> {
        NodeContext::new(&mut self.state, &mut self.outbox, &self.sink)
    }

    /// Empties the outbox
    pub(crate) fn sent(&mut self) -> Vec<(NodeId, Message)> {
        std::mem::take(&mut self.outbox)
    }
}
