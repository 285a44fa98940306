use std::{collections::BTreeSet, sync::Arc};

use tokio::{net::TcpListener, select, sync::mpsc, task::JoinSet};
use tokio_stream::{wrappers::TcpListenerStream, StreamExt};

use crate::{
    error::BarrierError,
    message::Message,
    router::Router,
    topology::{ClusterId, Topology},
};

mod listener;

pub use self::listener::NetworkListener;
use self::listener::serve_connection;

/// Makes sure every cluster of the topology is live before any node starts.
///
/// Each cluster broadcasts a Ready message to all of its peers and, on its own listening
/// socket, waits until it has heard Ready from each of them. The listener is then handed
/// back to the caller so it can be moved into a [NetworkListener].
pub struct BarrierProtocol {
    router: Arc<Router>,
    peers: BTreeSet<ClusterId>,
}

impl BarrierProtocol {
    pub fn new(router: Arc<Router>, peers: BTreeSet<ClusterId>) -> Self {
        Self { router, peers }
    }

    /// Expects Ready from every cluster of `topology` except the running one
    pub fn for_topology(topology: &Topology, router: Arc<Router>) -> Self {
        Self::new(router, topology.peers().map(|c| c.id.clone()).collect())
    }

    /// Runs the barrier on `listener` and returns it once every peer is ready and this
    /// cluster's own Ready has been delivered to every peer.
    ///
    /// There is no timeout: a peer that never comes up stalls the barrier forever.
    pub async fn synchronize(self, listener: TcpListener) -> Result<TcpListener, BarrierError> {
        log::info!(
            "cluster {} waits for {} peers",
            self.router.self_cluster(),
            self.peers.len()
        );
        let waiting = tokio::spawn(wait_for_peers(
            listener,
            Arc::clone(&self.router),
            self.peers.clone(),
        ));
        self.broadcast_ready().await?;
        let listener = waiting.await?;
        log::info!("all peers of cluster {} are ready", self.router.self_cluster());
        Ok(listener)
    }

    async fn broadcast_ready(&self) -> Result<(), BarrierError> {
        let mut sends = JoinSet::new();
        for peer in &self.peers {
            let router = Arc::clone(&self.router);
            let peer = peer.clone();
            sends.spawn(async move {
                let ready = Message::ready(router.self_cluster());
                router.send_to_cluster(&peer, ready).await
            });
        }
        while let Some(sent) = sends.join_next().await {
            sent??;
        }
        Ok(())
    }
}

/// Accepts connections until a Ready has been received from every expected peer.
/// Connections accepted here keep being served after the listener is returned.
async fn wait_for_peers(
    listener: TcpListener,
    router: Arc<Router>,
    mut pending: BTreeSet<ClusterId>,
) -> TcpListener {
    let (ready_sender, mut ready_receiver) = mpsc::unbounded_channel();
    let mut incoming = TcpListenerStream::new(listener);

    while !pending.is_empty() {
        select! {
            Some(connection) = incoming.next() => match connection {
                Ok(stream) => {
                    tokio::spawn(serve_connection(
                        stream,
                        Arc::clone(&router),
                        Some(ready_sender.clone()),
                    ));
                }
                Err(e) => log::warn!("failed to accept a connection: {}", e),
            },
            Some(cluster) = ready_receiver.recv() => {
                if pending.remove(&cluster) {
                    log::info!("cluster {} is ready, {} peers remaining", cluster, pending.len());
                } else {
                    log::warn!("ignoring Ready from unexpected or already ready cluster {}", cluster);
                }
            }
        }
    }

    incoming.into_inner()
}

#[cfg(test)]
mod tests;
