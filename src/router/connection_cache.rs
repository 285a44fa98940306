use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{net::TcpStream, sync::Mutex};

use crate::{
    error::FrameError,
    message::codec::write_frame,
    topology::{ClusterAddress, ClusterId},
};

/// One outbound connection slot per destination cluster.
/// The slot's mutex serializes every writer addressing that cluster.
type Slot = Arc<Mutex<Option<TcpStream>>>;

/// Caches outbound connections so they are reused between sends to the same cluster.
///
/// Connecting and writing never give up: failures are logged and retried after a fixed
/// backoff, so an unreachable peer stalls the sender until it comes back.
pub(crate) struct ConnectionCache {
    open_connections: Mutex<HashMap<ClusterId, Slot>>,
    retry_backoff: Duration,
    max_frame_size: usize,
}

impl ConnectionCache {
    pub(crate) fn new(retry_backoff: Duration, max_frame_size: usize) -> Self {
        Self {
            open_connections: Mutex::new(HashMap::new()),
            retry_backoff,
            max_frame_size,
        }
    }

    async fn slot(&self, cluster: &ClusterId) -> Slot {
        let mut guard = self.open_connections.lock().await;
        Arc::clone(guard.entry(cluster.clone()).or_default())
    }

    /// Writes `text` as one frame to `cluster`, opening the connection first if needed.
    /// Only frames that can never be sent (empty or oversized) are reported as errors.
    pub(crate) async fn send(
        &self,
        cluster: &ClusterId,
        address: &ClusterAddress,
        text: &str,
    ) -> Result<(), FrameError> {
        let slot = self.slot(cluster).await;
        let mut connection = slot.lock().await;
        let mut attempt: u64 = 0;
        loop {
            let mut stream = match connection.take() {
                Some(stream) => stream,
                None => self.connect(cluster, address).await,
            };
            match write_frame(&mut stream, text, self.max_frame_size).await {
                Ok(()) => {
                    *connection = Some(stream);
                    return Ok(());
                }
                Err(e @ (FrameError::Empty | FrameError::TooLarge(_))) => {
                    *connection = Some(stream);
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    log::warn!(
                        "write to cluster {} at {} failed (attempt {}): {}",
                        cluster,
                        address,
                        attempt,
                        e
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    async fn connect(&self, cluster: &ClusterId, address: &ClusterAddress) -> TcpStream {
        let mut attempt: u64 = 0;
        loop {
            match TcpStream::connect((address.host.as_str(), address.port)).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("unable to disable Nagle on {}: {}", address, e);
                    }
                    log::debug!("connected to cluster {} at {}", cluster, address);
                    return stream;
                }
                Err(e) => {
                    attempt += 1;
                    log::warn!(
                        "unable to connect to cluster {} at {} (attempt {}): {}",
                        cluster,
                        address,
                        attempt,
                        e
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }
}
