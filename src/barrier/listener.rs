use std::sync::Arc;

use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    error::FrameError,
    message::{codec, MessageKind},
    router::Router,
    topology::ClusterId,
};

/// Takes over the listening socket once the barrier is passed, and hands every message
/// arriving from a peer cluster to the [Router] for local delivery.
pub struct NetworkListener;

impl NetworkListener {
    /// Runs until the process exits
    pub fn spawn(listener: TcpListener, router: Arc<Router>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::debug!("accepted a connection from {}", peer);
                        tokio::spawn(serve_connection(stream, Arc::clone(&router), None));
                    }
                    Err(e) => log::warn!("failed to accept a connection: {}", e),
                }
            }
        })
    }
}

/// Reads frames from one inbound connection until it is closed.
///
/// Ready messages go to `ready` while the barrier is still waiting; every other message is
/// delivered to the local node named by its receiver id. Messages that cannot be decoded
/// or delivered are logged and skipped.
pub(crate) async fn serve_connection(
    mut stream: TcpStream,
    router: Arc<Router>,
    ready: Option<mpsc::UnboundedSender<ClusterId>>,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown peer".to_owned());
    let max_frame_size = router.settings().max_frame_size;

    loop {
        let text = match codec::read_frame(&mut stream, max_frame_size).await {
            Ok(text) => text,
            Err(FrameError::Closed) => {
                log::debug!("connection from {} closed", peer);
                break;
            }
            Err(e) => {
                log::warn!("dropping connection from {}: {}", peer, e);
                break;
            }
        };
        let message = match codec::decode(&text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("skipping a frame from {}: {}", peer, e);
                continue;
            }
        };

        if message.kind() == Some(MessageKind::Ready) {
            match (message.sending_cluster(), &ready) {
                (Some(cluster), Some(ready)) => {
                    if ready.send(cluster).is_err() {
                        log::debug!("Ready from {} arrived after the barrier", peer);
                    }
                }
                (Some(cluster), None) => {
                    log::debug!("Ready from {} arrived after the barrier", cluster)
                }
                (None, _) => log::warn!("Ready from {} does not name its cluster", peer),
            }
            continue;
        }

        match message.receiver() {
            Some(node) => {
                if let Err(e) = router.deliver_local(node, &message) {
                    log::warn!("cannot deliver a message from {}: {}", peer, e);
                }
            }
            None => log::warn!("message from {} has no receiver", peer),
        }
    }
}
