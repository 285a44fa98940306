use std::time::Duration;

use tokio::{net::TcpStream, task::JoinHandle, time::timeout};

use super::*;
use crate::{
    message::codec::{decode, encode, write_frame, DEFAULT_MAX_FRAME_SIZE},
    node::NodeId,
    router::Router,
    testing::{bind_local, cluster, fast_transport, topology_as},
};

struct Member {
    name: String,
    router: Arc<Router>,
    barrier: BarrierProtocol,
    listener: TcpListener,
}

impl Member {
    fn synchronize(self) -> JoinHandle<Result<TcpListener, BarrierError>> {
        tokio::spawn(self.barrier.synchronize(self.listener))
    }
}

/// One member per name, each owning node `index` and listening on its own port
async fn members(names: &[&str]) -> Vec<Member> {
    let mut listeners = Vec::new();
    let mut descriptors = Vec::new();
    for (index, name) in names.iter().enumerate() {
        let (listener, port) = bind_local().await;
        listeners.push(listener);
        descriptors.push(cluster(name, false, port, &[(index as u32, &[], 0.0)]));
    }
    names
        .iter()
        .zip(listeners)
        .map(|(name, listener)| {
            let topology = topology_as(&descriptors, name);
            let router = Arc::new(Router::new(&topology, fast_transport()));
            Member {
                name: name.to_string(),
                barrier: BarrierProtocol::for_topology(&topology, Arc::clone(&router)),
                router,
                listener,
            }
        })
        .collect()
}

#[tokio::test]
async fn no_cluster_passes_until_the_last_one_is_ready() {
    let mut members = members(&["A", "B", "C"]).await;
    let late = members.pop().unwrap();
    let early: Vec<_> = members.into_iter().map(Member::synchronize).collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        early.iter().all(|barrier| !barrier.is_finished()),
        "a cluster passed the barrier before C was ready"
    );

    let late = late.synchronize();
    for barrier in early.into_iter().chain([late]) {
        timeout(Duration::from_secs(5), barrier)
            .await
            .expect("barrier never completed")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn arrival_order_does_not_matter() {
    for order in [[0, 1, 2], [2, 0, 1], [1, 2, 0]] {
        let mut members: Vec<_> = members(&["A", "B", "C"]).await.into_iter().map(Some).collect();
        let mut barriers = Vec::new();
        for index in order {
            let member = members[index].take().unwrap();
            barriers.push(member.synchronize());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        for barrier in barriers {
            timeout(Duration::from_secs(5), barrier)
                .await
                .expect("barrier never completed")
                .unwrap()
                .unwrap();
        }
    }
}

#[tokio::test]
async fn a_lone_cluster_passes_immediately() {
    let member = members(&["A"]).await.pop().unwrap();
    let address = member.listener.local_addr().unwrap();

    let listener = timeout(Duration::from_secs(1), member.synchronize())
        .await
        .expect("a cluster without peers must not wait")
        .unwrap()
        .unwrap();

    assert_eq!(listener.local_addr().unwrap(), address);
}

#[tokio::test]
async fn ready_from_an_unknown_cluster_is_not_counted() {
    let mut members = members(&["A", "B"]).await;
    let b = members.pop().unwrap();
    let a = members.pop().unwrap();
    let a_address = a.listener.local_addr().unwrap();
    let a_barrier = a.synchronize();

    let mut intruder = TcpStream::connect(a_address).await.unwrap();
    let ready = encode(&Message::ready(&ClusterId::new("Z")));
    write_frame(&mut intruder, &ready, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!a_barrier.is_finished());

    b.synchronize().await.unwrap().unwrap();
    timeout(Duration::from_secs(5), a_barrier)
        .await
        .expect("barrier never completed")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn traffic_flows_through_the_listener_after_the_handoff() {
    let members = members(&["A", "B"]).await;
    let routers: Vec<_> = members.iter().map(|m| Arc::clone(&m.router)).collect();
    assert_eq!(members[1].name, "B");

    let barriers: Vec<_> = members.into_iter().map(Member::synchronize).collect();
    for (barrier, router) in barriers.into_iter().zip(&routers) {
        let listener = barrier.await.unwrap().unwrap();
        NetworkListener::spawn(listener, Arc::clone(router));
    }

    let message = Message::response(NodeId::new(0), 0).with("x", 2.5);
    routers[0].route(NodeId::new(1), message).await.unwrap();

    let raw = timeout(Duration::from_secs(5), routers[1].receive(NodeId::new(1)))
        .await
        .expect("message never delivered")
        .unwrap();
    let received = decode(&raw).unwrap();
    assert_eq!(received.parse::<f64>("x"), Some(2.5));
    assert_eq!(received.receiver(), Some(NodeId::new(1)));
    assert_eq!(received.sending_cluster(), Some(ClusterId::new("A")));
}
