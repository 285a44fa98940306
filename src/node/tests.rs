use std::{
    cell::Cell,
    sync::{Arc, Mutex},
    time::Duration,
};

use super::*;
use crate::{
    error::RouteError,
    message::{codec::encode, SENDER_KEY},
    testing::{cluster, fast_transport, topology, RecordingSink},
    topology::{ClusterId, Topology},
};

type Log = Arc<Mutex<Vec<(u32, NodeId)>>>;

/// Completes a round after `needed` responses and records what it handled
struct Recorder {
    needed: usize,
    seen: usize,
    log: Log,
}

impl Algorithm for Recorder {
    fn on_start(&mut self, _: &mut NodeContext<'_>) -> RoundProgress {
        self.seen = 0;
        if self.needed == 0 {
            RoundProgress::Complete
        } else {
            RoundProgress::Pending
        }
    }

    fn on_response(&mut self, context: &mut NodeContext<'_>, message: &Message) -> RoundProgress {
        self.log
            .lock()
            .unwrap()
            .push((context.round(), message.sender().unwrap()));
        self.seen += 1;
        if self.seen >= self.needed {
            RoundProgress::Complete
        } else {
            RoundProgress::Pending
        }
    }
}

struct Fixture {
    topology: Topology,
    router: Arc<Router>,
    sink: Arc<RecordingSink>,
}

impl Fixture {
    fn new() -> Self {
        let topology = topology(vec![cluster(
            "A",
            true,
            1,
            &[(0, &[1, 2], 1.0), (1, &[0], 2.0), (2, &[0], 3.0)],
        )]);
        let router = Arc::new(Router::new(&topology, fast_transport()));
        Self {
            topology,
            router,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn spawn(&self, max_rounds: u32, algorithm: impl Algorithm + 'static) -> NodeRuntime {
        let id = NodeId::new(0);
        NodeRuntime::spawn(
            id,
            self.topology.node(id).unwrap(),
            max_rounds,
            Box::new(algorithm),
            Arc::clone(&self.router),
            self.sink.clone(),
        )
    }

    fn recorder(&self, needed: usize) -> (Recorder, Log) {
        let log = Log::default();
        let recorder = Recorder {
            needed,
            seen: 0,
            log: Arc::clone(&log),
        };
        (recorder, log)
    }

    async fn send(&self, message: Message) {
        self.router.route(NodeId::new(0), message).await.unwrap();
    }

    fn completed_rounds(&self) -> Vec<u32> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::RoundCompleted { round, .. } => Some(round),
                _ => None,
            })
            .collect()
    }
}

fn response(sender: u32, round: u32) -> Message {
    Message::response(NodeId::new(sender), round)
}

#[tokio::test]
async fn zero_rounds_finish_without_a_start() {
    let fixture = Fixture::new();
    let (recorder, _) = fixture.recorder(1);

    let outcome = tokio::time::timeout(Duration::from_secs(5), fixture.spawn(0, recorder).join())
        .await
        .expect("a node with no rounds must terminate")
        .unwrap();

    assert_eq!(outcome.rounds_completed, 0);
    assert_eq!(outcome.state["x"], 1.0);
    assert_eq!(
        fixture.sink.events(),
        vec![Event::NodeFinished {
            node: NodeId::new(0),
            rounds: 0
        }]
    );
}

#[tokio::test]
async fn early_messages_of_the_next_round_wait_for_it() {
    let fixture = Fixture::new();
    let (recorder, log) = fixture.recorder(2);
    let node = fixture.spawn(2, recorder);

    fixture.send(Message::start()).await;
    fixture.send(response(1, 1)).await;
    fixture.send(response(2, 1)).await;
    fixture.send(response(1, 0)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        fixture.completed_rounds().is_empty(),
        "round 0 completed with a single round-0 response"
    );
    assert_eq!(*log.lock().unwrap(), vec![(0, NodeId::new(1))]);

    fixture.send(response(2, 0)).await;
    let outcome = node.join().await.unwrap();

    assert_eq!(outcome.rounds_completed, 2);
    assert_eq!(fixture.completed_rounds(), vec![0, 1]);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (0, NodeId::new(1)),
            (0, NodeId::new(2)),
            (1, NodeId::new(1)),
            (1, NodeId::new(2)),
        ]
    );
}

#[tokio::test]
async fn responses_before_start_are_replayed_after_it() {
    let fixture = Fixture::new();
    let (recorder, log) = fixture.recorder(1);
    let node = fixture.spawn(1, recorder);

    fixture.send(response(2, 0)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(log.lock().unwrap().is_empty());

    fixture.send(Message::start()).await;
    let outcome = node.join().await.unwrap();

    assert_eq!(outcome.rounds_completed, 1);
    assert_eq!(*log.lock().unwrap(), vec![(0, NodeId::new(2))]);
}

#[tokio::test]
async fn responses_without_a_round_are_dropped() {
    let fixture = Fixture::new();
    let (recorder, log) = fixture.recorder(1);
    let node = fixture.spawn(1, recorder);

    fixture.send(Message::start()).await;
    fixture
        .send(Message::new(MessageKind::Response).with(SENDER_KEY, 1))
        .await;
    fixture.send(response(2, 0)).await;

    node.join().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec![(0, NodeId::new(2))]);
}

#[tokio::test]
async fn a_second_start_is_ignored() {
    let fixture = Fixture::new();
    let (recorder, log) = fixture.recorder(1);
    let node = fixture.spawn(1, recorder);

    fixture.send(Message::start()).await;
    fixture.send(Message::start()).await;
    fixture.send(response(1, 0)).await;

    assert_eq!(node.join().await.unwrap().rounds_completed, 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rounds_completed_on_start_are_chained() {
    let fixture = Fixture::new();
    let (recorder, _) = fixture.recorder(0);
    let node = fixture.spawn(3, recorder);

    fixture.send(Message::start()).await;

    assert_eq!(node.join().await.unwrap().rounds_completed, 3);
    assert_eq!(fixture.completed_rounds(), vec![0, 1, 2]);
}

struct SendsToNowhere;

impl Algorithm for SendsToNowhere {
    fn on_start(&mut self, context: &mut NodeContext<'_>) -> RoundProgress {
        let message = context.response().with("x", 1);
        context.send(NodeId::new(99), message);
        RoundProgress::Pending
    }

    fn on_response(&mut self, _: &mut NodeContext<'_>, _: &Message) -> RoundProgress {
        RoundProgress::Complete
    }
}

#[tokio::test]
async fn routing_to_an_unknown_node_stops_the_node() {
    let fixture = Fixture::new();
    let node = fixture.spawn(1, SendsToNowhere);

    fixture.send(Message::start()).await;

    assert!(matches!(
        node.join().await,
        Err(NodeError::Route(RouteError::UnknownNode(id))) if id == NodeId::new(99)
    ));
}

struct Panics;

impl Algorithm for Panics {
    fn on_start(&mut self, _: &mut NodeContext<'_>) -> RoundProgress {
        panic!("boom");
    }

    fn on_response(&mut self, _: &mut NodeContext<'_>, _: &Message) -> RoundProgress {
        RoundProgress::Complete
    }
}

#[tokio::test]
async fn a_panicking_algorithm_is_reported_at_join() {
    let fixture = Fixture::new();
    let node = fixture.spawn(1, Panics);

    fixture.send(Message::start()).await;

    match node.join().await {
        Err(NodeError::Panicked(reason)) => assert!(reason.contains("boom")),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn a_cancelled_node_is_not_reported_as_a_panic() {
    let fixture = Fixture::new();
    let (recorder, _) = fixture.recorder(1);
    let node = fixture.spawn(1, recorder);

    node.main.abort();

    assert!(matches!(
        node.join().await,
        Err(NodeError::Cancelled(id)) if id == NodeId::new(0)
    ));
}

/// Counts responses in a [Cell], which makes it `Send` but not `Sync`
struct CellCounter(Cell<u32>);

impl Algorithm for CellCounter {
    fn on_start(&mut self, _: &mut NodeContext<'_>) -> RoundProgress {
        RoundProgress::Pending
    }

    fn on_response(&mut self, context: &mut NodeContext<'_>, _: &Message) -> RoundProgress {
        self.0.set(self.0.get() + 1);
        context.set("responses", f64::from(self.0.get()));
        RoundProgress::Complete
    }
}

#[tokio::test]
async fn algorithms_only_need_to_be_send() {
    let fixture = Fixture::new();
    let node = fixture.spawn(1, CellCounter(Cell::new(0)));

    fixture.send(Message::start()).await;
    fixture.send(response(1, 0)).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), node.join())
        .await
        .expect("node never finished")
        .unwrap();
    assert_eq!(outcome.rounds_completed, 1);
    assert_eq!(outcome.state["responses"], 1.0);
}

#[test]
fn classify_files_messages_by_round() {
    let id = NodeId::new(0);

    let (round, message) = classify(id, 3, &encode(&Message::start())).unwrap();
    assert_eq!(round, 0);
    assert_eq!(message.kind(), Some(MessageKind::Start));

    let untagged_start = encode(&Message::new(MessageKind::Start));
    assert_eq!(classify(id, 3, &untagged_start).unwrap().0, 0);

    assert_eq!(classify(id, 3, &encode(&response(1, 2))).unwrap().0, 2);
}

#[test]
fn classify_drops_what_cannot_be_filed() {
    let id = NodeId::new(0);

    assert!(classify(id, 3, "not json").is_none());
    assert!(classify(id, 3, "[1, 2]").is_none());
    assert!(classify(id, 3, &encode(&response(1, 3))).is_none());
    assert!(classify(id, 3, &encode(&response(1, 0).with("Round", "soon"))).is_none());
    assert!(classify(id, 3, &encode(&Message::ready(&ClusterId::new("B")))).is_none());
    assert!(classify(id, 0, &encode(&Message::start())).is_none());
}

#[quickcheck]
fn classify_files_responses_within_the_horizon_only(sender: NodeId, round: u16, horizon: u8) -> bool {
    let (round, horizon) = (u32::from(round % 512), u32::from(horizon));
    match classify(NodeId::new(0), horizon, &encode(&response(sender.to_u32(), round))) {
        Some((filed, message)) => {
            filed == round && round < horizon && message.sender() == Some(sender)
        }
        None => round >= horizon,
    }
}
