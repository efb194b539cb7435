//! Multi-node scenarios over real loopback TCP: discovery, flooding and
//! failure isolation.

use std::sync::Arc;
use std::time::Duration;

use floodmesh::{ChannelSink, Node, NodeConfig, NodeEvent, SendError, MAX_FRAME_LEN, NO_BOOTSTRAP};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(300);

struct TestPeer {
    node: Node,
    events: UnboundedReceiver<NodeEvent>,
}

impl TestPeer {
    async fn start(name: &str, bootstrap: &str) -> Self {
        let (sink, events) = ChannelSink::new();
        let node = Node::new(NodeConfig::default(), Arc::new(sink));
        node.connect(name, bootstrap).await.expect("connect failed");
        Self { node, events }
    }

    fn address(&self) -> String {
        self.node.identity().expect("identity missing").address.clone()
    }

    /// Wait until an event matching `pred` arrives; returns everything
    /// received up to and including it.
    async fn wait_for(&mut self, pred: impl Fn(&NodeEvent) -> bool) -> Vec<NodeEvent> {
        let mut seen = Vec::new();
        let deadline = Instant::now() + TEST_TIMEOUT;
        loop {
            let event = timeout(deadline - Instant::now(), self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out; events so far: {:?}", seen))
                .expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn drain(&mut self) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn message_count(events: &[NodeEvent], text: &str) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, NodeEvent::MessageReceived(t) if t == text))
        .count()
}

/// Poll until every peer knows exactly `expected` addresses.
async fn wait_for_membership(peers: &[&TestPeer], expected: &[String]) {
    let mut expected = expected.to_vec();
    expected.sort();

    let result = timeout(TEST_TIMEOUT, async {
        loop {
            let mut converged = true;
            for peer in peers {
                if peer.node.peers().await != expected {
                    converged = false;
                }
            }
            if converged {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "membership did not converge on {:?}", expected);
}

async fn three_node_mesh() -> (TestPeer, TestPeer, TestPeer) {
    let a = TestPeer::start("alice", NO_BOOTSTRAP).await;
    let b = TestPeer::start("bob", &a.address()).await;
    let c = TestPeer::start("carol", &a.address()).await;

    let all = vec![a.address(), b.address(), c.address()];
    wait_for_membership(&[&a, &b, &c], &all).await;
    (a, b, c)
}

#[tokio::test]
async fn bootstrap_handshake_is_announced() {
    let mut a = TestPeer::start("alice", NO_BOOTSTRAP).await;
    let mut b = TestPeer::start("bob", &a.address()).await;

    let b_events = b.wait_for(|e| matches!(e, NodeEvent::PeerConnected(_))).await;
    assert!(b_events.contains(&NodeEvent::PeerConnected(a.address())));

    let a_events = a.wait_for(|e| matches!(e, NodeEvent::PeerJoined(_))).await;
    assert_eq!(a_events.last(), Some(&NodeEvent::PeerJoined("bob".into())));

    let both = vec![a.address(), b.address()];
    wait_for_membership(&[&a, &b], &both).await;

    a.node.shutdown().await;
    b.node.shutdown().await;
}

#[tokio::test]
async fn bootstrap_peer_learns_every_name() {
    let (a, b, c) = three_node_mesh().await;

    let names = a.node.names().await;
    assert_eq!(
        names,
        vec![
            ("alice".to_string(), a.address()),
            ("bob".to_string(), b.address()),
            ("carol".to_string(), c.address()),
        ]
    );

    for peer in [&a, &b, &c] {
        peer.node.shutdown().await;
    }
}

#[tokio::test]
async fn chat_reaches_everyone_exactly_once() {
    let (mut a, mut b, mut c) = three_node_mesh().await;
    sleep(SETTLE).await;
    a.drain();
    b.drain();
    c.drain();

    b.node.send_chat("hi from bob").await.expect("send failed");

    a.wait_for(|e| *e == NodeEvent::MessageReceived("bob: hi from bob".into()))
        .await;
    c.wait_for(|e| *e == NodeEvent::MessageReceived("bob: hi from bob".into()))
        .await;

    // Let the flood run out, then make sure nothing was shown twice.
    sleep(SETTLE).await;
    assert_eq!(message_count(&a.drain(), "bob: hi from bob"), 0);
    assert_eq!(message_count(&c.drain(), "bob: hi from bob"), 0);

    let echoes = b.drain();
    assert_eq!(message_count(&echoes, "bob: hi from bob"), 1, "{:?}", echoes);

    for peer in [&a, &b, &c] {
        peer.node.shutdown().await;
    }
}

#[tokio::test]
async fn many_messages_from_many_senders() {
    let (mut a, mut b, mut c) = three_node_mesh().await;
    sleep(SETTLE).await;
    a.drain();
    b.drain();
    c.drain();

    for i in 0..5 {
        a.node.send_chat(&format!("a{}", i)).await.expect("send failed");
        b.node.send_chat(&format!("b{}", i)).await.expect("send failed");
        c.node.send_chat(&format!("c{}", i)).await.expect("send failed");
    }

    let mut texts = Vec::new();
    for i in 0..5 {
        texts.push(format!("alice: a{}", i));
        texts.push(format!("bob: b{}", i));
        texts.push(format!("carol: c{}", i));
    }

    for peer in [&mut a, &mut b, &mut c] {
        let mut received = Vec::new();
        while received.len() < texts.len() {
            let events = peer.wait_for(|e| matches!(e, NodeEvent::MessageReceived(_))).await;
            received.extend(events.into_iter().filter_map(|e| match e {
                NodeEvent::MessageReceived(text) => Some(text),
                _ => None,
            }));
        }
        sleep(SETTLE).await;
        received.extend(peer.drain().into_iter().filter_map(|e| match e {
            NodeEvent::MessageReceived(text) => Some(text),
            _ => None,
        }));

        received.sort();
        let mut expected = texts.clone();
        expected.sort();
        assert_eq!(received, expected);
    }

    for peer in [&a, &b, &c] {
        peer.node.shutdown().await;
    }
}

#[tokio::test]
async fn dead_peer_does_not_block_delivery() {
    let (mut a, mut b, c) = three_node_mesh().await;
    let dead = c.address();
    c.node.shutdown().await;
    sleep(SETTLE).await;
    a.drain();
    b.drain();

    b.node.send_chat("anyone there?").await.expect("send failed");

    a.wait_for(|e| *e == NodeEvent::MessageReceived("bob: anyone there?".into()))
        .await;

    let b_events = b.drain();
    assert_eq!(message_count(&b_events, "bob: anyone there?"), 1);
    assert!(
        b_events
            .iter()
            .any(|e| matches!(e, NodeEvent::TransportError { peer, .. } if *peer == dead)),
        "expected a transport error for {}: {:?}",
        dead,
        b_events
    );

    // Dead peers stay in the membership and are retried next time.
    assert!(b.node.peers().await.contains(&dead));

    a.node.shutdown().await;
    b.node.shutdown().await;
}

#[tokio::test]
async fn oversized_chat_is_refused_at_the_sender() {
    let mut a = TestPeer::start("alice", NO_BOOTSTRAP).await;
    let mut b = TestPeer::start("bob", &a.address()).await;
    let both = vec![a.address(), b.address()];
    wait_for_membership(&[&a, &b], &both).await;
    sleep(SETTLE).await;
    a.drain();
    b.drain();

    let err = a
        .node
        .send_chat(&"x".repeat(70 * 1024))
        .await
        .expect_err("oversized message was accepted");
    assert!(matches!(err, SendError::TooLong { max: MAX_FRAME_LEN, .. }));

    sleep(SETTLE).await;
    assert!(a.drain().is_empty(), "no local echo for a refused message");
    assert!(b.drain().is_empty(), "nothing should reach bob");

    // The mesh still carries normal traffic afterwards.
    a.node.send_chat("small one").await.expect("send failed");
    b.wait_for(|e| *e == NodeEvent::MessageReceived("alice: small one".into()))
        .await;

    a.node.shutdown().await;
    b.node.shutdown().await;
}
