//! Fan-out behavior: per-recipient envelopes and subscribe teardown.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spawn_agent, test_fabric, wait_for, TestSealer};
use weft_bus::topics;
use weft_protocol::{
    AgentEvent, Inbound, Member, MessageKind, Sealer, Subscribe, TransportKeys,
};

/// A publisher never reuses one ciphertext for two subscribers: every
/// registered subscriber gets its own envelope on its own topic.
#[tokio::test]
async fn send_produces_distinct_envelopes_per_subscriber() {
    let (net, exchange) = test_fabric();
    let inner = exchange.attach();
    let recording = common::RecordingBus::new(inner);
    let alice = spawn_agent(&net, Arc::clone(&recording) as Arc<dyn weft_bus::Bus>, "alice");
    let bob = spawn_agent(&net, exchange.attach(), "bob");
    let carol = spawn_agent(&net, exchange.attach(), "carol");

    alice.agent.create("news", true).unwrap();
    net.connect("bob", "alice");
    bob.agent.join("news", "alice", false).await.unwrap();
    net.connect("carol", "alice");
    carol.agent.join("news", "alice", false).await.unwrap();

    let a = Arc::clone(&alice.agent);
    wait_for(|| a.info("news").len() == 3, "alice to register both").await;

    alice.agent.send("news", "same plaintext").await.unwrap();

    let to_bob = topics::data_topic("news", "alice", "bob").unwrap();
    let to_carol = topics::data_topic("news", "alice", "carol").unwrap();
    let published = recording.published();
    let bob_envelope = published
        .iter()
        .find(|(t, _)| *t == to_bob)
        .map(|(_, p)| p.clone())
        .expect("envelope for bob");
    let carol_envelope = published
        .iter()
        .find(|(t, _)| *t == to_carol)
        .map(|(_, p)| p.clone())
        .expect("envelope for carol");

    assert_ne!(
        bob_envelope, carol_envelope,
        "one ciphertext must never serve two subscribers"
    );
}

/// Sending into a topic with no registered subscribers is a no-op, not
/// an error.
#[tokio::test]
async fn send_without_subscribers_has_no_effect() {
    let (net, exchange) = test_fabric();
    let mut alice = spawn_agent(&net, exchange.attach(), "alice");

    alice.agent.create("news", true).unwrap();
    alice.agent.send("news", "into the void").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        alice.events.try_recv().is_err(),
        "nothing published, no event"
    );
}

/// A subscribe message with `subscribe = false` tears down the fan-out
/// entry only; membership and transport keys stay until a status update
/// says otherwise.
#[tokio::test]
async fn subscribe_teardown_removes_fanout_entry_only() {
    let (net, exchange) = test_fabric();
    let mut alice = spawn_agent(&net, exchange.attach(), "alice");
    let bob = spawn_agent(&net, exchange.attach(), "bob");

    alice.agent.create("news", true).unwrap();
    net.connect("bob", "alice");
    bob.agent.join("news", "alice", false).await.unwrap();
    let a = Arc::clone(&alice.agent);
    wait_for(|| a.info("news").len() == 2, "alice to register bob").await;

    // Baseline: a send fans out to bob.
    alice.agent.send("news", "first").await.unwrap();
    loop {
        match alice.events.recv().await.expect("alice event stream") {
            AgentEvent::Published { text, .. } => {
                assert_eq!(text, "first");
                break;
            }
            _ => continue,
        }
    }

    // Bob's teardown signal: unsubscribe without leaving.
    let teardown = Subscribe::new(
        false,
        Vec::new(),
        "news",
        Member {
            label: "bob".into(),
            active: true,
            publisher: false,
            invitation: String::new(),
            pub_endpoint: "mem://bob".into(),
        },
        TransportKeys {
            server_pub: [0u8; 32],
            client_pub: [0u8; 32],
        },
    );
    let packed = TestSealer::random()
        .pack("alice", &net.public_key("alice"), &teardown.to_bytes().unwrap())
        .unwrap();
    net.dispatcher("mem://alice")
        .route(Inbound::new(MessageKind::Subscribe, packed))
        .await
        .unwrap();

    // Fan-out entry gone: the next send reaches nobody.
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.agent.send("news", "second").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        alice.events.try_recv().is_err(),
        "no subscriber left, no publish event"
    );

    // Membership and keys are untouched by the teardown signal.
    assert_eq!(alice.agent.info("news").len(), 2);
    assert!(alice.agent.authenticator().paired("bob"));
}
