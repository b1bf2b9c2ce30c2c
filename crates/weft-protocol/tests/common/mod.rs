//! In-memory collaborators for integration tests.
//!
//! Stands in for the external secure-channel, authcrypt and key-storage
//! services so full multi-agent scenarios run in-process over the
//! memory bus.
#![allow(dead_code)] // not every test binary uses every helper

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::rand_core::{OsRng, RngCore},
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use x25519_dalek::{PublicKey, StaticSecret};

use weft_bus::{Bus, BusError, BusMessage, MemoryExchange, SocketKind};
use weft_protocol::{
    AdmissionPolicy, Agent, AgentConfig, AgentEvent, Channels, Collaborators, Dispatcher, Inbound,
    KeyStore, Member, MessageKind, PeerContact, PermitAll, ProtocolError, Sealer, ZstdCompressor,
};

// ── TestNet — shared peer directory ─────────────────────────────────────

struct PeerEntry {
    endpoint: String,
    pub_key: [u8; 32],
}

/// Global directory of test peers, their request endpoints and the
/// point-to-point pairings that have been established.
#[derive(Default)]
pub struct TestNet {
    peers: Mutex<HashMap<String, PeerEntry>>,
    dispatchers: Mutex<HashMap<String, Arc<Dispatcher>>>,
    established: Mutex<HashSet<(String, String)>>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn channel_id(a: &str, b: &str) -> String {
    let (lo, hi) = pair_key(a, b);
    format!("ch:{lo}|{hi}")
}

impl TestNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, label: &str, endpoint: &str, pub_key: [u8; 32]) {
        self.peers.lock().unwrap().insert(
            label.to_string(),
            PeerEntry {
                endpoint: endpoint.to_string(),
                pub_key,
            },
        );
    }

    fn register_dispatcher(&self, endpoint: &str, dispatcher: Arc<Dispatcher>) {
        self.dispatchers
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), dispatcher);
    }

    /// Establish the point-to-point pairing between two peers, as the
    /// channel layer would after an invitation exchange.
    pub fn connect(&self, a: &str, b: &str) {
        self.established.lock().unwrap().insert(pair_key(a, b));
    }

    fn connected(&self, a: &str, b: &str) -> bool {
        self.established.lock().unwrap().contains(&pair_key(a, b))
    }

    /// A registered peer's end-to-end public key.
    pub fn public_key(&self, label: &str) -> [u8; 32] {
        self.peers.lock().unwrap()[label].pub_key
    }

    /// The dispatcher serving a request endpoint.
    pub fn dispatcher(&self, endpoint: &str) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatchers.lock().unwrap()[endpoint])
    }
}

// ── Channels ────────────────────────────────────────────────────────────

pub struct TestChannels {
    net: Arc<TestNet>,
    label: String,
}

const INV_PREFIX: &str = "weft-inv:";

#[async_trait]
impl Channels for TestChannels {
    fn invite(&self) -> Result<String, ProtocolError> {
        Ok(format!("{INV_PREFIX}{}", self.label))
    }

    async fn establish(&self, invitation: &str) -> Result<(), ProtocolError> {
        let peer = invitation
            .strip_prefix(INV_PREFIX)
            .ok_or_else(|| ProtocolError::HandshakeFailed {
                label: self.label.clone(),
                reason: format!("malformed invitation {invitation}"),
            })?;
        if !self.net.peers.lock().unwrap().contains_key(peer) {
            return Err(ProtocolError::HandshakeFailed {
                label: peer.to_string(),
                reason: "unknown peer".into(),
            });
        }
        self.net.connect(&self.label, peer);
        Ok(())
    }

    fn peer(&self, label: &str) -> Result<PeerContact, ProtocolError> {
        if !self.net.connected(&self.label, label) {
            return Err(ProtocolError::HandshakeFailed {
                label: label.to_string(),
                reason: "no channel established".into(),
            });
        }
        let peers = self.net.peers.lock().unwrap();
        let entry = peers
            .get(label)
            .ok_or_else(|| ProtocolError::HandshakeFailed {
                label: label.to_string(),
                reason: "unknown peer".into(),
            })?;
        Ok(PeerContact {
            label: label.to_string(),
            endpoint: entry.endpoint.clone(),
            pub_key: entry.pub_key.to_vec(),
            channel_id: channel_id(&self.label, label),
        })
    }

    async fn request(
        &self,
        kind: MessageKind,
        payload: &[u8],
        endpoint: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let dispatcher = {
            let dispatchers = self.net.dispatchers.lock().unwrap();
            dispatchers
                .get(endpoint)
                .cloned()
                .ok_or_else(|| ProtocolError::HandshakeFailed {
                    label: endpoint.to_string(),
                    reason: "no server at endpoint".into(),
                })?
        };
        let (msg, reply) = Inbound::with_reply(kind, payload.to_vec());
        dispatcher.route(msg).await?;
        reply.await.map_err(|_| ProtocolError::HandshakeFailed {
            label: endpoint.to_string(),
            reason: "request dropped without a reply".into(),
        })
    }

    fn is_valid_channel(&self, channel_id: &str) -> bool {
        let Some(rest) = channel_id.strip_prefix("ch:") else {
            return false;
        };
        let Some((lo, hi)) = rest.split_once('|') else {
            return false;
        };
        (lo == self.label || hi == self.label) && self.net.connected(lo, hi)
    }
}

// ── Sealer ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct TestEnvelope {
    ephemeral_pk: [u8; 32],
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

/// X25519 + XChaCha20-Poly1305 per-recipient envelopes.
pub struct TestSealer {
    secret: StaticSecret,
}

impl TestSealer {
    /// A sealer with a throwaway identity; packing only needs the
    /// recipient's key.
    pub fn random() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }
}

impl Sealer for TestSealer {
    fn pack(
        &self,
        _recipient: &str,
        recipient_pub: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let pk_bytes: [u8; 32] = recipient_pub
            .try_into()
            .map_err(|_| ProtocolError::Serialization("bad recipient key length".into()))?;
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(pk_bytes));

        let key: [u8; 32] = *shared.as_bytes();
        let cipher = XChaCha20Poly1305::new(&key.into());
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(&XNonce::from(nonce), plaintext)
            .map_err(|e| ProtocolError::Serialization(format!("seal failed: {e}")))?;

        let envelope = TestEnvelope {
            ephemeral_pk: PublicKey::from(&ephemeral).to_bytes(),
            nonce,
            ciphertext,
        };
        rmp_serde::to_vec(&envelope)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn unpack(&self, envelope: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let envelope: TestEnvelope = rmp_serde::from_slice(envelope)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(envelope.ephemeral_pk));
        let key: [u8; 32] = *shared.as_bytes();
        let cipher = XChaCha20Poly1305::new(&key.into());
        cipher
            .decrypt(&XNonce::from(envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|_| ProtocolError::Deserialization("envelope not addressed to us".into()))
    }
}

// ── KeyStore ────────────────────────────────────────────────────────────

pub struct TestKeyStore {
    public: [u8; 32],
}

impl KeyStore for TestKeyStore {
    fn public_key(&self, _label: &str) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.public.to_vec())
    }
}

// ── RecordingBus — captures publishes for assertions ────────────────────

pub struct RecordingBus {
    inner: Arc<dyn Bus>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBus {
    pub fn new(inner: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

impl Bus for RecordingBus {
    fn bind(&self, endpoint: &str) -> Result<(), BusError> {
        self.inner.bind(endpoint)
    }
    fn connect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError> {
        self.inner.connect(kind, endpoint)
    }
    fn disconnect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError> {
        self.inner.disconnect(kind, endpoint)
    }
    fn subscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError> {
        self.inner.subscribe(kind, topic)
    }
    fn unsubscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError> {
        self.inner.unsubscribe(kind, topic)
    }
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        self.inner.publish(topic, payload)
    }
    fn incoming(&self, kind: SocketKind) -> Option<mpsc::Receiver<BusMessage>> {
        self.inner.incoming(kind)
    }
    fn set_server_auth(&self, identity: &str, secret: &[u8; 32]) -> Result<(), BusError> {
        self.inner.set_server_auth(identity, secret)
    }
    fn set_client_auth(
        &self,
        kind: SocketKind,
        server_pub: &[u8; 32],
        client_pub: &[u8; 32],
        client_secret: &[u8; 32],
    ) -> Result<(), BusError> {
        self.inner
            .set_client_auth(kind, server_pub, client_pub, client_secret)
    }
    fn allow(&self, client_pub: &[u8; 32]) -> Result<(), BusError> {
        self.inner.allow(client_pub)
    }
    fn revoke(&self, client_pub: &[u8; 32]) -> Result<(), BusError> {
        self.inner.revoke(client_pub)
    }
}

// ── Agent bootstrap ─────────────────────────────────────────────────────

pub struct TestAgent {
    pub agent: Arc<Agent>,
    pub events: mpsc::Receiver<AgentEvent>,
}

/// Short settle delay so joins stay fast in tests.
pub const TEST_SETTLE: Duration = Duration::from_millis(100);

pub fn spawn_agent(net: &Arc<TestNet>, bus: Arc<dyn Bus>, label: &str) -> TestAgent {
    spawn_agent_with_policy(net, bus, label, Arc::new(PermitAll))
}

pub fn spawn_agent_with_policy(
    net: &Arc<TestNet>,
    bus: Arc<dyn Bus>,
    label: &str,
    policy: Arc<dyn AdmissionPolicy>,
) -> TestAgent {
    let endpoint = format!("mem://{label}");
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret).to_bytes();
    net.register(label, &endpoint, public);

    let collab = Collaborators {
        channels: Arc::new(TestChannels {
            net: Arc::clone(net),
            label: label.to_string(),
        }),
        sealer: Arc::new(TestSealer { secret }),
        keys: Arc::new(TestKeyStore { public }),
        compressor: Arc::new(ZstdCompressor::default()),
        policy,
    };

    let mut cfg = AgentConfig::new(label, &endpoint);
    cfg.settle_delay = TEST_SETTLE;

    let (agent, events) = Agent::new(cfg, bus, collab).expect("agent construction");
    let dispatcher = Arc::clone(&agent).start();
    net.register_dispatcher(&endpoint, Arc::new(dispatcher));

    TestAgent { agent, events }
}

/// Poll until `cond` holds or the timeout expires.
pub async fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Convenience: a member list's labels, sorted.
pub fn labels(members: &[Member]) -> Vec<String> {
    let mut labels: Vec<String> = members.iter().map(|m| m.label.clone()).collect();
    labels.sort();
    labels
}

/// Shared exchange + net for a multi-agent scenario.
pub fn test_fabric() -> (Arc<TestNet>, Arc<MemoryExchange>) {
    (TestNet::new(), MemoryExchange::new())
}
