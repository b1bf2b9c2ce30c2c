/// In-process bus for tests and demos.
///
/// A [`MemoryExchange`] routes publishes between every attached
/// [`MemoryBus`] the way a set of curve-authenticated PUB/SUB sockets
/// would: delivery requires the subscriber socket to be connected to the
/// publisher's endpoint, to hold a matching prefix filter, to trust the
/// publisher's server key, and to present a client key the publisher has
/// allowlisted.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Bus, BusError, BusMessage, SocketKind};

/// Buffered messages per subscriber socket before drops kick in.
const SOCKET_BUFFER: usize = 1024;

struct ServerAuth {
    identity: String,
    public: [u8; 32],
}

struct SocketState {
    connected: HashSet<String>,
    filters: HashSet<String>,
    trusted_servers: HashSet<[u8; 32]>,
    client_pub: Option<[u8; 32]>,
    tx: mpsc::Sender<BusMessage>,
}

impl SocketState {
    fn new(tx: mpsc::Sender<BusMessage>) -> Self {
        Self {
            connected: HashSet::new(),
            filters: HashSet::new(),
            trusted_servers: HashSet::new(),
            client_pub: None,
            tx,
        }
    }

    fn matches(&self, endpoint: &str, topic: &str) -> bool {
        self.connected.contains(endpoint) && self.filters.iter().any(|f| topic.starts_with(f.as_str()))
    }
}

/// Shared routing fabric all in-process buses attach to.
pub struct MemoryExchange {
    nodes: Mutex<Vec<Arc<MemoryBus>>>,
}

impl MemoryExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(Vec::new()),
        })
    }

    /// Attach a new bus to the exchange.
    pub fn attach(self: &Arc<Self>) -> Arc<MemoryBus> {
        let (state_tx, state_rx) = mpsc::channel(SOCKET_BUFFER);
        let (data_tx, data_rx) = mpsc::channel(SOCKET_BUFFER);

        let mut sockets = HashMap::new();
        sockets.insert(SocketKind::State, SocketState::new(state_tx));
        sockets.insert(SocketKind::Data, SocketState::new(data_tx));

        let mut receivers = HashMap::new();
        receivers.insert(SocketKind::State, state_rx);
        receivers.insert(SocketKind::Data, data_rx);

        let bus = Arc::new(MemoryBus {
            exchange: Arc::downgrade(self),
            endpoint: Mutex::new(String::new()),
            server: Mutex::new(None),
            allowed: Mutex::new(HashSet::new()),
            sockets: Mutex::new(sockets),
            receivers: Mutex::new(receivers),
        });

        self.nodes
            .lock()
            .expect("exchange lock poisoned")
            .push(Arc::clone(&bus));
        bus
    }
}

/// One node's view of the in-process bus.
pub struct MemoryBus {
    exchange: Weak<MemoryExchange>,
    endpoint: Mutex<String>,
    server: Mutex<Option<ServerAuth>>,
    allowed: Mutex<HashSet<[u8; 32]>>,
    sockets: Mutex<HashMap<SocketKind, SocketState>>,
    receivers: Mutex<HashMap<SocketKind, mpsc::Receiver<BusMessage>>>,
}

impl MemoryBus {
    fn with_socket<T>(
        &self,
        kind: SocketKind,
        f: impl FnOnce(&mut SocketState) -> T,
    ) -> T {
        let mut sockets = self.sockets.lock().expect("socket table lock poisoned");
        let socket = sockets.get_mut(&kind).expect("socket kinds are fixed");
        f(socket)
    }
}

impl Bus for MemoryBus {
    fn bind(&self, endpoint: &str) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::Bind {
                endpoint: endpoint.to_string(),
                reason: "empty endpoint".into(),
            });
        }
        *self.endpoint.lock().expect("endpoint lock poisoned") = endpoint.to_string();
        Ok(())
    }

    fn connect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError> {
        if endpoint.is_empty() {
            return Err(BusError::Connect {
                kind,
                endpoint: endpoint.to_string(),
                reason: "empty endpoint".into(),
            });
        }
        self.with_socket(kind, |s| {
            s.connected.insert(endpoint.to_string());
        });
        Ok(())
    }

    fn disconnect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError> {
        self.with_socket(kind, |s| {
            s.connected.remove(endpoint);
        });
        Ok(())
    }

    fn subscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        self.with_socket(kind, |s| {
            s.filters.insert(topic.to_string());
        });
        Ok(())
    }

    fn unsubscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError> {
        self.with_socket(kind, |s| {
            s.filters.remove(topic);
        });
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let exchange = self.exchange.upgrade().ok_or_else(|| BusError::Publish {
            topic: topic.to_string(),
            reason: "exchange dropped".into(),
        })?;

        let endpoint = self.endpoint.lock().expect("endpoint lock poisoned").clone();
        let server_pub = self
            .server
            .lock()
            .expect("server auth lock poisoned")
            .as_ref()
            .map(|s| s.public);
        let allowed = self.allowed.lock().expect("allowlist lock poisoned").clone();

        let nodes = exchange.nodes.lock().expect("exchange lock poisoned").clone();
        for node in &nodes {
            let sockets = node.sockets.lock().expect("socket table lock poisoned");
            for socket in sockets.values() {
                if !socket.matches(&endpoint, topic) {
                    continue;
                }
                if let Some(server_pub) = server_pub {
                    // Curve-gated delivery: mutual key knowledge required.
                    if !socket.trusted_servers.contains(&server_pub) {
                        continue;
                    }
                    match socket.client_pub {
                        Some(client) if allowed.contains(&client) => {}
                        _ => continue,
                    }
                }
                let msg = BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                };
                if socket.tx.try_send(msg).is_err() {
                    tracing::warn!("memory bus dropped a message on {topic}: subscriber full");
                }
            }
        }
        Ok(())
    }

    fn incoming(&self, kind: SocketKind) -> Option<mpsc::Receiver<BusMessage>> {
        self.receivers
            .lock()
            .expect("receiver table lock poisoned")
            .remove(&kind)
    }

    fn set_server_auth(&self, identity: &str, secret: &[u8; 32]) -> Result<(), BusError> {
        let public = PublicKey::from(&StaticSecret::from(*secret)).to_bytes();
        *self.server.lock().expect("server auth lock poisoned") = Some(ServerAuth {
            identity: identity.to_string(),
            public,
        });
        Ok(())
    }

    fn set_client_auth(
        &self,
        kind: SocketKind,
        server_pub: &[u8; 32],
        client_pub: &[u8; 32],
        _client_secret: &[u8; 32],
    ) -> Result<(), BusError> {
        self.with_socket(kind, |s| {
            s.trusted_servers.insert(*server_pub);
            s.client_pub = Some(*client_pub);
        });
        Ok(())
    }

    fn allow(&self, client_pub: &[u8; 32]) -> Result<(), BusError> {
        self.allowed
            .lock()
            .expect("allowlist lock poisoned")
            .insert(*client_pub);
        Ok(())
    }

    fn revoke(&self, client_pub: &[u8; 32]) -> Result<(), BusError> {
        self.allowed
            .lock()
            .expect("allowlist lock poisoned")
            .remove(client_pub);
        Ok(())
    }
}

impl MemoryBus {
    /// Identity bound to the publish socket, if any. Test helper.
    pub fn server_identity(&self) -> Option<String> {
        self.server
            .lock()
            .expect("server auth lock poisoned")
            .as_ref()
            .map(|s| s.identity.clone())
    }
}
