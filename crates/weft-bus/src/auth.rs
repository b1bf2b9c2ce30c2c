/// Transport authenticator — gates the PUB/SUB sockets so only paired
/// peers can publish to or subscribe from this node.
///
/// Owns the node's two curve key pairs (server role for the publish
/// socket, client role for the subscriber sockets) and a trust store of
/// remote peers' public keys. Per peer the lifecycle is
/// Unknown → Paired → Revoked; returning to Paired requires a fresh
/// subscribe handshake driving [`Authenticator::pair`] again.
use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Bus, BusError, SocketKind};

/// A curve key pair for one socket role.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

/// A remote peer's transport public keys, as exchanged during the
/// subscribe handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerKeySet {
    pub server_pub: [u8; 32],
    pub client_pub: [u8; 32],
}

/// Trust-store entries are independent per peer: a failed install for one
/// peer never touches another's keys. The store has its own lock and no
/// authenticator call takes any other lock while holding it.
pub struct Authenticator {
    identity: String,
    server: KeyPair,
    client: KeyPair,
    trusted: Mutex<HashMap<String, PeerKeySet>>,
}

impl Authenticator {
    /// Generate this node's server-role and client-role key pairs.
    /// Called once at startup.
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            server: KeyPair::generate(),
            client: KeyPair::generate(),
            trusted: Mutex::new(HashMap::new()),
        }
    }

    /// This node's server-role public key, shared in subscribe handshakes.
    pub fn server_public(&self) -> [u8; 32] {
        self.server.public_bytes()
    }

    /// This node's client-role public key, shared in subscribe handshakes.
    pub fn client_public(&self) -> [u8; 32] {
        self.client.public_bytes()
    }

    /// Bind identity and server secret to the publish socket.
    pub fn secure_publisher(&self, bus: &dyn Bus) -> Result<(), BusError> {
        bus.set_server_auth(&self.identity, &self.server.secret_bytes())
    }

    /// Install a peer's keys: trust its server key on the named subscriber
    /// sockets and allowlist its client key on our publish side.
    pub fn pair(
        &self,
        label: &str,
        keys: PeerKeySet,
        sockets: &[SocketKind],
        bus: &dyn Bus,
    ) -> Result<(), BusError> {
        let mut trusted = self.trusted.lock().expect("trust store lock poisoned");
        for kind in sockets {
            bus.set_client_auth(
                *kind,
                &keys.server_pub,
                &self.client.public_bytes(),
                &self.client.secret_bytes(),
            )?;
        }
        bus.allow(&keys.client_pub)?;
        trusted.insert(label.to_string(), keys);
        tracing::debug!("installed transport keys for peer {label}");
        Ok(())
    }

    /// Revoke a peer's trust entry. Called exactly once per departure;
    /// errors if the peer was never paired.
    pub fn revoke(&self, label: &str, bus: &dyn Bus) -> Result<(), BusError> {
        let mut trusted = self.trusted.lock().expect("trust store lock poisoned");
        let keys = trusted
            .remove(label)
            .ok_or_else(|| BusError::UnknownPeer(label.to_string()))?;
        bus.revoke(&keys.client_pub)?;
        tracing::debug!("revoked transport keys of peer {label}");
        Ok(())
    }

    /// Whether a peer currently holds a trust entry.
    pub fn paired(&self, label: &str) -> bool {
        self.trusted
            .lock()
            .expect("trust store lock poisoned")
            .contains_key(label)
    }

    /// Labels of all currently paired peers.
    pub fn paired_peers(&self) -> Vec<String> {
        self.trusted
            .lock()
            .expect("trust store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
