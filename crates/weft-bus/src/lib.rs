//! Weft bus layer.
//!
//! The authenticated PUB/SUB boundary the group protocol publishes and
//! subscribes through. The socket primitive itself is external — this crate
//! defines the [`Bus`] trait it must satisfy, the curve-style
//! [`Authenticator`] that gates it, collision-free wire [`topics`], and an
//! in-process [`MemoryBus`] used by tests and demos.

mod auth;
mod error;
mod memory;
pub mod topics;

pub use auth::{Authenticator, KeyPair, PeerKeySet};
pub use error::BusError;
pub use memory::{MemoryBus, MemoryExchange};

use tokio::sync::mpsc;

/// The two subscriber sockets every node runs: one for membership status
/// broadcasts, one for data-plane messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    State,
    Data,
}

/// One message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Authenticated multicast transport primitive.
///
/// One PUB socket (bound to this node's endpoint) plus one SUB socket per
/// [`SocketKind`]. Subscription filters use prefix matching. The `set_*` /
/// `allow` / `revoke` surface mirrors curve authentication: a publisher
/// only accepts subscribers whose client key was allowlisted, and a
/// subscriber only trusts publishers whose server key it was configured
/// with.
pub trait Bus: Send + Sync {
    /// Bind the publish socket to this node's endpoint.
    fn bind(&self, endpoint: &str) -> Result<(), BusError>;

    /// Connect a subscriber socket to a remote publish endpoint.
    fn connect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError>;

    /// Drop the connection of a subscriber socket to a remote endpoint.
    fn disconnect(&self, kind: SocketKind, endpoint: &str) -> Result<(), BusError>;

    /// Add a topic filter on a subscriber socket.
    fn subscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError>;

    /// Remove a topic filter from a subscriber socket.
    fn unsubscribe(&self, kind: SocketKind, topic: &str) -> Result<(), BusError>;

    /// Publish a payload on a topic. Best effort — no delivery receipt.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Take the inbound stream of a subscriber socket. Yields `Some` once;
    /// the stream is owned by whichever listener claims it first.
    fn incoming(&self, kind: SocketKind) -> Option<mpsc::Receiver<BusMessage>>;

    /// Bind this node's identity and server-role secret to the publish
    /// socket.
    fn set_server_auth(&self, identity: &str, secret: &[u8; 32]) -> Result<(), BusError>;

    /// Configure a subscriber socket to trust a peer's server key,
    /// presenting our client-role credentials.
    fn set_client_auth(
        &self,
        kind: SocketKind,
        server_pub: &[u8; 32],
        client_pub: &[u8; 32],
        client_secret: &[u8; 32],
    ) -> Result<(), BusError>;

    /// Allowlist a peer's client key on our publish side.
    fn allow(&self, client_pub: &[u8; 32]) -> Result<(), BusError>;

    /// Remove a peer's client key from the publish-side allowlist.
    fn revoke(&self, client_pub: &[u8; 32]) -> Result<(), BusError>;
}
