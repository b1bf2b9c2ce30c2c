/// External collaborator boundaries.
///
/// The engine consumes these as trait objects injected at construction:
/// the secure point-to-point channel, the per-message authcrypt
/// primitive, the node's key storage, status compression and the join
/// admission policy. None of them are implemented here except for the
/// zstd compressor and the explicitly permissive admission policy.
use async_trait::async_trait;

use crate::types::MessageKind;
use crate::ProtocolError;

/// What the channel layer knows about a paired peer.
#[derive(Debug, Clone)]
pub struct PeerContact {
    pub label: String,
    /// Request/reply endpoint of the peer.
    pub endpoint: String,
    /// The peer's end-to-end public key for this pairing.
    pub pub_key: Vec<u8>,
    /// Session identifier both ends derived during the handshake; status
    /// envelopes are keyed by it.
    pub channel_id: String,
}

/// Secure point-to-point channels between peers.
#[async_trait]
pub trait Channels: Send + Sync {
    /// Produce a fresh invitation other peers can use to pair with us.
    fn invite(&self) -> Result<String, ProtocolError>;

    /// Establish a channel to the peer behind an invitation.
    async fn establish(&self, invitation: &str) -> Result<(), ProtocolError>;

    /// Look up an already-paired peer.
    fn peer(&self, label: &str) -> Result<PeerContact, ProtocolError>;

    /// Synchronous request/reply round trip to a peer endpoint.
    async fn request(
        &self,
        kind: MessageKind,
        payload: &[u8],
        endpoint: &str,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Whether a channel id belongs to one of our pairings. Used to find
    /// the status envelope addressed to this node.
    fn is_valid_channel(&self, channel_id: &str) -> bool;
}

/// Per-recipient authenticated encryption.
pub trait Sealer: Send + Sync {
    /// Pack plaintext into an envelope only `recipient` can open.
    fn pack(
        &self,
        recipient: &str,
        recipient_pub: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Open an envelope addressed to this node.
    fn unpack(&self, envelope: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// This node's asymmetric key storage, keyed by peer identity.
pub trait KeyStore: Send + Sync {
    /// Our public key for the pairing with `label` — the key the peer
    /// should encrypt towards us with.
    fn public_key(&self, label: &str) -> Result<Vec<u8>, ProtocolError>;
}

/// Compression of the periodic status payload.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Zstd-backed [`Compressor`].
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        zstd::stream::encode_all(data, self.level)
            .map_err(|e| ProtocolError::Serialization(format!("zstd encode: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        zstd::stream::decode_all(data)
            .map_err(|e| ProtocolError::Deserialization(format!("zstd decode: {e}")))
    }
}

/// Join/subscribe admissibility.
///
/// Injected so the engine is testable under both permissive and
/// restrictive policies; handlers never hard-code an answer.
pub trait AdmissionPolicy: Send + Sync {
    fn is_admissible(&self, label: &str, topic: &str) -> bool;
}

/// Admits every requester. Suitable for tests and closed deployments
/// where admission is enforced upstream; production groups should inject
/// a real policy.
pub struct PermitAll;

impl AdmissionPolicy for PermitAll {
    fn is_admissible(&self, _label: &str, _topic: &str) -> bool {
        true
    }
}
