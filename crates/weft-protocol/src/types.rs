use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Inbound message category — determines which handler queue a message is
/// routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Subscribe,
    JoinRequest,
    Status,
    Data,
}

/// Identity record for one group participant.
///
/// `label` is unique within a topic's member set. The invitation is a
/// capability-bearing bootstrap token and is stripped before member lists
/// are exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub label: String,
    pub active: bool,
    pub publisher: bool,
    pub invitation: String,
    pub pub_endpoint: String,
}

impl Member {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// A node's bus-level public keys, exchanged in the subscribe handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportKeys {
    pub server_pub: [u8; 32],
    pub client_pub: [u8; 32],
}
