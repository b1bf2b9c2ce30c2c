/// Wire messages of the group protocol.
///
/// Serialized as MessagePack. Control messages (subscribe, join) travel
/// packed inside per-recipient authcrypt envelopes over the secure
/// point-to-point channel; the status message travels compressed on the
/// state topic of the bus.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validator::Checksum;
use crate::types::{Member, TransportKeys};
use crate::ProtocolError;

/// Subscribe handshake request.
///
/// `subscribe = false` is a teardown signal: the receiver drops its
/// fan-out entry for the sender and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub id: String,
    pub subscribe: bool,
    /// Requester's end-to-end public key the receiver should encrypt
    /// data-plane messages with.
    pub pub_key: Vec<u8>,
    pub topic: String,
    pub member: Member,
    pub transport: TransportKeys,
}

impl Subscribe {
    pub fn new(
        subscribe: bool,
        pub_key: Vec<u8>,
        topic: &str,
        member: Member,
        transport: TransportKeys,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscribe,
            pub_key,
            topic: topic.to_string(),
            member,
            transport,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Reply to a subscribe request: the acceptor's transport keys, its
/// publisher flag and its current view of the topic checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub id: String,
    pub transport: TransportKeys,
    pub publisher: bool,
    pub checksum: Checksum,
}

impl SubscribeAck {
    pub fn new(transport: TransportKeys, publisher: bool, checksum: Checksum) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transport,
            publisher,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Group-join request sent to an existing member over the secure channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: String,
    pub label: String,
    pub topic: String,
    /// Lets the acceptor establish the reverse channel when absent.
    pub requester_invitation: String,
}

impl JoinRequest {
    pub fn new(label: &str, topic: &str, requester_invitation: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            topic: topic.to_string(),
            requester_invitation: requester_invitation.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Reply to a join request: the acceptor's full member list, acceptor
/// included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub id: String,
    pub members: Vec<Member>,
}

impl JoinResponse {
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            members,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Membership status broadcast.
///
/// Carries one independently packed envelope per group member, keyed by
/// the point-to-point channel id so a receiver can locate the copy
/// addressed to it without trial decryption. Compressed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub topic: String,
    pub auth_msgs: HashMap<String, Vec<u8>>,
}

impl Status {
    pub fn new(topic: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            auth_msgs: HashMap::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
