/// Protocol-level errors for weft.
///
/// Wraps bus errors and adds the group-protocol taxonomy. Registry and
/// validator functions report errors to the orchestrator rather than
/// logging; inbound handlers log-and-continue while caller-invoked
/// operations surface these synchronously.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("already a member of group {topic}")]
    AlreadyMember { topic: String },

    #[error("member {label} is not authorized")]
    NotAuthorized { label: String },

    #[error("no such topic: {topic}")]
    NoSuchTopic { topic: String },

    #[error("no members found for topic {topic}")]
    NoMembers { topic: String },

    #[error("inconsistent member sets reported by {labels:?}")]
    InconsistentMembership { labels: Vec<String> },

    #[error("handshake with {label} failed: {reason}")]
    HandshakeFailed { label: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("transport error: {0}")]
    Transport(#[from] weft_bus::BusError),

    #[error("status update is not addressed to this member")]
    StatusNotAddressed,
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}
