/// Transport-level errors for the weft bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("binding publish endpoint {endpoint} failed: {reason}")]
    Bind { endpoint: String, reason: String },

    #[error("connecting {kind:?} socket to {endpoint} failed: {reason}")]
    Connect {
        kind: crate::SocketKind,
        endpoint: String,
        reason: String,
    },

    #[error("publish on topic {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("transport authentication failed: {0}")]
    Auth(String),

    #[error("no transport keys installed for peer {0}")]
    UnknownPeer(String),

    #[error("invalid topic name: {0}")]
    InvalidTopic(String),
}
