//! Weft protocol layer.
//!
//! A peer-to-peer group-messaging overlay on top of `weft-bus`: group
//! membership and fan-out registries, checksum-based join verification,
//! and the orchestrator driving create/join/leave/send plus the inbound
//! subscribe/join/status/data handlers.
//!
//! Wire format: MessagePack. Group consistency: order-independent
//! SHA-256 member-set digests corroborated across peers at join time.
//! Secure channels, authcrypt envelopes, key storage and the admission
//! policy are consumed as injected collaborators.

pub mod agent;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod services;
pub mod store;
pub mod types;
pub mod validator;

pub use agent::{Agent, AgentConfig, AgentEvent, Collaborators};
pub use dispatch::{Dispatcher, Inbound};
pub use error::ProtocolError;
pub use messages::{JoinRequest, JoinResponse, Status, Subscribe, SubscribeAck};
pub use services::{
    AdmissionPolicy, Channels, Compressor, KeyStore, PeerContact, PermitAll, Sealer,
    ZstdCompressor,
};
pub use store::{GroupStore, SubStore};
pub use types::{Member, MessageKind, TransportKeys};
pub use validator::{Checksum, Validator};
