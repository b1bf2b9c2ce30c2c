/// Group protocol orchestrator.
///
/// Drives create/join/leave/send and the inbound subscribe/join/status/
/// data handlers, composing the membership and fan-out registries, the
/// consistency validator and the transport authenticator with the
/// injected channel, authcrypt, key-storage, compression and admission
/// collaborators.
///
/// Caller-invoked operations return errors synchronously; inbound
/// handlers log failures and keep their listener loops alive.
mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use weft_bus::{topics, Authenticator, Bus, PeerKeySet, SocketKind};

use crate::dispatch::Dispatcher;
use crate::messages::{JoinRequest, JoinResponse, Status, Subscribe, SubscribeAck};
use crate::services::{AdmissionPolicy, Channels, Compressor, KeyStore, Sealer};
use crate::store::{GroupStore, SubStore};
use crate::types::{Member, MessageKind, TransportKeys};
use crate::validator::{Checksum, Validator};
use crate::ProtocolError;

/// Buffered application events before sends start dropping.
const EVENT_BUFFER: usize = 64;

/// Orchestrator configuration.
pub struct AgentConfig {
    /// This node's unique peer identity.
    pub label: String,
    /// Bus address peers subscribe to for our feeds.
    pub pub_endpoint: String,
    /// Pause between pairing and the Active broadcast — bus subscriptions
    /// propagate asynchronously and an immediate publish may be dropped.
    pub settle_delay: Duration,
}

impl AgentConfig {
    pub fn new(label: &str, pub_endpoint: &str) -> Self {
        Self {
            label: label.to_string(),
            pub_endpoint: pub_endpoint.to_string(),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// External collaborators injected at construction.
pub struct Collaborators {
    pub channels: Arc<dyn Channels>,
    pub sealer: Arc<dyn Sealer>,
    pub keys: Arc<dyn KeyStore>,
    pub compressor: Arc<dyn Compressor>,
    pub policy: Arc<dyn AdmissionPolicy>,
}

/// Application-visible events.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A data message addressed to this node was decrypted.
    MessageReceived {
        topic: String,
        publisher: String,
        data: Vec<u8>,
    },
    /// A member broadcast an inactive status and was purged.
    MemberLeft { topic: String, label: String },
    /// A locally published message went out to at least one subscriber.
    Published { topic: String, text: String },
    /// This node left a group.
    Left { topic: String },
}

pub struct Agent {
    label: String,
    pub_endpoint: String,
    settle_delay: Duration,
    /// Our invitation per topic, reused in status broadcasts.
    invs: RwLock<HashMap<String, String>>,
    gs: GroupStore,
    subs: SubStore,
    valdtr: Validator,
    auth: Authenticator,
    bus: Arc<dyn Bus>,
    channels: Arc<dyn Channels>,
    sealer: Arc<dyn Sealer>,
    keys: Arc<dyn KeyStore>,
    compressor: Arc<dyn Compressor>,
    policy: Arc<dyn AdmissionPolicy>,
    events: mpsc::Sender<AgentEvent>,
}

impl Agent {
    /// Build the orchestrator: generates transport credentials, secures
    /// and binds the publish socket. Credential or bind failure here is
    /// fatal to the node.
    pub fn new(
        cfg: AgentConfig,
        bus: Arc<dyn Bus>,
        collab: Collaborators,
    ) -> Result<(Arc<Self>, mpsc::Receiver<AgentEvent>), ProtocolError> {
        let auth = Authenticator::new(&cfg.label);
        auth.secure_publisher(bus.as_ref())?;
        bus.bind(&cfg.pub_endpoint)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let agent = Arc::new(Self {
            label: cfg.label,
            pub_endpoint: cfg.pub_endpoint,
            settle_delay: cfg.settle_delay,
            invs: RwLock::new(HashMap::new()),
            gs: GroupStore::new(),
            subs: SubStore::new(),
            valdtr: Validator::new(),
            auth,
            bus,
            channels: collab.channels,
            sealer: collab.sealer,
            keys: collab.keys,
            compressor: collab.compressor,
            policy: collab.policy,
            events: event_tx,
        });
        Ok((agent, event_rx))
    }

    /// Spawn one listener task per inbound message category and return
    /// the dispatcher the server boundary routes into.
    pub fn start(self: Arc<Self>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();

        let mut sub_rx = dispatcher.register(MessageKind::Subscribe);
        let agent = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(msg) = sub_rx.recv().await {
                if let Err(e) = agent.handle_subscription(msg).await {
                    tracing::error!("processing subscribe request failed: {e}");
                }
            }
        });

        let mut join_rx = dispatcher.register(MessageKind::JoinRequest);
        let agent = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(msg) = join_rx.recv().await {
                if let Err(e) = agent.handle_join(msg).await {
                    tracing::error!("processing join request failed: {e}");
                }
            }
        });

        match self.bus.incoming(SocketKind::State) {
            Some(mut rx) => {
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if let Err(e) = agent.handle_state(msg).await {
                            tracing::error!("processing status message failed: {e}");
                        }
                    }
                });
            }
            None => tracing::error!("state socket stream already taken"),
        }

        match self.bus.incoming(SocketKind::Data) {
            Some(mut rx) => {
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if let Err(e) = agent.handle_data(msg).await {
                            tracing::error!("processing data message failed: {e}");
                        }
                    }
                });
            }
            None => tracing::error!("data socket stream already taken"),
        }

        dispatcher
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this node holds membership state for a topic.
    pub fn joined(&self, topic: &str) -> bool {
        self.gs.is_member(topic)
    }

    /// Current stored checksum for a topic.
    pub fn checksum(&self, topic: &str) -> Option<Checksum> {
        self.valdtr.hash(topic)
    }

    /// Transport authenticator, exposed for pairing inspection.
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Member snapshot for display. Invitations are capability-bearing
    /// and are stripped before leaving the engine.
    pub fn info(&self, topic: &str) -> Vec<Member> {
        self.gs
            .members(topic)
            .into_iter()
            .map(|mut m| {
                m.invitation.clear();
                m
            })
            .collect()
    }

    // ── Create ───────────────────────────────────────────────────────────

    /// Found a group: a single-member record for this node plus the
    /// initial checksum. No network round trip.
    pub fn create(&self, topic: &str, publisher: bool) -> Result<(), ProtocolError> {
        if self.gs.is_member(topic) {
            return Err(ProtocolError::AlreadyMember {
                topic: topic.to_string(),
            });
        }
        // Validates the group name against the wire topic grammar early.
        topics::state_topic(topic)?;

        let inv = self.channels.invite()?;
        let member = Member {
            label: self.label.clone(),
            active: true,
            publisher,
            invitation: inv.clone(),
            pub_endpoint: self.pub_endpoint.clone(),
        };

        self.invs
            .write()
            .expect("invitation map lock poisoned")
            .insert(topic.to_string(), inv);
        self.gs.add_or_update(topic, member.clone());
        self.valdtr.update_hash(topic, &[member]);
        Ok(())
    }

    // ── Join ─────────────────────────────────────────────────────────────

    /// Join an existing group through one of its members.
    ///
    /// A failure at any step rolls back everything the attempt installed;
    /// no partial membership survives and the join can be retried from
    /// scratch.
    pub async fn join(
        &self,
        topic: &str,
        acceptor: &str,
        publisher: bool,
    ) -> Result<(), ProtocolError> {
        if self.gs.is_member(topic) {
            return Err(ProtocolError::AlreadyMember {
                topic: topic.to_string(),
            });
        }

        let result = self.join_inner(topic, acceptor, publisher).await;
        if result.is_err() {
            self.rollback_join(topic);
        }
        result
    }

    async fn join_inner(
        &self,
        topic: &str,
        acceptor: &str,
        publisher: bool,
    ) -> Result<(), ProtocolError> {
        let inv = self.channels.invite()?;
        self.invs
            .write()
            .expect("invitation map lock poisoned")
            .insert(topic.to_string(), inv.clone());

        let group = self.request_state(topic, acceptor, &inv).await?;

        let joiner = Member {
            label: self.label.clone(),
            active: true,
            publisher,
            invitation: inv,
            pub_endpoint: self.pub_endpoint.clone(),
        };
        self.gs.add_or_update(topic, joiner.clone());

        let mut hashes = HashMap::new();
        for member in &group.members {
            if !member.active || member.label == self.label {
                continue;
            }
            match self.add_member(topic, publisher, member).await {
                Ok(checksum) => {
                    hashes.insert(member.label.clone(), checksum);
                }
                Err(e) => {
                    tracing::error!("adding {} as a member failed: {e}", member.label);
                }
            }
        }

        if group.members.len() > 1 {
            self.verify_join(acceptor, &group.members, hashes)?;
        }

        // Bus subscriptions propagate asynchronously; give them a beat
        // before announcing ourselves.
        tokio::time::sleep(self.settle_delay).await;
        self.notify_all(topic, true, publisher).await?;

        let mut all = group.members;
        all.push(joiner);
        self.valdtr.update_hash(topic, &all);
        Ok(())
    }

    /// Request the group state from the acceptor over the secure channel.
    async fn request_state(
        &self,
        topic: &str,
        acceptor: &str,
        inv: &str,
    ) -> Result<JoinResponse, ProtocolError> {
        let contact = self.channels.peer(acceptor)?;
        let req = JoinRequest::new(&self.label, topic, inv);
        let packed = self
            .sealer
            .pack(acceptor, &contact.pub_key, &req.to_bytes()?)?;
        let res = self
            .channels
            .request(MessageKind::JoinRequest, &packed, &contact.endpoint)
            .await?;
        let body = self.sealer.unpack(&res)?;
        JoinResponse::from_bytes(&body)
    }

    /// Pair with one existing member: secure channel, subscribe
    /// handshake, bus feeds, fan-out bookkeeping. Returns the checksum
    /// the member reported.
    async fn add_member(
        &self,
        topic: &str,
        publisher: bool,
        member: &Member,
    ) -> Result<Checksum, ProtocolError> {
        if self.channels.peer(&member.label).is_err() {
            self.channels.establish(&member.invitation).await?;
        }

        let checksum = self.subscribe_data(topic, publisher, member).await?;
        self.open_state_feed(topic, member)?;
        self.gs.add_or_update(topic, member.clone());

        if !publisher {
            return Ok(checksum);
        }
        // We publish on this topic, so the member becomes one of our
        // fan-out recipients.
        let contact = self.channels.peer(&member.label)?;
        self.subs.add(topic, &member.label, contact.pub_key);
        Ok(checksum)
    }

    /// Run the subscribe handshake with a member: exchange transport
    /// keys, open its data feed when it publishes, return its checksum.
    async fn subscribe_data(
        &self,
        topic: &str,
        publisher: bool,
        member: &Member,
    ) -> Result<Checksum, ProtocolError> {
        let own_pub = self.keys.public_key(&member.label)?;
        let invitation = self
            .invs
            .read()
            .expect("invitation map lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default();
        let sm = Subscribe::new(
            true,
            own_pub,
            topic,
            Member {
                label: self.label.clone(),
                active: true,
                publisher,
                invitation,
                pub_endpoint: self.pub_endpoint.clone(),
            },
            self.transport_keys(),
        );

        let contact = self.channels.peer(&member.label)?;
        let packed = self
            .sealer
            .pack(&member.label, &contact.pub_key, &sm.to_bytes()?)?;
        let res = self
            .channels
            .request(MessageKind::Subscribe, &packed, &contact.endpoint)
            .await
            .map_err(|e| ProtocolError::HandshakeFailed {
                label: member.label.clone(),
                reason: e.to_string(),
            })?;
        let body = self.sealer.unpack(&res)?;
        let ack = SubscribeAck::from_bytes(&body)?;

        let mut sockets = vec![SocketKind::State];
        if ack.publisher {
            sockets.push(SocketKind::Data);
        }
        self.auth.pair(
            &member.label,
            PeerKeySet {
                server_pub: ack.transport.server_pub,
                client_pub: ack.transport.client_pub,
            },
            &sockets,
            self.bus.as_ref(),
        )?;

        if ack.publisher {
            self.open_data_feed(topic, member)?;
        }
        Ok(ack.checksum)
    }

    pub(crate) fn open_state_feed(&self, topic: &str, member: &Member) -> Result<(), ProtocolError> {
        self.bus.connect(SocketKind::State, &member.pub_endpoint)?;
        self.bus
            .subscribe(SocketKind::State, &topics::state_topic(topic)?)?;
        Ok(())
    }

    pub(crate) fn open_data_feed(&self, topic: &str, member: &Member) -> Result<(), ProtocolError> {
        self.bus.connect(SocketKind::Data, &member.pub_endpoint)?;
        self.bus.subscribe(
            SocketKind::Data,
            &topics::data_topic(topic, &member.label, &self.label)?,
        )?;
        Ok(())
    }

    /// Check that the acceptor's member list is corroborated by the
    /// checksums the other members reported independently. Our own
    /// calculation over the received set stands in for the acceptor.
    fn verify_join(
        &self,
        acceptor: &str,
        join_set: &[Member],
        mut hashes: HashMap<String, Checksum>,
    ) -> Result<(), ProtocolError> {
        hashes.insert(acceptor.to_string(), Validator::calculate(join_set));
        let (labels, ok) = Validator::verify(&hashes);
        if !ok {
            return Err(ProtocolError::InconsistentMembership { labels });
        }
        Ok(())
    }

    /// Undo everything a failed join attempt installed.
    fn rollback_join(&self, topic: &str) {
        let members = self.gs.members(topic);

        if let Ok(state) = topics::state_topic(topic) {
            let _ = self.bus.unsubscribe(SocketKind::State, &state);
        }
        for member in &members {
            if member.label == self.label {
                continue;
            }
            if let Ok(data) = topics::data_topic(topic, &member.label, &self.label) {
                let _ = self.bus.unsubscribe(SocketKind::Data, &data);
            }
        }

        self.gs.delete_topic(topic);
        self.subs.delete_topic(topic);
        self.valdtr.remove(topic);
        self.invs
            .write()
            .expect("invitation map lock poisoned")
            .remove(topic);

        for member in &members {
            if member.label == self.label {
                continue;
            }
            self.revoke_if_orphaned(&member.label);
        }
    }

    // ── Send ─────────────────────────────────────────────────────────────

    /// Publish a message to every registered subscriber, each under its
    /// own envelope. No registered subscribers means no effect.
    pub async fn send(&self, topic: &str, msg: &str) -> Result<(), ProtocolError> {
        let current = self
            .gs
            .member(topic, &self.label)
            .ok_or_else(|| ProtocolError::NoSuchTopic {
                topic: topic.to_string(),
            })?;
        if !current.publisher {
            return Err(ProtocolError::NotAuthorized {
                label: self.label.clone(),
            });
        }

        let subs = self.subs.query_by_topic(topic);
        let mut published = false;
        for (label, key) in &subs {
            let data = self.sealer.pack(label, key, msg.as_bytes())?;
            let name = topics::data_topic(topic, &self.label, label)?;
            self.bus.publish(&name, &data)?;
            published = true;
            tracing::trace!("published to {name}");
        }

        if published {
            let _ = self
                .events
                .send(AgentEvent::Published {
                    topic: topic.to_string(),
                    text: msg.to_string(),
                })
                .await;
        }
        Ok(())
    }

    // ── Leave ────────────────────────────────────────────────────────────

    /// Leave a group: drop our bus subscriptions, broadcast an inactive
    /// status, purge local registries and tear down orphaned trust
    /// entries.
    pub async fn leave(&self, topic: &str) -> Result<(), ProtocolError> {
        let members = self.gs.members(topic);
        if members.is_empty() {
            return Err(ProtocolError::NoMembers {
                topic: topic.to_string(),
            });
        }

        self.bus
            .unsubscribe(SocketKind::State, &topics::state_topic(topic)?)?;
        for member in &members {
            if member.label != self.label && member.publisher {
                self.bus.unsubscribe(
                    SocketKind::Data,
                    &topics::data_topic(topic, &member.label, &self.label)?,
                )?;
            }
        }

        let publisher = members
            .iter()
            .find(|m| m.label == self.label)
            .map(|m| m.publisher)
            .unwrap_or(false);
        self.notify_all(topic, false, publisher).await?;

        self.subs.delete_topic(topic);
        self.gs.delete_topic(topic);
        self.valdtr.remove(topic);
        self.invs
            .write()
            .expect("invitation map lock poisoned")
            .remove(topic);

        for member in &members {
            if member.label == self.label {
                continue;
            }
            self.revoke_if_orphaned(&member.label);
        }

        let _ = self
            .events
            .send(AgentEvent::Left {
                topic: topic.to_string(),
            })
            .await;
        Ok(())
    }

    // ── Shared internals ─────────────────────────────────────────────────

    fn transport_keys(&self) -> TransportKeys {
        TransportKeys {
            server_pub: self.auth.server_public(),
            client_pub: self.auth.client_public(),
        }
    }

    /// Revoke a peer's transport keys once it shares no topic with us.
    /// Trust entries and member records must die together.
    fn revoke_if_orphaned(&self, label: &str) {
        if self.gs.member_of_any(label) || !self.auth.paired(label) {
            return;
        }
        if let Err(e) = self.auth.revoke(label, self.bus.as_ref()) {
            tracing::warn!("revoking transport keys of {label} failed: {e}");
        }
    }

    /// Broadcast our status to every member: one envelope per member,
    /// keyed by channel id, compressed, published on the state topic.
    async fn notify_all(
        &self,
        topic: &str,
        active: bool,
        publisher: bool,
    ) -> Result<(), ProtocolError> {
        let compressed = self.compress_status(topic, active, publisher)?;
        self.bus
            .publish(&topics::state_topic(topic)?, &compressed)?;
        tracing::debug!("published status (topic: {topic}, active: {active}, publisher: {publisher})");
        Ok(())
    }

    fn compress_status(
        &self,
        topic: &str,
        active: bool,
        publisher: bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        let invitation = self
            .invs
            .read()
            .expect("invitation map lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default();
        let me = Member {
            label: self.label.clone(),
            active,
            publisher,
            invitation,
            pub_endpoint: self.pub_endpoint.clone(),
        };
        let body = me.to_bytes()?;

        let mut sm = Status::new(topic);
        for member in self.gs.members(topic) {
            if member.label == self.label {
                continue;
            }
            let contact = self.channels.peer(&member.label)?;
            let packed = self.sealer.pack(&member.label, &contact.pub_key, &body)?;
            sm.auth_msgs.insert(contact.channel_id, packed);
        }

        let encoded = sm.to_bytes()?;
        let compressed = self.compressor.compress(&encoded)?;
        tracing::trace!(
            "compressed status message (from {} to {} bytes)",
            encoded.len(),
            compressed.len()
        );
        Ok(compressed)
    }
}
