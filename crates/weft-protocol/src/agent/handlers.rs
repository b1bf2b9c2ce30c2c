/// Inbound handlers — one per message category.
///
/// Each runs on its own listener task. Errors returned here are logged
/// by the listener loop; one bad message never stops a listener.
use tokio::sync::oneshot;

use weft_bus::{topics, BusMessage, PeerKeySet, SocketKind};

use super::{Agent, AgentEvent};
use crate::dispatch::Inbound;
use crate::messages::{JoinRequest, JoinResponse, Status, Subscribe, SubscribeAck};
use crate::types::Member;
use crate::ProtocolError;

impl Agent {
    /// Subscribe handshake, acceptor side.
    ///
    /// `subscribe = false` is a teardown signal that only drops the
    /// fan-out entry; key and membership teardown is driven by status
    /// broadcasts.
    pub(super) async fn handle_subscription(&self, mut msg: Inbound) -> Result<(), ProtocolError> {
        let body = self.sealer.unpack(&msg.body)?;
        let sm = Subscribe::from_bytes(&body)?;

        if !sm.subscribe {
            self.subs.delete(&sm.topic, &sm.member.label);
            return Ok(());
        }

        if !self.policy.is_admissible(&sm.member.label, &sm.topic) {
            return Err(ProtocolError::NotAuthorized {
                label: sm.member.label,
            });
        }

        let mut sockets = vec![SocketKind::State];
        if sm.member.publisher {
            sockets.push(SocketKind::Data);
        }
        self.auth.pair(
            &sm.member.label,
            PeerKeySet {
                server_pub: sm.transport.server_pub,
                client_pub: sm.transport.client_pub,
            },
            &sockets,
            self.bus.as_ref(),
        )?;

        self.send_subscribe_ack(&sm, msg.reply.take())?;

        // Follow the new member's feeds: status always, data when it
        // publishes.
        self.open_state_feed(&sm.topic, &sm.member)?;
        if sm.member.publisher {
            self.open_data_feed(&sm.topic, &sm.member)?;
        }

        self.subs.add(&sm.topic, &sm.member.label, sm.pub_key);
        tracing::debug!("processed subscription of {} to {}", sm.member.label, sm.topic);
        Ok(())
    }

    fn send_subscribe_ack(
        &self,
        sm: &Subscribe,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    ) -> Result<(), ProtocolError> {
        let current =
            self.gs
                .member(&sm.topic, &self.label)
                .ok_or_else(|| ProtocolError::NoSuchTopic {
                    topic: sm.topic.clone(),
                })?;
        let checksum = self
            .valdtr
            .hash(&sm.topic)
            .ok_or_else(|| ProtocolError::NoSuchTopic {
                topic: sm.topic.clone(),
            })?;

        let ack = SubscribeAck::new(self.transport_keys(), current.publisher, checksum);
        let contact = self.channels.peer(&sm.member.label)?;
        let packed = self
            .sealer
            .pack(&sm.member.label, &contact.pub_key, &ack.to_bytes()?)?;

        let reply = reply.ok_or_else(|| ProtocolError::HandshakeFailed {
            label: sm.member.label.clone(),
            reason: "subscribe request carried no reply slot".into(),
        })?;
        reply.send(packed).map_err(|_| ProtocolError::HandshakeFailed {
            label: sm.member.label.clone(),
            reason: "requester hung up before the reply".into(),
        })
    }

    /// Join request, acceptor side: reply with the full member list.
    pub(super) async fn handle_join(&self, mut msg: Inbound) -> Result<(), ProtocolError> {
        let body = self.sealer.unpack(&msg.body)?;
        let req = JoinRequest::from_bytes(&body)?;

        let members = self.gs.members(&req.topic);
        if members.is_empty() {
            // We cannot vouch for a group we are not in.
            return Err(ProtocolError::NoSuchTopic { topic: req.topic });
        }
        if !self.policy.is_admissible(&req.label, &req.topic) {
            return Err(ProtocolError::NotAuthorized { label: req.label });
        }

        if self.channels.peer(&req.label).is_err() {
            self.channels.establish(&req.requester_invitation).await?;
        }
        let contact = self.channels.peer(&req.label)?;

        let res = JoinResponse::new(members);
        let packed = self
            .sealer
            .pack(&req.label, &contact.pub_key, &res.to_bytes()?)?;

        let reply = msg.reply.take().ok_or_else(|| ProtocolError::HandshakeFailed {
            label: req.label.clone(),
            reason: "join request carried no reply slot".into(),
        })?;
        reply.send(packed).map_err(|_| ProtocolError::HandshakeFailed {
            label: req.label.clone(),
            reason: "requester hung up before the reply".into(),
        })?;

        tracing::debug!("shared group state of {} with {}", req.topic, req.label);
        Ok(())
    }

    /// Status broadcast. The checksum is recomputed after every
    /// application, success or failure, so no stale digest survives a
    /// partial one.
    pub(super) async fn handle_state(&self, msg: BusMessage) -> Result<(), ProtocolError> {
        let base = topics::parse_state_topic(&msg.topic)
            .ok_or_else(|| {
                ProtocolError::Deserialization(format!("invalid state topic {}", msg.topic))
            })?
            .to_string();

        let result = self.apply_status(&base, &msg.payload).await;

        let members = self.gs.members(&base);
        if !members.is_empty() {
            self.valdtr.update_hash(&base, &members);
        }
        result
    }

    async fn apply_status(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        let raw = self.compressor.decompress(payload)?;
        let sm = Status::from_bytes(&raw)?;
        if sm.topic != topic {
            return Err(ProtocolError::Deserialization(format!(
                "status topic {} does not match wire topic {topic}",
                sm.topic
            )));
        }

        let envelope = sm
            .auth_msgs
            .iter()
            .find(|(channel_id, _)| self.channels.is_valid_channel(channel_id))
            .map(|(_, env)| env.as_slice())
            .ok_or(ProtocolError::StatusNotAddressed)?;

        let body = self.sealer.unpack(envelope)?;
        let member = Member::from_bytes(&body)?;

        if !member.active {
            if member.publisher {
                self.bus.unsubscribe(
                    SocketKind::Data,
                    &topics::data_topic(topic, &member.label, &self.label)?,
                )?;
            }
            self.subs.delete(topic, &member.label);
            self.gs.remove(topic, &member.label);
            self.revoke_if_orphaned(&member.label);

            let _ = self
                .events
                .send(AgentEvent::MemberLeft {
                    topic: topic.to_string(),
                    label: member.label,
                })
                .await;
            return Ok(());
        }

        tracing::debug!("group state updated for member {} in {topic}", member.label);
        self.gs.add_or_update(topic, member);
        Ok(())
    }

    /// Data message addressed to this node: decrypt and hand the payload
    /// to the application layer.
    pub(super) async fn handle_data(&self, msg: BusMessage) -> Result<(), ProtocolError> {
        let (base, publisher, _) = topics::parse_data_topic(&msg.topic).ok_or_else(|| {
            ProtocolError::Deserialization(format!("invalid data topic {}", msg.topic))
        })?;

        let plaintext = self.sealer.unpack(&msg.payload)?;
        let _ = self
            .events
            .send(AgentEvent::MessageReceived {
                topic: base.to_string(),
                publisher: publisher.to_string(),
                data: plaintext,
            })
            .await;
        Ok(())
    }
}
